//! Fixtures for tests

use crate::components::{Bus, Sink, Source};
use crate::energy_system::EnergySystem;
use crate::flow::Flow;
use rstest::fixture;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.err().expect("expected an error").chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// A grid source feeding a fixed demand of 10, 20 and 30 through a bus
pub fn simple_system_with_capacity(capacity: f64) -> EnergySystem {
    let mut es = EnergySystem::with_uniform_steps(3, 1.0).unwrap();
    es.add(Bus::new("el").build().unwrap()).unwrap();
    es.add(
        Source::new("grid")
            .output(
                "el",
                Flow::new().nominal_capacity(capacity).variable_costs(2.0),
            )
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Sink::new("demand")
            .input(
                "el",
                Flow::new()
                    .nominal_capacity(1.0)
                    .fix(vec![10.0, 20.0, 30.0]),
            )
            .build()
            .unwrap(),
    )
    .unwrap();
    es
}

#[fixture]
pub fn simple_system() -> EnergySystem {
    simple_system_with_capacity(100.0)
}
