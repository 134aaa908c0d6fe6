//! Properties which must hold in every solution, checked on the returned results.
use ensys::components::{Bus, Converter, GenericStorage, Sink, Source};
use ensys::energy_system::EnergySystem;
use ensys::flow::{Flow, FlowKey};
use ensys::model::{Model, ModelOptions};
use ensys::options::{Investment, NonConvex};
use ensys::results::Results;
use ensys::solver::{Highs, SolveOptions};
use ensys::variables::ResultKey;
use float_cmp::{approx_eq, assert_approx_eq};

const STEPS: usize = 3;

fn solve(es: &EnergySystem) -> Results {
    let mut model = Model::new(es, ModelOptions::default()).unwrap();
    model.solve(&Highs, &SolveOptions::default()).unwrap();
    model.results().unwrap()
}

fn flow(results: &Results, source: &str, target: &str) -> Vec<f64> {
    column(results, &ResultKey::edge(source, target), "flow")
}

fn column(results: &Results, key: &ResultKey, name: &str) -> Vec<f64> {
    results
        .get(key)
        .unwrap()
        .sequences
        .column(name)
        .unwrap()
        .to_vec()
}

/// A CHP plant, a grid connection and a battery on the electricity bus
fn chp_system() -> EnergySystem {
    let mut es = EnergySystem::with_uniform_steps(STEPS, 1.0).unwrap();
    for bus in ["gas", "el", "heat"] {
        es.add(Bus::new(bus).build().unwrap()).unwrap();
    }
    es.add(
        Source::new("gas_supply")
            .output("gas", Flow::new().variable_costs(vec![2.0, 3.0, 4.0]))
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Source::new("grid")
            .output(
                "el",
                Flow::new().nominal_capacity(100.0).variable_costs(10.0),
            )
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Converter::new("chp")
            .input("gas", Flow::new())
            .output("el", Flow::new().nominal_capacity(18.0))
            .output("heat", Flow::new())
            .conversion_factor("el", 0.4)
            .conversion_factor("heat", 0.5)
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Source::new("boiler")
            .output("heat", Flow::new().variable_costs(100.0))
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        GenericStorage::new("battery")
            .nominal_capacity(20.0)
            .initial_storage_level(0.0)
            .balanced(false)
            .loss_rate(0.05)
            .inflow_conversion_factor(0.9)
            .outflow_conversion_factor(0.8)
            .input("el", Flow::new())
            .output("el", Flow::new())
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Sink::new("el_demand")
            .input(
                "el",
                Flow::new().nominal_capacity(1.0).fix(vec![10.0, 20.0, 15.0]),
            )
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Sink::new("heat_demand")
            .input("heat", Flow::new().nominal_capacity(1.0).fix(5.0))
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Sink::new("heat_excess")
            .input("heat", Flow::new())
            .build()
            .unwrap(),
    )
    .unwrap();
    es
}

fn sum_at(results: &Results, keys: &[FlowKey], t: usize) -> f64 {
    keys.iter()
        .map(|key| column(results, &ResultKey::Edge(key.clone()), "flow")[t])
        .sum()
}

#[test]
fn bus_balance() {
    let es = chp_system();
    let results = solve(&es);
    for bus in ["gas", "el", "heat"] {
        let (inflows, outflows) = (es.inflows(bus), es.outflows(bus));
        for t in 0..STEPS {
            assert_approx_eq!(
                f64,
                sum_at(&results, &inflows, t),
                sum_at(&results, &outflows, t),
                epsilon = 1e-6
            );
        }
    }
}

#[test]
fn capacity_envelope() {
    let results = solve(&chp_system());
    for value in &flow(&results, "chp", "el")[..STEPS] {
        assert!(*value >= -1e-9 && *value <= 18.0 + 1e-6);
    }
    let demand = flow(&results, "el", "el_demand");
    for (t, expected) in [10.0, 20.0, 15.0].iter().enumerate() {
        assert_approx_eq!(f64, demand[t], *expected, epsilon = 1e-6);
    }
}

#[test]
fn conversion_law() {
    let results = solve(&chp_system());
    let gas = flow(&results, "gas", "chp");
    let el = flow(&results, "chp", "el");
    let heat = flow(&results, "chp", "heat");
    for t in 0..STEPS {
        assert_approx_eq!(f64, gas[t] * 0.4, el[t], epsilon = 1e-6);
        assert_approx_eq!(f64, gas[t] * 0.5, heat[t], epsilon = 1e-6);
    }
}

#[test]
fn storage_balance() {
    let results = solve(&chp_system());
    let content = column(&results, &ResultKey::node("battery"), "storage_content");
    let charge = flow(&results, "el", "battery");
    let discharge = flow(&results, "battery", "el");
    assert_eq!(content.len(), STEPS + 1);
    for t in 0..STEPS {
        let expected = 0.95 * content[t] + 0.9 * charge[t] - discharge[t] / 0.8;
        assert_approx_eq!(f64, content[t + 1], expected, epsilon = 1e-6);
        assert!(content[t + 1] <= 20.0 + 1e-6);
    }
}

#[test]
fn startup_accounting() {
    let mut es = EnergySystem::with_uniform_steps(5, 1.0).unwrap();
    es.add(Bus::new("el").build().unwrap()).unwrap();
    es.add(
        Source::new("pp")
            .output(
                "el",
                Flow::new()
                    .nominal_capacity(20.0)
                    .min(0.5)
                    .variable_costs(1.0)
                    .nonconvex(NonConvex::new().startup_costs(1.0).maximum_startups(2.0)),
            )
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Source::new("backup")
            .output("el", Flow::new().variable_costs(100.0))
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
                    .fix(vec![10.0, 0.0, 10.0, 0.0, 10.0]),
            )
            .build()
            .unwrap(),
    )
    .unwrap();

    let results = solve(&es);
    let key = ResultKey::edge("pp", "el");
    let status = column(&results, &key, "status");
    let startup = column(&results, &key, "startup");
    let mut previous = 0.0;
    for t in 0..5 {
        assert!(startup[t] >= status[t] - previous - 1e-6);
        previous = status[t];
    }
    let startups: f64 = startup[..5].iter().sum();
    assert!(startups <= 2.0 + 1e-6);
    // One of the three demand steps falls back to the backup
    assert_approx_eq!(f64, results.meta.objective, 2.0 * 11.0 + 1000.0, epsilon = 1e-6);
}

fn components() -> Vec<ensys::node::Component> {
    vec![
        Bus::new("el").build().unwrap(),
        Source::new("cheap")
            .output("el", Flow::new().nominal_capacity(5.0).variable_costs(1.0))
            .build()
            .unwrap(),
        Source::new("expensive")
            .output("el", Flow::new().variable_costs(3.0))
            .build()
            .unwrap(),
        Sink::new("demand")
            .input("el", Flow::new().nominal_capacity(1.0).fix(vec![4.0, 8.0]))
            .build()
            .unwrap(),
    ]
}

#[test]
fn add_order_does_not_matter() {
    let mut forward = EnergySystem::with_uniform_steps(2, 1.0).unwrap();
    forward.add_all(components()).unwrap();
    let mut backward = EnergySystem::with_uniform_steps(2, 1.0).unwrap();
    backward.add_all(components().into_iter().rev()).unwrap();

    let (forward, backward) = (solve(&forward), solve(&backward));
    assert!(approx_eq!(
        f64,
        forward.meta.objective,
        backward.meta.objective,
        epsilon = 1e-9
    ));
    assert_eq!(
        flow(&forward, "expensive", "el")[..2],
        flow(&backward, "expensive", "el")[..2]
    );
}

#[test]
fn empty_time_grid_is_rejected() {
    assert!(EnergySystem::with_uniform_steps(0, 1.0).is_err());
}

#[test]
fn zero_fix_and_forbidden_investment() {
    let mut es = EnergySystem::with_uniform_steps(2, 1.0).unwrap();
    es.add(Bus::new("el").build().unwrap()).unwrap();
    es.add(
        Source::new("plant")
            .output(
                "el",
                Flow::new().investment(
                    Investment::new()
                        .ep_costs(1.0)
                        .existing(3.0)
                        .maximum(0.0),
                ),
            )
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Sink::new("idle")
            .input("el", Flow::new().nominal_capacity(5.0).fix(0.0))
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Sink::new("demand")
            .input("el", Flow::new().nominal_capacity(1.0).fix(2.0))
            .build()
            .unwrap(),
    )
    .unwrap();

    let results = solve(&es);
    let plant = results.get(&ResultKey::edge("plant", "el")).unwrap();
    assert_approx_eq!(f64, plant.scalars["invest"], 0.0, epsilon = 1e-9);
    assert_approx_eq!(f64, plant.scalars["total"], 3.0, epsilon = 1e-9);
    for value in &flow(&results, "el", "idle")[..2] {
        assert_approx_eq!(f64, *value, 0.0, epsilon = 1e-9);
    }
}
