//! End-to-end scenarios solved with HiGHS.
use ensys::components::{Bus, Converter, GenericStorage, Sink, Source};
use ensys::energy_system::{EnergySystem, Period};
use ensys::flow::Flow;
use ensys::model::{Model, ModelOptions};
use ensys::options::{Investment, NonConvex};
use ensys::results::Results;
use ensys::solver::{Highs, SolveOptions};
use ensys::variables::ResultKey;
use float_cmp::assert_approx_eq;
use std::iter;

fn solve(es: &EnergySystem) -> Results {
    let mut model = Model::new(es, ModelOptions::default()).unwrap();
    model.solve(&Highs, &SolveOptions::default()).unwrap();
    model.results().unwrap()
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

#[test]
fn single_gas_converter() {
    let demand = vec![10.0, 20.0, 30.0, 40.0, 50.0];
    let mut es = EnergySystem::with_uniform_steps(demand.len(), 1.0).unwrap();
    es.add(Bus::new("gas").build().unwrap()).unwrap();
    es.add(Bus::new("el").build().unwrap()).unwrap();
    es.add(
        Source::new("rgas")
            .output("gas", Flow::new())
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Converter::new("pp")
            .input("gas", Flow::new())
            .output(
                "el",
                Flow::new().nominal_capacity(100.0).variable_costs(50.0),
            )
            .conversion_factor("el", 0.58)
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Sink::new("demand")
            .input("el", Flow::new().nominal_capacity(1.0).fix(demand.clone()))
            .build()
            .unwrap(),
    )
    .unwrap();

    let results = solve(&es);
    let el = column(&results, &ResultKey::edge("pp", "el"), "flow");
    let gas = column(&results, &ResultKey::edge("gas", "pp"), "flow");
    for (t, demand) in demand.iter().enumerate() {
        assert_approx_eq!(f64, el[t], *demand, epsilon = 1e-6);
        assert_approx_eq!(f64, gas[t], demand / 0.58, epsilon = 1e-6);
    }
    assert_approx_eq!(f64, results.meta.objective, 50.0 * 150.0, epsilon = 1e-6);
}

#[test]
fn activity_costs_shift_the_fireplace_to_the_evening() {
    let heat_demand: Vec<f64> = (0..24)
        .map(|hour| if (4..=17).contains(&hour) { 4.0 } else { 5.0 })
        .collect();
    let activity_costs: Vec<f64> = iter::repeat_n(5.0, 18).chain(iter::repeat_n(0.0, 6)).collect();

    let mut es = EnergySystem::with_uniform_steps(24, 1.0).unwrap();
    es.add(Bus::new("heat").build().unwrap()).unwrap();
    es.add(
        Source::new("fireplace")
            .output(
                "heat",
                Flow::new()
                    .nominal_capacity(3.0)
                    .nonconvex(NonConvex::new().activity_costs(activity_costs)),
            )
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Source::new("boiler")
            .output(
                "heat",
                Flow::new().nominal_capacity(10.0).variable_costs(1.0),
            )
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Sink::new("demand")
            .input("heat", Flow::new().nominal_capacity(1.0).fix(heat_demand))
            .build()
            .unwrap(),
    )
    .unwrap();

    let results = solve(&es);
    let fireplace = column(&results, &ResultKey::edge("fireplace", "heat"), "flow");
    for hour in 0..18 {
        assert_approx_eq!(f64, fireplace[hour], 0.0, epsilon = 1e-6);
    }
    for hour in 18..24 {
        assert_approx_eq!(f64, fireplace[hour], 3.0, epsilon = 1e-6);
    }
    // The boiler covers 4·5 + 14·4 and the remaining 2 units in the last six hours
    assert_approx_eq!(f64, results.meta.objective, 20.0 + 56.0 + 12.0, epsilon = 1e-6);
}

#[test]
fn balanced_storage_returns_to_initial_level() {
    let mut es = EnergySystem::with_uniform_steps(4, 1.0).unwrap();
    es.add(Bus::new("b").build().unwrap()).unwrap();
    es.add(
        Source::new("supply")
            .output("b", Flow::new().variable_costs(1.0))
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Sink::new("demand")
            .input("b", Flow::new().nominal_capacity(1.0).fix(1.0))
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        GenericStorage::new("storage")
            .nominal_capacity(10.0)
            .initial_storage_level(0.5)
            .balanced(true)
            .input("b", Flow::new())
            .output("b", Flow::new())
            .build()
            .unwrap(),
    )
    .unwrap();

    let results = solve(&es);
    let content = column(&results, &ResultKey::node("storage"), "storage_content");
    assert_eq!(content.len(), 5);
    assert_approx_eq!(f64, content[0], 5.0, epsilon = 1e-6);
    assert_approx_eq!(f64, content[4], 5.0, epsilon = 1e-6);
    assert_approx_eq!(f64, results.meta.objective, 4.0, epsilon = 1e-6);
}

#[test]
fn nonconvex_investment_pays_offset() {
    let mut es = EnergySystem::with_uniform_steps(2, 1.0).unwrap();
    es.add(Bus::new("gas").build().unwrap()).unwrap();
    es.add(Bus::new("el").build().unwrap()).unwrap();
    es.add(
        Source::new("rgas")
            .output("gas", Flow::new())
            .build()
            .unwrap(),
    )
    .unwrap();
    let investment = Investment::new()
        .ep_costs(300.0)
        .offset(400.0)
        .maximum(1000.0)
        .nonconvex(true);
    es.add(
        Converter::new("pp")
            .input("gas", Flow::new())
            .output(
                "el",
                Flow::new().investment(investment).variable_costs(50.0),
            )
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Sink::new("demand")
            .input("el", Flow::new().nominal_capacity(1.0).fix(500.0))
            .build()
            .unwrap(),
    )
    .unwrap();

    let results = solve(&es);
    let pp = results.get(&ResultKey::edge("pp", "el")).unwrap();
    assert_approx_eq!(f64, pp.scalars["invest"], 500.0, epsilon = 1e-6);
    assert_approx_eq!(f64, pp.scalars["invest_status"], 1.0, epsilon = 1e-6);
    assert_approx_eq!(
        f64,
        results.meta.objective,
        300.0 * 500.0 + 400.0 + 50.0 * 500.0 * 2.0,
        epsilon = 1e-4
    );
}

#[test]
fn minimum_uptime_keeps_plant_running() {
    let mut es = EnergySystem::with_uniform_steps(5, 1.0).unwrap();
    es.add(Bus::new("el").build().unwrap()).unwrap();
    es.add(
        Source::new("pp")
            .output(
                "el",
                Flow::new()
                    .nominal_capacity(10.0)
                    .min(0.5)
                    .variable_costs(10.0)
                    .nonconvex(NonConvex::new().minimum_uptime(2.0).initial_status(true)),
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
                    .fix(vec![0.0, 0.0, 10.0, 0.0, 0.0]),
            )
            .build()
            .unwrap(),
    )
    .unwrap();
    es.add(
        Sink::new("excess")
            .input("el", Flow::new())
            .build()
            .unwrap(),
    )
    .unwrap();

    let results = solve(&es);
    let status = column(&results, &ResultKey::edge("pp", "el"), "status");
    for (t, expected) in [0.0, 0.0, 1.0, 1.0, 0.0].iter().enumerate() {
        assert_approx_eq!(f64, status[t], *expected, epsilon = 1e-6);
    }
    // 10 units for the peak and the minimum load of 5 in the step after
    assert_approx_eq!(f64, results.meta.objective, 150.0, epsilon = 1e-6);
}

#[test]
fn multi_period_investment_is_discounted() {
    let es = {
        let mut es = EnergySystem::with_uniform_steps(2, 1.0)
            .unwrap()
            .with_periods(vec![Period::new(0..1, 5), Period::new(1..2, 5)]);
        es.add(Bus::new("el").build().unwrap()).unwrap();
        es.add(
            Source::new("plant")
                .output(
                    "el",
                    Flow::new().investment(
                        Investment::new()
                            .ep_costs(100.0)
                            .lifetime(20)
                            .interest_rate(0.05),
                    ),
                )
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Sink::new("demand")
                .input("el", Flow::new().nominal_capacity(1.0).fix(10.0))
                .build()
                .unwrap(),
        )
        .unwrap();
        es
    };

    let results = solve(&es);
    let key = ResultKey::edge("plant", "el");
    let scalars = results.period_scalars(&key).unwrap();
    assert_approx_eq!(f64, scalars["total"][0], 10.0, epsilon = 1e-6);
    assert_approx_eq!(f64, scalars["total"][1], 10.0, epsilon = 1e-6);
    assert_approx_eq!(f64, scalars["invest"][1], 0.0, epsilon = 1e-6);
    assert_approx_eq!(
        f64,
        results.meta.objective,
        100.0 * 10.0 * (1.0 + 1.05_f64.powi(-5)),
        epsilon = 1e-6
    );
}
