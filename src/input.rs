//! Loading energy systems from a TOML model file with optional time series in CSV format.
//!
//! Time-dependent parameters of flows and storages may be given as a number, an array or the name
//! of a column of the time series file. Investments may give `capex` and `wacc` instead of
//! `ep_costs`; the annuity is then computed from the `lifetime`.
use crate::components::{
    Bus, Converter, ExtractionTurbineChp, GenericStorage, Link, OffsetConverter, Sink, Source,
};
use crate::energy_system::{EnergySystem, Period, TsaParameters};
use crate::error::config_bail;
use crate::finance::annuity;
use crate::flow::Flow;
use crate::model::{DEFAULT_DISCOUNT_RATE, ModelOptions};
use crate::node::Component;
use crate::options::{Investment, NonConvex};
use crate::sequence::Sequence;
use anyhow::{Context, Result, ensure};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// Read a TOML file into `T`
pub fn read_toml<T: DeserializeOwned>(file_path: &Path) -> Result<T> {
    let toml_str = fs::read_to_string(file_path)
        .with_context(|| format!("Could not read file {}", file_path.display()))?;
    let toml_data = toml::from_str(&toml_str)
        .with_context(|| format!("Could not parse TOML file {}", file_path.display()))?;
    Ok(toml_data)
}

/// Columns of a time series file, keyed by their header
pub type TimeSeries = IndexMap<String, Vec<f64>>;

/// Read a CSV file of time series with one named column per series
pub fn read_timeseries(file_path: &Path) -> Result<TimeSeries> {
    let mut reader = csv::Reader::from_path(file_path)
        .with_context(|| format!("Could not open {}", file_path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Could not read header of {}", file_path.display()))?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();

    let mut columns: TimeSeries = headers.iter().map(|h| (h.clone(), Vec::new())).collect();
    for (row, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("Invalid row {row} in {}", file_path.display()))?;
        for (header, field) in headers.iter().zip(record.iter()) {
            let value = field.trim().parse().with_context(|| {
                format!("Invalid value {field:?} for {header} in row {row}")
            })?;
            columns[header.as_str()].push(value);
        }
    }
    ensure!(
        columns.values().any(|values| !values.is_empty()),
        "{} contains no data",
        file_path.display()
    );

    Ok(columns)
}

/// A time-dependent parameter as written in the model file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum ValueInput {
    Scalar(f64),
    Series(Vec<f64>),
    Column(String),
}

impl ValueInput {
    fn resolve(&self, timeseries: &TimeSeries) -> Result<Sequence> {
        Ok(match self {
            Self::Scalar(value) => Sequence::scalar(*value),
            Self::Series(values) => Sequence::from(values.clone()),
            Self::Column(name) => timeseries
                .get(name)
                .with_context(|| format!("Unknown time series column {name}"))?
                .clone()
                .into(),
        })
    }
}

/// Resolve an optional parameter
fn resolve(value: Option<&ValueInput>, timeseries: &TimeSeries) -> Result<Option<Sequence>> {
    value.map(|value| value.resolve(timeseries)).transpose()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimeInput {
    steps: Option<usize>,
    #[serde(default = "default_hours")]
    hours: f64,
    timeincrement: Option<Vec<f64>>,
    timeindex: Option<Vec<NaiveDateTime>>,
    #[serde(default)]
    infer_last_interval: bool,
    /// Path of the time series file, relative to the model file
    timeseries: Option<String>,
}

fn default_hours() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PeriodInput {
    /// First and one past the last time step
    steps: [usize; 2],
    years: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TsaInput {
    timesteps_per_period: usize,
    order: Vec<usize>,
    occurrences: Option<IndexMap<usize, usize>>,
}

/// Model options as written in the model file
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct OptionsInput {
    debug: bool,
    discount_rate: f64,
    receive_duals: bool,
    objective_weighting: Option<Vec<f64>>,
}

impl Default for OptionsInput {
    fn default() -> Self {
        Self {
            debug: false,
            discount_rate: DEFAULT_DISCOUNT_RATE,
            receive_duals: false,
            objective_weighting: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InvestmentInput {
    capex: Option<f64>,
    wacc: Option<f64>,
    #[serde(flatten)]
    investment: Investment,
}

impl InvestmentInput {
    fn into_investment(self, entity: &str) -> Result<Investment> {
        let mut investment = self.investment;
        if let Some(capex) = self.capex {
            let Some(lifetime) = investment.lifetime else {
                config_bail!(entity, "capex needs a lifetime to compute the annuity");
            };
            let wacc = self.wacc.unwrap_or(0.0);
            investment.ep_costs = Sequence::scalar(annuity(capex, lifetime, wacc));
        }
        Ok(investment)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FlowInput {
    /// The node on the other end of the flow
    node: String,
    nominal_capacity: Option<f64>,
    investment: Option<InvestmentInput>,
    min: Option<ValueInput>,
    max: Option<ValueInput>,
    fix: Option<ValueInput>,
    variable_costs: Option<ValueInput>,
    fixed_costs: Option<ValueInput>,
    positive_gradient_limit: Option<ValueInput>,
    negative_gradient_limit: Option<ValueInput>,
    full_load_time_min: Option<f64>,
    full_load_time_max: Option<f64>,
    #[serde(default)]
    integer: bool,
    #[serde(default)]
    bidirectional: bool,
    nonconvex: Option<NonConvex>,
    /// Factors read by extra constraint blocks, e.g. `emission_factor`
    #[serde(default)]
    custom_properties: IndexMap<String, ValueInput>,
}

impl FlowInput {
    fn into_flow(self, owner: &str, timeseries: &TimeSeries) -> Result<(String, Flow)> {
        let entity = format!("({owner}, {})", self.node);
        let mut flow = Flow::new()
            .integer(self.integer)
            .bidirectional(self.bidirectional);
        if let Some(capacity) = self.nominal_capacity {
            flow = flow.nominal_capacity(capacity);
        }
        if let Some(investment) = self.investment {
            flow = flow.investment(investment.into_investment(&entity)?);
        }
        if let Some(min) = resolve(self.min.as_ref(), timeseries)? {
            flow = flow.min(min);
        }
        if let Some(max) = resolve(self.max.as_ref(), timeseries)? {
            flow = flow.max(max);
        }
        if let Some(fix) = resolve(self.fix.as_ref(), timeseries)? {
            flow = flow.fix(fix);
        }
        if let Some(costs) = resolve(self.variable_costs.as_ref(), timeseries)? {
            flow = flow.variable_costs(costs);
        }
        if let Some(costs) = resolve(self.fixed_costs.as_ref(), timeseries)? {
            flow = flow.fixed_costs(costs);
        }
        if let Some(limit) = resolve(self.positive_gradient_limit.as_ref(), timeseries)? {
            flow = flow.positive_gradient_limit(limit);
        }
        if let Some(limit) = resolve(self.negative_gradient_limit.as_ref(), timeseries)? {
            flow = flow.negative_gradient_limit(limit);
        }
        if let Some(hours) = self.full_load_time_min {
            flow = flow.full_load_time_min(hours);
        }
        if let Some(hours) = self.full_load_time_max {
            flow = flow.full_load_time_max(hours);
        }
        if let Some(nonconvex) = self.nonconvex {
            flow = flow.nonconvex(nonconvex);
        }
        for (name, value) in &self.custom_properties {
            flow = flow.custom_property(name, value.resolve(timeseries)?);
        }
        Ok((self.node, flow))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OffsetInput {
    slope: ValueInput,
    offset: ValueInput,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum NodeInput {
    Bus {
        label: String,
        #[serde(default = "default_true")]
        balanced: bool,
    },
    Source {
        label: String,
        outputs: Vec<FlowInput>,
    },
    Sink {
        label: String,
        inputs: Vec<FlowInput>,
    },
    Converter {
        label: String,
        inputs: Vec<FlowInput>,
        outputs: Vec<FlowInput>,
        #[serde(default)]
        conversion_factors: IndexMap<String, ValueInput>,
    },
    OffsetConverter {
        label: String,
        inputs: Vec<FlowInput>,
        outputs: Vec<FlowInput>,
        coefficients: IndexMap<String, OffsetInput>,
    },
    Storage(Box<StorageInput>),
    Link {
        label: String,
        inputs: Vec<FlowInput>,
        outputs: Vec<FlowInput>,
        conversion_factors: Vec<LinkFactorInput>,
    },
    ExtractionTurbineChp {
        label: String,
        input: FlowInput,
        outputs: Vec<FlowInput>,
        conversion_factors: IndexMap<String, ValueInput>,
        full_condensation: FullCondensationInput,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinkFactorInput {
    from: String,
    to: String,
    factor: ValueInput,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FullCondensationInput {
    /// The main output
    node: String,
    factor: ValueInput,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StorageInput {
    label: String,
    input: FlowInput,
    output: FlowInput,
    nominal_capacity: Option<f64>,
    investment: Option<InvestmentInput>,
    initial_storage_level: Option<f64>,
    #[serde(default = "default_true")]
    balanced: bool,
    loss_rate: Option<ValueInput>,
    fixed_losses_relative: Option<ValueInput>,
    fixed_losses_absolute: Option<ValueInput>,
    inflow_conversion_factor: Option<ValueInput>,
    outflow_conversion_factor: Option<ValueInput>,
    min_storage_level: Option<ValueInput>,
    max_storage_level: Option<ValueInput>,
    storage_costs: Option<ValueInput>,
    invest_relation_input_output: Option<f64>,
    invest_relation_input_capacity: Option<f64>,
    invest_relation_output_capacity: Option<f64>,
}

impl StorageInput {
    fn into_component(self, timeseries: &TimeSeries) -> Result<Component> {
        let label = self.label;
        let (source, inflow) = self.input.into_flow(&label, timeseries)?;
        let (target, outflow) = self.output.into_flow(&label, timeseries)?;
        let mut storage = GenericStorage::new(label.as_str())
            .input(source, inflow)
            .output(target, outflow)
            .balanced(self.balanced);
        if let Some(capacity) = self.nominal_capacity {
            storage = storage.nominal_capacity(capacity);
        }
        if let Some(investment) = self.investment {
            storage = storage.investment(investment.into_investment(&label)?);
        }
        if let Some(level) = self.initial_storage_level {
            storage = storage.initial_storage_level(level);
        }
        if let Some(rate) = resolve(self.loss_rate.as_ref(), timeseries)? {
            storage = storage.loss_rate(rate);
        }
        if let Some(losses) = resolve(self.fixed_losses_relative.as_ref(), timeseries)? {
            storage = storage.fixed_losses_relative(losses);
        }
        if let Some(losses) = resolve(self.fixed_losses_absolute.as_ref(), timeseries)? {
            storage = storage.fixed_losses_absolute(losses);
        }
        if let Some(factor) = resolve(self.inflow_conversion_factor.as_ref(), timeseries)? {
            storage = storage.inflow_conversion_factor(factor);
        }
        if let Some(factor) = resolve(self.outflow_conversion_factor.as_ref(), timeseries)? {
            storage = storage.outflow_conversion_factor(factor);
        }
        if let Some(level) = resolve(self.min_storage_level.as_ref(), timeseries)? {
            storage = storage.min_storage_level(level);
        }
        if let Some(level) = resolve(self.max_storage_level.as_ref(), timeseries)? {
            storage = storage.max_storage_level(level);
        }
        if let Some(costs) = resolve(self.storage_costs.as_ref(), timeseries)? {
            storage = storage.storage_costs(costs);
        }
        if let Some(ratio) = self.invest_relation_input_output {
            storage = storage.invest_relation_input_output(ratio);
        }
        if let Some(ratio) = self.invest_relation_input_capacity {
            storage = storage.invest_relation_input_capacity(ratio);
        }
        if let Some(ratio) = self.invest_relation_output_capacity {
            storage = storage.invest_relation_output_capacity(ratio);
        }
        storage.build()
    }
}

impl NodeInput {
    fn into_component(self, timeseries: &TimeSeries) -> Result<Component> {
        match self {
            Self::Bus { label, balanced } => Bus::new(label).balanced(balanced).build(),
            Self::Source { label, outputs } => {
                let mut source = Source::new(label.as_str());
                for output in outputs {
                    let (target, flow) = output.into_flow(&label, timeseries)?;
                    source = source.output(target, flow);
                }
                source.build()
            }
            Self::Sink { label, inputs } => {
                let mut sink = Sink::new(label.as_str());
                for input in inputs {
                    let (source, flow) = input.into_flow(&label, timeseries)?;
                    sink = sink.input(source, flow);
                }
                sink.build()
            }
            Self::Converter {
                label,
                inputs,
                outputs,
                conversion_factors,
            } => {
                let mut converter = Converter::new(label.as_str());
                for input in inputs {
                    let (source, flow) = input.into_flow(&label, timeseries)?;
                    converter = converter.input(source, flow);
                }
                for output in outputs {
                    let (target, flow) = output.into_flow(&label, timeseries)?;
                    converter = converter.output(target, flow);
                }
                for (node, factor) in &conversion_factors {
                    converter =
                        converter.conversion_factor(node.as_str(), factor.resolve(timeseries)?);
                }
                converter.build()
            }
            Self::OffsetConverter {
                label,
                inputs,
                outputs,
                coefficients,
            } => {
                let mut converter = OffsetConverter::new(label.as_str());
                for input in inputs {
                    let (source, flow) = input.into_flow(&label, timeseries)?;
                    converter = converter.input(source, flow);
                }
                for output in outputs {
                    let (target, flow) = output.into_flow(&label, timeseries)?;
                    converter = converter.output(target, flow);
                }
                for (node, coefficient) in &coefficients {
                    converter = converter.coefficients(
                        node.as_str(),
                        coefficient.slope.resolve(timeseries)?,
                        coefficient.offset.resolve(timeseries)?,
                    );
                }
                converter.build()
            }
            Self::Storage(storage) => storage.into_component(timeseries),
            Self::Link {
                label,
                inputs,
                outputs,
                conversion_factors,
            } => {
                let mut link = Link::new(label.as_str());
                for input in inputs {
                    let (source, flow) = input.into_flow(&label, timeseries)?;
                    link = link.input(source, flow);
                }
                for output in outputs {
                    let (target, flow) = output.into_flow(&label, timeseries)?;
                    link = link.output(target, flow);
                }
                for factor in &conversion_factors {
                    link = link.conversion_factor(
                        factor.from.as_str(),
                        factor.to.as_str(),
                        factor.factor.resolve(timeseries)?,
                    );
                }
                link.build()
            }
            Self::ExtractionTurbineChp {
                label,
                input,
                outputs,
                conversion_factors,
                full_condensation,
            } => {
                let (source, flow) = input.into_flow(&label, timeseries)?;
                let mut chp = ExtractionTurbineChp::new(label.as_str()).input(source, flow);
                for output in outputs {
                    let (target, flow) = output.into_flow(&label, timeseries)?;
                    chp = chp.output(target, flow);
                }
                for (node, factor) in &conversion_factors {
                    chp = chp.conversion_factor(node.as_str(), factor.resolve(timeseries)?);
                }
                chp.conversion_factor_full_condensation(
                    full_condensation.node.as_str(),
                    full_condensation.factor.resolve(timeseries)?,
                )
                .build()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelFile {
    time: TimeInput,
    #[serde(default)]
    periods: Vec<PeriodInput>,
    #[serde(default)]
    tsa: Vec<TsaInput>,
    #[serde(default)]
    use_remaining_value: bool,
    #[serde(default)]
    options: OptionsInput,
    nodes: Vec<NodeInput>,
}

/// An energy system loaded from disk together with the options to build its model
#[derive(Debug)]
pub struct LoadedModel {
    /// The energy system
    pub energy_system: EnergySystem,
    /// Options for building the model
    pub options: ModelOptions,
}

/// Load an energy system from a TOML model file.
///
/// # Arguments
///
/// * `model_path` - Path to the model file. A time series file is looked up relative to it.
pub fn load_model(model_path: &Path) -> Result<LoadedModel> {
    let file: ModelFile = read_toml(model_path)?;
    let timeseries = match &file.time.timeseries {
        Some(name) => {
            let dir = model_path.parent().unwrap_or(Path::new("."));
            read_timeseries(&dir.join(name))?
        }
        None => TimeSeries::new(),
    };

    let time = file.time;
    let mut es = if let Some(timeindex) = time.timeindex {
        EnergySystem::from_timeindex(timeindex, time.infer_last_interval)?
    } else if let Some(timeincrement) = time.timeincrement {
        EnergySystem::from_timeincrement(timeincrement)?
    } else {
        let steps = match time.steps {
            Some(steps) => steps,
            None => timeseries
                .values()
                .map(Vec::len)
                .max()
                .context("The time grid needs steps, timeincrement, timeindex or time series")?,
        };
        EnergySystem::with_uniform_steps(steps, time.hours)?
    };
    if !file.periods.is_empty() {
        let periods = file
            .periods
            .iter()
            .map(|period| Period::new(period.steps[0]..period.steps[1], period.years))
            .collect();
        es = es.with_periods(periods);
    }
    if !file.tsa.is_empty() {
        let tsa = file
            .tsa
            .into_iter()
            .map(|tsa| match tsa.occurrences {
                Some(occurrences) => TsaParameters::with_occurrences(
                    tsa.timesteps_per_period,
                    tsa.order,
                    occurrences,
                ),
                None => TsaParameters::new(tsa.timesteps_per_period, tsa.order),
            })
            .collect();
        es = es.with_tsa_parameters(tsa);
    }
    es = es.with_use_remaining_value(file.use_remaining_value);

    for node in file.nodes {
        es.add(node.into_component(&timeseries)?)?;
    }

    let options = ModelOptions {
        debug: file.options.debug,
        discount_rate: file.options.discount_rate,
        receive_duals: file.options.receive_duals,
        objective_weighting: file.options.objective_weighting,
        ..ModelOptions::default()
    };

    Ok(LoadedModel {
        energy_system: es,
        options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowKey;
    use crate::id::NodeLabel;
    use crate::node::NodeKind;
    use float_cmp::assert_approx_eq;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    const MODEL: &str = r#"
[time]
timeseries = "timeseries.csv"

[options]
receive_duals = true

[[nodes]]
type = "bus"
label = "el"

[[nodes]]
type = "source"
label = "pv"
outputs = [{ node = "el", fix = "pv", investment = { capex = 100.0, lifetime = 10, maximum = 20.0 } }]

[[nodes]]
type = "sink"
label = "demand"
inputs = [{ node = "el", nominal_capacity = 1.0, fix = [1.0, 2.0, 3.0] }]

[[nodes]]
type = "storage"
label = "battery"
nominal_capacity = 10.0
loss_rate = 0.01
input = { node = "el" }
output = { node = "el" }
"#;

    fn write_model(dir: &Path, model: &str) -> std::path::PathBuf {
        let path = dir.join("model.toml");
        fs::write(&path, model).unwrap();
        let mut file = File::create(dir.join("timeseries.csv")).unwrap();
        writeln!(file, "pv,price\n0.0,1.0\n0.5,2.0\n1.0,3.0").unwrap();
        path
    }

    #[test]
    fn timeseries() {
        let dir = tempdir().unwrap();
        write_model(dir.path(), MODEL);
        let columns = read_timeseries(&dir.path().join("timeseries.csv")).unwrap();
        assert_eq!(columns["price"], vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn loads_nodes_and_flows() {
        let dir = tempdir().unwrap();
        let path = write_model(dir.path(), MODEL);
        let loaded = load_model(&path).unwrap();
        let es = &loaded.energy_system;

        assert_eq!(es.num_timesteps(), 3);
        assert_eq!(es.nodes().count(), 4);
        assert!(loaded.options.receive_duals);

        let pv = es.flow(&FlowKey::new("pv", "el")).unwrap();
        let investment = pv.investment_record().unwrap();
        assert_approx_eq!(f64, investment.ep_costs.get(0), 10.0);
        assert!(es.flow(&FlowKey::new("battery", "el")).is_some());
    }

    #[test]
    fn unknown_column() {
        let dir = tempdir().unwrap();
        let path = write_model(dir.path(), &MODEL.replace("fix = \"pv\"", "fix = \"wind\""));
        let err = load_model(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Unknown time series column wind"));
    }

    #[test]
    fn loads_link_and_extraction_turbine() {
        let model = r#"
[time]
timeseries = "timeseries.csv"

[[nodes]]
type = "bus"
label = "el0"

[[nodes]]
type = "bus"
label = "el1"

[[nodes]]
type = "bus"
label = "heat"

[[nodes]]
type = "link"
label = "cable"
inputs = [{ node = "el0" }, { node = "el1" }]
outputs = [{ node = "el0" }, { node = "el1" }]
conversion_factors = [
    { from = "el0", to = "el1", factor = 0.9 },
    { from = "el1", to = "el0", factor = "price" },
]

[[nodes]]
type = "extraction_turbine_chp"
label = "chp"
input = { node = "el0", custom_properties = { emission_factor = 0.2 } }
outputs = [{ node = "el1" }, { node = "heat" }]
conversion_factors = { el1 = 0.4, heat = 0.5 }
full_condensation = { node = "el1", factor = 0.5 }
"#;
        let dir = tempdir().unwrap();
        let path = write_model(dir.path(), model);
        let es = load_model(&path).unwrap().energy_system;

        let cable = es.node("cable").unwrap();
        let NodeKind::Link { conversion_factors } = &cable.kind else {
            panic!("Wrong node kind");
        };
        let back = &conversion_factors[&(NodeLabel::new("el1"), NodeLabel::new("el0"))];
        assert_approx_eq!(f64, back.get(1), 2.0);

        let chp = es.node("chp").unwrap();
        assert_eq!(chp.kind.type_name(), "ExtractionTurbineCHP");
        let fuel = es.flow(&FlowKey::new("el0", "chp")).unwrap();
        assert_approx_eq!(f64, fuel.custom_properties["emission_factor"].get(0), 0.2);
    }

    #[test]
    fn capex_needs_lifetime() {
        let dir = tempdir().unwrap();
        let path = write_model(dir.path(), &MODEL.replace("lifetime = 10, ", ""));
        assert!(load_model(&path).is_err());
    }
}
