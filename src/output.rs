//! Writing results to CSV files.
use crate::results::Results;
use crate::variables::ResultKey;
use anyhow::{Context, Result, ensure};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// The root folder in which model-specific output folders are created
const OUTPUT_DIRECTORY_ROOT: &str = "ensys_results";

/// Time-indexed flow results in long format
const FLOWS_FILE_NAME: &str = "flows.csv";

/// Time-indexed node results (storage contents, bus duals) in long format
const NODE_SEQUENCES_FILE_NAME: &str = "node_sequences.csv";

/// Scalar decisions such as investments
const SCALARS_FILE_NAME: &str = "scalars.csv";

/// Cost breakdown per constraint block
const OBJECTIVE_FILE_NAME: &str = "objective.csv";

/// The default output directory for the model file at `model_path`
pub fn get_output_dir(model_path: &Path) -> Result<PathBuf> {
    let model_name = model_path
        .file_stem()
        .context("Model path has no file name")?
        .to_str()
        .context("Invalid chars in model file name")?;

    Ok([OUTPUT_DIRECTORY_ROOT, model_name].iter().collect())
}

/// Create the output directory.
///
/// An existing non-empty directory is only replaced if `overwrite` is set. Returns whether an
/// existing directory was replaced.
pub fn create_output_directory(output_dir: &Path, overwrite: bool) -> Result<bool> {
    let is_nonempty = output_dir.is_dir()
        && fs::read_dir(output_dir)
            .with_context(|| format!("Could not read {}", output_dir.display()))?
            .next()
            .is_some();
    if is_nonempty {
        ensure!(
            overwrite,
            "Output folder {} already exists and is not empty. Use --overwrite to replace it.",
            output_dir.display()
        );
        fs::remove_dir_all(output_dir)?;
    }
    fs::create_dir_all(output_dir)?;

    Ok(is_nonempty)
}

#[derive(Debug, Serialize, PartialEq)]
struct FlowRow<'a> {
    source: &'a str,
    target: &'a str,
    variable: &'a str,
    step: usize,
    value: f64,
}

#[derive(Debug, Serialize, PartialEq)]
struct NodeRow<'a> {
    node: &'a str,
    variable: &'a str,
    step: usize,
    value: f64,
}

#[derive(Debug, Serialize, PartialEq)]
struct ScalarRow<'a> {
    owner: String,
    variable: &'a str,
    period: usize,
    value: f64,
}

#[derive(Debug, Serialize, PartialEq)]
struct ObjectiveRow<'a> {
    block: &'a str,
    cost: f64,
}

/// Write all results into `output_dir`.
///
/// Padding values of time-indexed columns (`NaN`) are left out.
pub fn write_results(output_dir: &Path, results: &Results) -> Result<()> {
    let writer = |file_name: &str| {
        let path = output_dir.join(file_name);
        csv::Writer::from_path(&path)
            .with_context(|| format!("Could not create {}", path.display()))
    };
    let mut flows = writer(FLOWS_FILE_NAME)?;
    let mut node_sequences = writer(NODE_SEQUENCES_FILE_NAME)?;
    let mut scalars = writer(SCALARS_FILE_NAME)?;
    let mut objective = writer(OBJECTIVE_FILE_NAME)?;

    for (key, entity) in results.iter() {
        for (variable, values) in entity.sequences.columns() {
            let values = values.iter().enumerate().filter(|(_, value)| !value.is_nan());
            for (step, value) in values {
                match key {
                    ResultKey::Edge(flow) => flows.serialize(FlowRow {
                        source: flow.source.as_str(),
                        target: flow.target.as_str(),
                        variable,
                        step,
                        value: *value,
                    })?,
                    ResultKey::Node(label) => node_sequences.serialize(NodeRow {
                        node: label.as_str(),
                        variable,
                        step,
                        value: *value,
                    })?,
                }
            }
        }

        let single = entity
            .scalars
            .iter()
            .map(|(variable, value)| (variable, 0, *value));
        let per_period = entity.period_scalars.iter().flat_map(|(variable, values)| {
            values
                .iter()
                .enumerate()
                .map(move |(period, value)| (variable, period, *value))
        });
        for (variable, period, value) in single.chain(per_period) {
            scalars.serialize(ScalarRow {
                owner: key.to_string(),
                variable,
                period,
                value,
            })?;
        }
    }

    for (block, cost) in &results.meta.objective_breakdown {
        objective.serialize(ObjectiveRow { block, cost: *cost })?;
    }
    objective.serialize(ObjectiveRow {
        block: "total",
        cost: results.meta.objective,
    })?;

    for mut file in [flows, node_sequences, scalars, objective] {
        file.flush()?;
    }

    Ok(())
}
