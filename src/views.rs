//! Convenience views on [`Results`]: everything about one node, node filters and storage flows.
use crate::error::ModelError;
use crate::id::NodeLabel;
use crate::node::Capability;
use crate::results::{EntityResults, Results};
use crate::variables::ResultKey;
use anyhow::{Context, Result, ensure};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use strum::{Display, EnumIter, EnumString};

/// Which nodes [`filter_nodes`] keeps, judged by the flows in the results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum NodeOption {
    /// Every node
    All,
    /// Nodes with at least one outgoing flow
    HasOutputs,
    /// Nodes with at least one incoming flow
    HasInputs,
    /// Nodes with outgoing but no incoming flows
    HasOnlyOutputs,
    /// Nodes with incoming but no outgoing flows
    HasOnlyInputs,
}

/// All results involving the node `label`: its own entry and every flow from or to it
pub fn node<'r>(
    results: &'r Results,
    label: &str,
) -> Result<IndexMap<&'r ResultKey, &'r EntityResults>> {
    let entries: IndexMap<_, _> = results
        .iter()
        .filter(|(key, _)| key.involves(label))
        .collect();
    if entries.is_empty() {
        return Err(ModelError::MissingResult {
            key: label.to_string(),
        }
        .into());
    }
    Ok(entries)
}

/// Labels of the nodes matching `option`, in registry order
pub fn filter_nodes(results: &Results, option: NodeOption, exclude_busses: bool) -> Vec<NodeLabel> {
    let (sources, targets): (IndexSet<_>, IndexSet<_>) = results
        .keys()
        .filter_map(|key| match key {
            ResultKey::Edge(flow) => Some((&flow.source, &flow.target)),
            ResultKey::Node(_) => None,
        })
        .unzip();

    results
        .nodes()
        .iter()
        .filter(|(_, info)| !exclude_busses || info.type_name != "Bus")
        .map(|(label, _)| label)
        .filter(|label| {
            let (output, input) = (sources.contains(label), targets.contains(label));
            match option {
                NodeOption::All => true,
                NodeOption::HasOutputs => output,
                NodeOption::HasInputs => input,
                NodeOption::HasOnlyOutputs => output && !input,
                NodeOption::HasOnlyInputs => input && !output,
            }
        })
        .cloned()
        .collect()
}

/// Labels of the nodes implementing `capability`
pub fn nodes_by_capability(results: &Results, capability: Capability) -> Vec<NodeLabel> {
    results
        .nodes()
        .iter()
        .filter(|(_, info)| info.capabilities.contains(&capability))
        .map(|(label, _)| label.clone())
        .collect()
}

/// Labels of the nodes of the given type, e.g. `"GenericStorage"`
pub fn nodes_by_type(results: &Results, type_name: &str) -> Vec<NodeLabel> {
    results
        .nodes()
        .iter()
        .filter(|(_, info)| info.type_name == type_name)
        .map(|(label, _)| label.clone())
        .collect()
}

/// Outflow minus inflow of a storage at every timepoint
pub fn net_storage_flow(results: &Results, label: &str) -> Result<Vec<f64>> {
    let info = results
        .nodes()
        .get(label)
        .with_context(|| format!("Unknown node {label}"))?;
    ensure!(
        info.capabilities.contains(&Capability::Stores),
        "{label} is not a storage"
    );

    let flow_of = |key: &ResultKey| -> Result<&[f64]> {
        results
            .get(key)?
            .sequences
            .column("flow")
            .with_context(|| format!("No flow values for {key}"))
    };
    let mut inflow = None;
    let mut outflow = None;
    for key in results.keys() {
        if let ResultKey::Edge(flow) = key {
            if flow.target.as_str() == label {
                inflow = Some(flow_of(key)?);
            } else if flow.source.as_str() == label {
                outflow = Some(flow_of(key)?);
            }
        }
    }
    let inflow = inflow.with_context(|| format!("{label} has no inflow"))?;
    let outflow = outflow.with_context(|| format!("{label} has no outflow"))?;
    Ok(outflow.iter().zip(inflow).map(|(out, inp)| out - inp).collect())
}

/// Result keys as string pairs, with `"None"` standing in for the missing half of node keys
pub fn string_keys(results: &Results) -> IndexMap<(String, String), &EntityResults> {
    results
        .iter()
        .map(|(key, entity)| {
            let pair = match key {
                ResultKey::Edge(flow) => (flow.source.to_string(), flow.target.to_string()),
                ResultKey::Node(label) => (label.to_string(), "None".to_string()),
            };
            (pair, entity)
        })
        .collect()
}

/// Labels of all nodes in the results, sorted
pub fn node_labels(results: &Results) -> Vec<NodeLabel> {
    results.nodes().keys().cloned().sorted().collect()
}
