//! Nodes of the energy system graph: buses and components.
//!
//! Components are a tagged variant ([`NodeKind`]) rather than a type hierarchy. Each kind
//! declares the set of [`Capability`]s it implements; the flows attached to a node are owned by
//! the [`EnergySystem`](crate::energy_system::EnergySystem), not by the node itself.
use crate::components::StorageParams;
use crate::flow::{Flow, FlowKey};
use crate::id::NodeLabel;
use crate::sequence::Sequence;
use indexmap::IndexMap;
use strum::{Display, EnumIter, EnumString};

/// What a node can do with the commodities flowing through it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    /// Has outgoing flows
    Produces,
    /// Has incoming flows
    Consumes,
    /// Relates incoming and outgoing flows through conversion factors
    Converts,
    /// Carries a state between time steps
    Stores,
}

/// Parameters of an offset converter.
///
/// Every flow other than the reference flow follows
/// `flow[x] = slope[x]·flow[reference] + offset[x]·status[reference]`.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetParams {
    /// The flow carrying the status variable
    pub reference: FlowKey,
    /// Slope and offset for every other flow of the converter, keyed by the flow
    pub coefficients: IndexMap<FlowKey, (Sequence, Sequence)>,
}

/// Parameters of an extraction turbine CHP plant.
///
/// The fuel input is related to both outputs by
/// `fuel·η_full = main + tapped·(η_full - η_main)/η_tapped`, and the main output must be at
/// least `tapped·η_main/η_tapped` (the back-pressure line).
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionParams {
    /// The fuel input
    pub fuel: FlowKey,
    /// The output whose efficiency drops as heat is extracted
    pub main_output: FlowKey,
    /// The extracted output
    pub tapped_output: FlowKey,
    /// Efficiency of the main output at maximum extraction
    pub main_efficiency: Sequence,
    /// Efficiency of the tapped output at maximum extraction
    pub tapped_efficiency: Sequence,
    /// Efficiency of the main output without extraction
    pub full_condensation_efficiency: Sequence,
}

impl ExtractionParams {
    pub(crate) fn time_sequences(&self) -> [(&'static str, &Sequence); 3] {
        [
            ("main efficiency", &self.main_efficiency),
            ("tapped efficiency", &self.tapped_efficiency),
            (
                "full condensation efficiency",
                &self.full_condensation_efficiency,
            ),
        ]
    }
}

/// The concrete type of a node together with its type-specific parameters
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A commodity hub
    Bus {
        /// Whether inflows and outflows must balance in every time step
        balanced: bool,
    },
    /// A node with outputs only
    Source,
    /// A node with inputs only
    Sink,
    /// A linear converter between inputs and outputs
    Converter {
        /// Conversion factors keyed by the connected node (1 if unset)
        conversion_factors: IndexMap<NodeLabel, Sequence>,
    },
    /// A connection between buses with a loss factor per direction
    Link {
        /// Factors keyed by the (input, output) node pair they connect
        conversion_factors: IndexMap<(NodeLabel, NodeLabel), Sequence>,
    },
    /// A CHP plant with an extraction turbine
    ExtractionTurbineChp(Box<ExtractionParams>),
    /// A converter with an affine, status-dependent relation
    OffsetConverter(OffsetParams),
    /// A storage with one input and one output
    Storage(Box<StorageParams>),
    /// A node handled by a user-supplied constraint block
    Custom {
        /// Name of the constraint block responsible for the node
        constraint_group: String,
        /// Capabilities declared by the user
        capabilities: Vec<Capability>,
    },
}

impl NodeKind {
    /// The capability set implemented by this kind of node
    pub fn capabilities(&self) -> &[Capability] {
        use Capability::{Consumes, Converts, Produces, Stores};
        match self {
            Self::Bus { .. } => &[],
            Self::Source => &[Produces],
            Self::Sink => &[Consumes],
            Self::Converter { .. }
            | Self::OffsetConverter(_)
            | Self::Link { .. }
            | Self::ExtractionTurbineChp(_) => &[Consumes, Produces, Converts],
            Self::Storage(_) => &[Consumes, Produces, Stores],
            Self::Custom { capabilities, .. } => capabilities,
        }
    }

    /// A short name for the kind of node
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bus { .. } => "Bus",
            Self::Source => "Source",
            Self::Sink => "Sink",
            Self::Converter { .. } => "Converter",
            Self::OffsetConverter(_) => "OffsetConverter",
            Self::Link { .. } => "Link",
            Self::ExtractionTurbineChp(_) => "ExtractionTurbineCHP",
            Self::Storage(_) => "GenericStorage",
            Self::Custom { .. } => "Custom",
        }
    }
}

/// A node in the energy system graph
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Unique label of the node
    pub label: NodeLabel,
    /// Type and parameters
    pub kind: NodeKind,
    /// Labels of the nodes with a flow into this node
    pub inputs: Vec<NodeLabel>,
    /// Labels of the nodes this node has a flow into
    pub outputs: Vec<NodeLabel>,
}

impl Node {
    /// Whether the node implements the given capability
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.kind.capabilities().contains(&capability)
    }

    /// Whether the node is a bus
    pub fn is_bus(&self) -> bool {
        matches!(self.kind, NodeKind::Bus { .. })
    }

    /// The name of a user-supplied constraint block handling this node, if any
    pub fn constraint_group(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Custom {
                constraint_group, ..
            } => Some(constraint_group),
            _ => None,
        }
    }

    /// Keys of the flows entering the node
    pub fn input_keys(&self) -> impl Iterator<Item = FlowKey> + '_ {
        self.inputs
            .iter()
            .map(|source| FlowKey::new(source, &self.label))
    }

    /// Keys of the flows leaving the node
    pub fn output_keys(&self) -> impl Iterator<Item = FlowKey> + '_ {
        self.outputs
            .iter()
            .map(|target| FlowKey::new(&self.label, target))
    }

    /// The storage parameters, if the node is a storage
    pub fn storage(&self) -> Option<&StorageParams> {
        match &self.kind {
            NodeKind::Storage(params) => Some(params),
            _ => None,
        }
    }
}

/// A validated node together with the flows it declares.
///
/// This is what component builders produce and what is added to an energy system.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// The node itself
    pub node: Node,
    /// Flows declared by the node, both incoming and outgoing
    pub flows: Vec<(FlowKey, Flow)>,
}
