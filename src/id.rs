//! Labels of nodes in the energy system
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::rc::Rc;

/// The unique label of a bus or component
#[derive(
    Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeLabel(pub Rc<str>);

impl NodeLabel {
    /// Create a new label from a string slice
    pub fn new(label: &str) -> Self {
        Self(Rc::from(label))
    }

    /// The label as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NodeLabel {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeLabel {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl From<String> for NodeLabel {
    fn from(label: String) -> Self {
        Self(Rc::from(label))
    }
}

impl From<&NodeLabel> for NodeLabel {
    fn from(label: &NodeLabel) -> Self {
        label.clone()
    }
}
