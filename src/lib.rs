//! Compile energy system graphs of buses, components and flows into linear and mixed-integer
//! optimisation problems, solve them and lift the solution back onto the graph.
#![warn(missing_docs)]
pub mod blocks;
pub mod cli;
pub mod components;
pub mod constraints;
pub mod energy_system;
pub mod error;
pub mod finance;
pub mod flow;
pub mod groupings;
pub mod id;
pub mod input;
pub mod log;
pub mod model;
pub mod node;
pub mod options;
pub mod output;
pub mod program;
pub mod results;
pub mod sequence;
pub mod settings;
pub mod solver;
pub mod variables;
pub mod views;

#[cfg(test)]
mod fixture;
