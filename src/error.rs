//! Error categories raised while describing, building, solving and inspecting a model.
//!
//! Library functions return [`anyhow::Result`]; errors that callers may want to react to are
//! raised as a [`ModelError`] so they can be recovered with [`anyhow::Error::downcast_ref`].
use crate::solver::TerminationCondition;
use thiserror::Error;

/// Categorised errors for the energy system model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// An entity was given an invalid or incompatible set of parameters
    #[error("Invalid configuration for {entity}: {message}")]
    Configuration {
        /// Label of the offending entity (node label or flow pair)
        entity: String,
        /// Description of the problem
        message: String,
    },
    /// The energy system cannot be turned into an optimisation problem
    #[error("Cannot construct model: {message}")]
    Construction {
        /// Description of the problem
        message: String,
    },
    /// The solver finished without proving optimality
    #[error("Solver terminated with status {status}")]
    NonOptimal {
        /// The reported termination condition
        status: TerminationCondition,
    },
    /// The requested solver backend is not available
    #[error("Solver {0} is not available")]
    SolverUnavailable(String),
    /// A result was requested for an entity which is not part of the model
    #[error("No results for {key}")]
    MissingResult {
        /// String representation of the requested key
        key: String,
    },
    /// Period scalars were requested from a single-period model
    #[error("Period scalars are only available for multi-period models")]
    NotMultiPeriod,
}

impl ModelError {
    /// Create a new [`ModelError::Configuration`]
    pub fn configuration(entity: impl ToString, message: impl Into<String>) -> Self {
        Self::Configuration {
            entity: entity.to_string(),
            message: message.into(),
        }
    }

    /// Create a new [`ModelError::Construction`]
    pub fn construction(message: impl Into<String>) -> Self {
        Self::Construction {
            message: message.into(),
        }
    }
}

/// Return early with a [`ModelError::Configuration`] for the given entity
macro_rules! config_bail {
    ($entity:expr, $($arg:tt)*) => {
        return Err($crate::error::ModelError::configuration($entity, format!($($arg)*)).into())
    };
}
pub(crate) use config_bail;

/// Return early with a [`ModelError::Construction`]
macro_rules! construction_bail {
    ($($arg:tt)*) => {
        return Err($crate::error::ModelError::construction(format!($($arg)*)).into())
    };
}
pub(crate) use construction_bail;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_message() {
        let err = ModelError::configuration("pp", "negative capacity");
        assert_eq!(
            err.to_string(),
            "Invalid configuration for pp: negative capacity"
        );
    }

    #[test]
    fn downcast_through_anyhow() {
        let err: anyhow::Error = ModelError::NotMultiPeriod.into();
        assert_eq!(
            err.downcast_ref::<ModelError>(),
            Some(&ModelError::NotMultiPeriod)
        );
    }
}
