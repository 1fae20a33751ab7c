//! Error types for site-graph simulation.
//!
//! Errors are grouped by who is at fault:
//!
//! - [`ModelError`]: malformed signatures, patterns, rules or expressions.
//!   Raised at registration time; a simulation with a model error never starts.
//! - [`MixtureError`]: a single mixture operation was refused.
//! - [`RuntimeError`]: the run reached a state it cannot continue from.
//! - [`ConsistencyError`]: the engine's own bookkeeping disagrees with the
//!   mixture. Always fatal.
//!
//! Quiescence (no rule can fire) is not an error and has no variant here.

use crate::types::{AgentId, AgentType, Location, SiteId, StateId};
use thiserror::Error;

/// Result type for site-graph operations.
pub type Result<T> = std::result::Result<T, SimError>;

/// Top-level error.
#[derive(Debug, Clone, Error)]
pub enum SimError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
    #[error("Mixture error: {0}")]
    Mixture(#[from] MixtureError),
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("Internal consistency error: {0}")]
    Consistency(#[from] ConsistencyError),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for SimError {
    fn from(e: std::io::Error) -> Self {
        SimError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for SimError {
    fn from(e: serde_json::Error) -> Self {
        SimError::Serialization(e.to_string())
    }
}

/// Malformed model input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Unknown agent type: {0}")]
    UnknownAgentType(String),
    #[error("Agent type {agent} has no site named {site}")]
    UnknownSite { agent: String, site: String },
    #[error("Site {agent}.{site} has no state named {state}")]
    UnknownState {
        agent: String,
        site: String,
        state: String,
    },
    #[error("Agent type declared twice: {0}")]
    DuplicateAgentType(String),
    #[error("Site {site} appears twice on {agent}")]
    DuplicateSite { agent: String, site: String },
    #[error("State {state} declared twice on {agent}.{site}")]
    DuplicateState {
        agent: String,
        site: String,
        state: String,
    },
    #[error("Binding label {0} is referenced by only one site")]
    DanglingLabel(u32),
    #[error("Binding label {0} is referenced by more than two sites")]
    OverusedLabel(u32),
    #[error("Pattern cannot be instantiated: {0}")]
    Underspecified(String),
    #[error("Rule {rule}: left-hand side has {lhs} slots but right-hand side has {rhs}")]
    SlotMismatch { rule: String, lhs: usize, rhs: usize },
    #[error("Rule {rule}: {reason}")]
    InvalidRule { rule: String, reason: String },
    #[error("Rule {rule}: invalid rate ({reason})")]
    InvalidRate { rule: String, reason: String },
    #[error("Undefined variable: {0}")]
    UnknownVariable(String),
    #[error("Undefined observable: {0}")]
    UnknownObservable(String),
    #[error("Name already registered: {0}")]
    DuplicateName(String),
}

/// A mixture operation that was refused. The mixture is unchanged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MixtureError {
    #[error("Agent not found: {0}")]
    NotFound(AgentId),
    #[error("Unknown agent type index {0:?}")]
    UnknownAgentType(AgentType),
    #[error("Agent {agent} has no site {site:?}")]
    InvalidSite { agent: AgentId, site: SiteId },
    #[error("State {state:?} is outside the domain of site {location}")]
    InvalidState { location: Location, state: StateId },
    #[error("Site {0} is already bound")]
    AlreadyBound(Location),
    #[error("Site {0} cannot bind to itself")]
    SelfBinding(Location),
    #[error("Site {0} is not bound")]
    NotBound(Location),
}

/// The run cannot continue.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("Sampled from an empty embedding index (component {0})")]
    EmptyIndex(usize),
    #[error("Rule {rule} has activity {value}, which is negative or not finite")]
    InvalidActivity { rule: String, value: f64 },
    #[error("Unknown rule index {0}")]
    UnknownRule(usize),
    #[error("Simulation was aborted after an internal consistency error")]
    Aborted,
    #[error("Backend {backend} failed: {reason}")]
    Backend { backend: String, reason: String },
}

/// Engine bookkeeping disagrees with the mixture.
#[derive(Debug, Clone, Error)]
pub enum ConsistencyError {
    #[error("Embedding index for component {component} holds {stored} embeddings, full rematch finds {expected}")]
    IndexMismatch {
        component: usize,
        stored: usize,
        expected: usize,
    },
    #[error("Mixture integrity violated: {0}")]
    Integrity(String),
    #[error("Rule {rule} failed against a sampled embedding: {source}")]
    RuleApplication {
        rule: String,
        source: MixtureError,
        /// JSON state dump taken before the failing event.
        dump: String,
    },
}

// Convenience constructors
impl ModelError {
    pub fn unknown_site(agent: impl Into<String>, site: impl Into<String>) -> Self {
        ModelError::UnknownSite {
            agent: agent.into(),
            site: site.into(),
        }
    }

    pub fn invalid_rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        ModelError::InvalidRule {
            rule: rule.into(),
            reason: reason.into(),
        }
    }
}

impl SimError {
    /// Whether this error is fatal for the whole run rather than for one call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SimError::Consistency(_) | SimError::Runtime(RuntimeError::Aborted)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_errors_convert_into_sim_error() {
        let err: SimError = ModelError::DanglingLabel(3).into();
        assert!(matches!(err, SimError::Model(ModelError::DanglingLabel(3))));
        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "Model error: Binding label 3 is referenced by only one site"
        );
    }

    #[test]
    fn consistency_errors_are_fatal() {
        let err: SimError = ConsistencyError::Integrity("asymmetric bond".into()).into();
        assert!(err.is_fatal());
    }
}
