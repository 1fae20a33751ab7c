//! Shared identifier types used across the mixture, patterns and runtime.
//!
//! Every identifier is a thin newtype over an integer. Agent handles are
//! allocated by the mixture and never reused; type, site and state ids are
//! indices into the [`Signatures`](crate::signature::Signatures) tables.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable handle of a live agent in the mixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub u64);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of a declared agent type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentType(pub u32);

impl AgentType {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a site within its agent type's signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteId(pub u32);

impl SiteId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of an internal state within a site's declared domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateId(pub u32);

impl StateId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A concrete site in the mixture: an (agent, site) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub agent: AgentId,
    pub site: SiteId,
}

impl Location {
    pub fn new(agent: AgentId, site: SiteId) -> Self {
        Self { agent, site }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.agent, self.site.0)
    }
}

/// Simulated time.
pub type Time = f64;
