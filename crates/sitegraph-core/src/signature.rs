//! Agent signatures: the declared vocabulary of a model.
//!
//! A signature fixes, for one agent type, the ordered list of its sites and
//! the finite domain of internal states each site may hold. Everything else
//! in the crate refers to types, sites and states by index into these tables.

use crate::error::ModelError;
use crate::types::{AgentType, SiteId, StateId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declared site: a name and its internal state domain (possibly empty).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSignature {
    pub name: String,
    pub states: Vec<String>,
}

/// Declared agent type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSignature {
    pub name: String,
    pub sites: Vec<SiteSignature>,
}

impl AgentSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sites: Vec::new(),
        }
    }

    /// Add a site without internal states.
    pub fn site(self, name: impl Into<String>) -> Self {
        self.site_with_states(name, &[])
    }

    /// Add a site with the given internal state domain.
    pub fn site_with_states(mut self, name: impl Into<String>, states: &[&str]) -> Self {
        self.sites.push(SiteSignature {
            name: name.into(),
            states: states.iter().map(|s| s.to_string()).collect(),
        });
        self
    }
}

/// The set of declared agent types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<AgentSignature>", into = "Vec<AgentSignature>")]
pub struct Signatures {
    agents: Vec<AgentSignature>,
    by_name: HashMap<String, AgentType>,
}

impl Signatures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an agent type.
    pub fn add(&mut self, signature: AgentSignature) -> Result<AgentType, ModelError> {
        if self.by_name.contains_key(&signature.name) {
            return Err(ModelError::DuplicateAgentType(signature.name));
        }
        for (i, site) in signature.sites.iter().enumerate() {
            if signature.sites[..i].iter().any(|s| s.name == site.name) {
                return Err(ModelError::DuplicateSite {
                    agent: signature.name.clone(),
                    site: site.name.clone(),
                });
            }
            for (j, state) in site.states.iter().enumerate() {
                if site.states[..j].contains(state) {
                    return Err(ModelError::DuplicateState {
                        agent: signature.name.clone(),
                        site: site.name.clone(),
                        state: state.clone(),
                    });
                }
            }
        }

        let ty = AgentType(self.agents.len() as u32);
        self.by_name.insert(signature.name.clone(), ty);
        self.agents.push(signature);
        Ok(ty)
    }

    /// Builder-style variant of [`add`](Self::add).
    pub fn with(mut self, signature: AgentSignature) -> Result<Self, ModelError> {
        self.add(signature)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn get(&self, ty: AgentType) -> Option<&AgentSignature> {
        self.agents.get(ty.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (AgentType, &AgentSignature)> {
        self.agents
            .iter()
            .enumerate()
            .map(|(i, sig)| (AgentType(i as u32), sig))
    }

    /// Look up an agent type by name.
    pub fn agent_type(&self, name: &str) -> Result<AgentType, ModelError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| ModelError::UnknownAgentType(name.to_string()))
    }

    /// Look up a site of an agent type by name.
    pub fn site(&self, ty: AgentType, name: &str) -> Result<SiteId, ModelError> {
        let sig = self
            .get(ty)
            .ok_or_else(|| ModelError::UnknownAgentType(format!("{:?}", ty)))?;
        sig.sites
            .iter()
            .position(|s| s.name == name)
            .map(|i| SiteId(i as u32))
            .ok_or_else(|| ModelError::unknown_site(&sig.name, name))
    }

    /// Look up an internal state of a site by name.
    pub fn state(&self, ty: AgentType, site: SiteId, name: &str) -> Result<StateId, ModelError> {
        let sig = self
            .get(ty)
            .ok_or_else(|| ModelError::UnknownAgentType(format!("{:?}", ty)))?;
        let site_sig = sig
            .sites
            .get(site.index())
            .ok_or_else(|| ModelError::unknown_site(&sig.name, format!("{:?}", site)))?;
        site_sig
            .states
            .iter()
            .position(|s| s == name)
            .map(|i| StateId(i as u32))
            .ok_or_else(|| ModelError::UnknownState {
                agent: sig.name.clone(),
                site: site_sig.name.clone(),
                state: name.to_string(),
            })
    }

    /// Number of sites of an agent type (0 for unknown types).
    pub fn site_count(&self, ty: AgentType) -> usize {
        self.get(ty).map_or(0, |sig| sig.sites.len())
    }

    /// Whether `state` lies inside the declared domain of `site`.
    pub fn in_domain(&self, ty: AgentType, site: SiteId, state: StateId) -> bool {
        self.get(ty)
            .and_then(|sig| sig.sites.get(site.index()))
            .map_or(false, |s| state.index() < s.states.len())
    }

    pub fn type_name(&self, ty: AgentType) -> &str {
        self.get(ty).map_or("?", |sig| sig.name.as_str())
    }

    pub fn site_name(&self, ty: AgentType, site: SiteId) -> &str {
        self.get(ty)
            .and_then(|sig| sig.sites.get(site.index()))
            .map_or("?", |s| s.name.as_str())
    }

    pub fn state_name(&self, ty: AgentType, site: SiteId, state: StateId) -> &str {
        self.get(ty)
            .and_then(|sig| sig.sites.get(site.index()))
            .and_then(|s| s.states.get(state.index()))
            .map_or("?", |s| s.as_str())
    }
}

impl TryFrom<Vec<AgentSignature>> for Signatures {
    type Error = ModelError;

    fn try_from(agents: Vec<AgentSignature>) -> Result<Self, Self::Error> {
        let mut signatures = Signatures::new();
        for sig in agents {
            signatures.add(sig)?;
        }
        Ok(signatures)
    }
}

impl From<Signatures> for Vec<AgentSignature> {
    fn from(signatures: Signatures) -> Self {
        signatures.agents
    }
}
