//! Name-based, serialisable snapshots of a mixture.
//!
//! Snapshots spell out type, site and state names so that whoever reads
//! them (a session file, an external engine) needs no index tables.

use crate::error::{ConsistencyError, ModelError, Result};
use crate::mixture::{Agent, Link, Mixture, SiteRecord, UnbindPolicy};
use crate::signature::Signatures;
use crate::types::{AgentId, AgentType, Location};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSnapshot {
    pub agent: u64,
    pub site: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: u64,
    pub agent_type: String,
    pub sites: Vec<SiteSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixtureSnapshot {
    /// Handle counter; restored so handles are never reused.
    pub next_id: u64,
    pub agents: Vec<AgentSnapshot>,
}

impl MixtureSnapshot {
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn bond_count(&self) -> usize {
        let ends: usize = self
            .agents
            .iter()
            .map(|a| a.sites.iter().filter(|s| s.link.is_some()).count())
            .sum();
        ends / 2
    }
}

impl Mixture {
    pub fn snapshot(&self) -> MixtureSnapshot {
        let sigs = self.signatures();
        let agents = self
            .agents()
            .map(|agent| {
                let ty = agent.agent_type;
                let sites = agent
                    .sites
                    .iter()
                    .enumerate()
                    .map(|(i, record)| {
                        let site = crate::types::SiteId(i as u32);
                        SiteSnapshot {
                            name: sigs.site_name(ty, site).to_string(),
                            state: record.state.map(|s| sigs.state_name(ty, site, s).to_string()),
                            link: record.link.partner().map(|p| LinkSnapshot {
                                agent: p.agent.0,
                                site: self
                                    .agent_type(p.agent)
                                    .map(|pty| sigs.site_name(pty, p.site).to_string())
                                    .unwrap_or_default(),
                            }),
                        }
                    })
                    .collect();
                AgentSnapshot {
                    id: agent.id.0,
                    agent_type: sigs.type_name(ty).to_string(),
                    sites,
                }
            })
            .collect();
        MixtureSnapshot {
            next_id: self.next_id(),
            agents,
        }
    }

    /// Rebuild a mixture from a snapshot. Sites missing from an agent's
    /// snapshot are free and unset. The result is integrity-checked.
    pub fn from_snapshot(
        signatures: Arc<Signatures>,
        snapshot: &MixtureSnapshot,
        policy: UnbindPolicy,
    ) -> Result<Mixture> {
        let mut types: HashMap<u64, AgentType> = HashMap::with_capacity(snapshot.agents.len());
        let mut next_id = snapshot.next_id;
        for a in &snapshot.agents {
            let ty = signatures.agent_type(&a.agent_type)?;
            if types.insert(a.id, ty).is_some() {
                return Err(ModelError::Underspecified(format!("snapshot lists agent {} twice", a.id)).into());
            }
            let after = a.id.checked_add(1).ok_or_else(|| {
                ConsistencyError::Integrity(format!("agent handle {} leaves no room for new agents", a.id))
            })?;
            next_id = next_id.max(after);
        }

        let mut agents = Vec::with_capacity(snapshot.agents.len());
        for a in &snapshot.agents {
            let ty = types[&a.id];
            let mut sites = vec![SiteRecord::default(); signatures.site_count(ty)];
            for s in &a.sites {
                let site = signatures.site(ty, &s.name)?;
                let record = &mut sites[site.index()];
                if let Some(state) = &s.state {
                    record.state = Some(signatures.state(ty, site, state)?);
                }
                if let Some(link) = &s.link {
                    let partner_ty = types.get(&link.agent).copied().ok_or_else(|| {
                        ModelError::Underspecified(format!("snapshot links to missing agent {}", link.agent))
                    })?;
                    let partner_site = signatures.site(partner_ty, &link.site)?;
                    record.link = Link::Bound(Location::new(AgentId(link.agent), partner_site));
                }
            }
            agents.push(Agent {
                id: AgentId(a.id),
                agent_type: ty,
                sites,
            });
        }

        let mixture = Mixture::from_parts(signatures, agents, next_id, policy);
        mixture.check_integrity()?;
        Ok(mixture)
    }
}
