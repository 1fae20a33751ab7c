//! Matching a connected pattern component into the mixture.
//!
//! Each component gets one plan per possible root slot: a breadth-first
//! spanning tree over its bonds. A mixture site binds at most one partner,
//! so once the root is placed every tree edge has exactly one candidate and
//! the search never branches below the root. Enumerating embeddings is
//! therefore one forced extension per live agent of the root's type.

use crate::mixture::{Link, Mixture};
use crate::pattern::{AgentTemplate, ComponentPattern, LinkConstraint, Pattern, StateConstraint};
use crate::types::{AgentId, AgentType, Location, SiteId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// One match of a component: `agents()[slot]` is the image of local `slot`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Embedding(Box<[AgentId]>);

impl Embedding {
    pub fn new(agents: Vec<AgentId>) -> Self {
        Embedding(agents.into_boxed_slice())
    }

    pub fn agents(&self) -> &[AgentId] {
        &self.0
    }

    pub fn agent(&self, slot: usize) -> Option<AgentId> {
        self.0.get(slot).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, agent: AgentId) -> bool {
        self.0.contains(&agent)
    }
}

/// Reach `slot` from the already placed `from_slot` through its bond at
/// `from_site`; the partner must sit on `site`.
#[derive(Debug, Clone, Copy)]
struct Step {
    slot: usize,
    from_slot: usize,
    from_site: SiteId,
    site: SiteId,
}

#[derive(Debug, Clone)]
struct MatchPlan {
    steps: Vec<Step>,
}

/// Precompiled matcher for one [`ComponentPattern`].
#[derive(Debug, Clone)]
pub struct Matcher {
    pattern: ComponentPattern,
    plans: Vec<MatchPlan>,
    slots_by_type: HashMap<AgentType, Vec<usize>>,
}

impl Matcher {
    pub fn new(pattern: ComponentPattern) -> Self {
        let plans = (0..pattern.len()).map(|root| plan_from(&pattern, root)).collect();
        let mut slots_by_type: HashMap<AgentType, Vec<usize>> = HashMap::new();
        for (slot, template) in pattern.templates.iter().enumerate() {
            slots_by_type.entry(template.agent_type).or_default().push(slot);
        }
        Self {
            pattern,
            plans,
            slots_by_type,
        }
    }

    pub fn pattern(&self) -> &ComponentPattern {
        &self.pattern
    }

    pub fn len(&self) -> usize {
        self.pattern.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }

    /// Slots whose template has the given type.
    pub fn slots_of_type(&self, ty: AgentType) -> &[usize] {
        self.slots_by_type.get(&ty).map_or(&[], Vec::as_slice)
    }

    /// Slots of the given type whose template constrains `site`.
    pub fn slots_mentioning(&self, ty: AgentType, site: SiteId) -> impl Iterator<Item = usize> + '_ {
        self.slots_of_type(ty)
            .iter()
            .copied()
            .filter(move |&slot| self.pattern.templates[slot].mentions(site))
    }

    /// Sites the template of `slot` constrains.
    pub fn mentioned_sites(&self, slot: usize) -> impl Iterator<Item = SiteId> + '_ {
        self.pattern
            .templates
            .get(slot)
            .into_iter()
            .flat_map(|t| t.sites.iter().map(|c| c.site))
    }

    /// Every embedding of the component, in root-agent handle order.
    pub fn match_all(&self, mixture: &Mixture) -> Vec<Embedding> {
        let Some(root) = self.best_root(mixture) else {
            return Vec::new();
        };
        let ty = self.pattern.templates[root].agent_type;
        mixture
            .agents_of_type(ty)
            .filter_map(|agent| self.match_at(mixture, root, agent))
            .collect()
    }

    /// The embedding with `slot` mapped to `agent`, if there is one.
    pub fn match_at(&self, mixture: &Mixture, slot: usize, agent: AgentId) -> Option<Embedding> {
        let plan = self.plans.get(slot)?;
        let mut assignment: Vec<Option<AgentId>> = vec![None; self.pattern.len()];
        if !self.local_match(mixture, slot, agent) {
            return None;
        }
        assignment[slot] = Some(agent);

        for step in &plan.steps {
            let from = assignment[step.from_slot]?;
            let partner = mixture.partner(Location::new(from, step.from_site))?;
            if partner.site != step.site || assignment.contains(&Some(partner.agent)) {
                return None;
            }
            if !self.local_match(mixture, step.slot, partner.agent) {
                return None;
            }
            assignment[step.slot] = Some(partner.agent);
        }

        let agents: Vec<AgentId> = assignment.into_iter().collect::<Option<_>>()?;
        // Bonds outside the spanning tree.
        if !self.partners_match(mixture, &agents) {
            return None;
        }
        Some(Embedding::new(agents))
    }

    /// Re-validate an embedding against the current mixture.
    pub fn is_embedding(&self, mixture: &Mixture, embedding: &Embedding) -> bool {
        let agents = embedding.agents();
        if agents.len() != self.pattern.len() {
            return false;
        }
        for (i, agent) in agents.iter().enumerate() {
            if agents[..i].contains(agent) || !self.local_match(mixture, i, *agent) {
                return false;
            }
        }
        self.partners_match(mixture, agents)
    }

    /// Root at the slot with the fewest candidates, preferring the most
    /// specific template on ties.
    fn best_root(&self, mixture: &Mixture) -> Option<usize> {
        self.pattern
            .templates
            .iter()
            .enumerate()
            .min_by_key(|(slot, t)| {
                (mixture.count_of_type(t.agent_type), usize::MAX - t.specificity(), *slot)
            })
            .map(|(slot, _)| slot)
    }

    /// Type, state and link checks that need no other slot's image.
    fn local_match(&self, mixture: &Mixture, slot: usize, agent: AgentId) -> bool {
        let Some(template) = self.pattern.templates.get(slot) else {
            return false;
        };
        let Some(record) = mixture.agent(agent) else {
            return false;
        };
        record.agent_type == template.agent_type && template_accepts(mixture, template, &record.sites)
    }

    fn partners_match(&self, mixture: &Mixture, agents: &[AgentId]) -> bool {
        self.pattern.templates.iter().enumerate().all(|(slot, template)| {
            template.sites.iter().all(|c| match c.link {
                LinkConstraint::Partner { slot: other, site } => {
                    mixture.partner(Location::new(agents[slot], c.site))
                        == agents.get(other).map(|&a| Location::new(a, site))
                }
                _ => true,
            })
        })
    }
}

fn template_accepts(
    mixture: &Mixture,
    template: &AgentTemplate,
    sites: &[crate::mixture::SiteRecord],
) -> bool {
    template.sites.iter().all(|c| {
        let Some(record) = sites.get(c.site.index()) else {
            return false;
        };
        let state_ok = match c.state {
            StateConstraint::Any => true,
            StateConstraint::Unset => record.state.is_none(),
            StateConstraint::Exact(s) => record.state == Some(s),
        };
        state_ok
            && match (c.link, record.link) {
                (LinkConstraint::Any, _) => true,
                (LinkConstraint::Free, Link::Free) => true,
                (LinkConstraint::Bound, Link::Bound(_)) => true,
                (LinkConstraint::BoundTo { agent_type, site }, Link::Bound(p)) => {
                    p.site == site && mixture.agent_type(p.agent) == Some(agent_type)
                }
                (LinkConstraint::Partner { site, .. }, Link::Bound(p)) => p.site == site,
                _ => false,
            }
    })
}

fn plan_from(pattern: &ComponentPattern, root: usize) -> MatchPlan {
    let mut visited = vec![false; pattern.len()];
    let mut steps = Vec::with_capacity(pattern.len().saturating_sub(1));
    let mut queue = VecDeque::from([root]);
    visited[root] = true;
    while let Some(current) = queue.pop_front() {
        for c in &pattern.templates[current].sites {
            if let LinkConstraint::Partner { slot, site } = c.link {
                if !visited[slot] {
                    visited[slot] = true;
                    steps.push(Step {
                        slot,
                        from_slot: current,
                        from_site: c.site,
                        site,
                    });
                    queue.push_back(slot);
                }
            }
        }
    }
    MatchPlan { steps }
}

/// Full-rematch embedding count of a pattern: the product of its
/// components' counts (1 for a pattern without agents). Saturates at
/// `u64::MAX`.
pub fn count_embeddings(pattern: &Pattern, mixture: &Mixture) -> u64 {
    pattern
        .components()
        .iter()
        .try_fold(1u64, |acc, c| {
            acc.checked_mul(Matcher::new(c.pattern.clone()).match_all(mixture).len() as u64)
        })
        .unwrap_or(u64::MAX)
}
