//! Mixture: the mutable population of agents and their bonds.
//!
//! Agents live in an arena keyed by [`AgentId`]; a bond is stored on both of
//! its endpoints as the partner's [`Location`], never as an owning reference.
//! Every mutation either succeeds completely and reports a [`Delta`] naming
//! exactly what it touched, or fails and leaves the mixture unchanged.

use crate::error::{ConsistencyError, MixtureError, ModelError, Result};
use crate::pattern::{LinkConstraint, Pattern, StateConstraint};
use crate::signature::Signatures;
use crate::types::{AgentId, AgentType, Location, SiteId, StateId};
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// Binding status of a concrete site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Link {
    Free,
    Bound(Location),
}

impl Link {
    pub fn partner(self) -> Option<Location> {
        match self {
            Link::Free => None,
            Link::Bound(loc) => Some(loc),
        }
    }
}

/// State and binding of one site of a live agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRecord {
    /// `None` while the internal state is unset.
    pub state: Option<StateId>,
    pub link: Link,
}

impl Default for SiteRecord {
    fn default() -> Self {
        Self {
            state: None,
            link: Link::Free,
        }
    }
}

/// A live agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub agent_type: AgentType,
    pub sites: Vec<SiteRecord>,
}

impl Agent {
    pub fn site(&self, site: SiteId) -> Option<&SiteRecord> {
        self.sites.get(site.index())
    }

    /// Locations this agent is bonded to, in site order.
    pub fn neighbors(&self) -> impl Iterator<Item = Location> + '_ {
        self.sites.iter().filter_map(|s| s.link.partner())
    }
}

/// What `unbind` does with a site that is already free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnbindPolicy {
    /// No-op with an empty delta.
    #[default]
    Lenient,
    /// Fails with [`MixtureError::NotBound`].
    Strict,
}

/// The exact footprint of one or more mixture mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Delta {
    /// Sites whose state or binding changed. May name agents removed later
    /// in the same merged delta.
    pub sites: BTreeSet<Location>,
    pub created: BTreeSet<AgentId>,
    pub removed: BTreeSet<AgentId>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty() && self.created.is_empty() && self.removed.is_empty()
    }

    pub fn merge(&mut self, other: Delta) {
        self.sites.extend(other.sites);
        self.created.extend(other.created);
        self.removed.extend(other.removed);
    }

    fn touch(mut self, loc: Location) -> Self {
        self.sites.insert(loc);
        self
    }
}

/// The agent graph.
#[derive(Debug, Clone)]
pub struct Mixture {
    signatures: Arc<Signatures>,
    agents: BTreeMap<AgentId, Agent>,
    by_type: Vec<BTreeSet<AgentId>>,
    next_id: u64,
    bonds: usize,
    policy: UnbindPolicy,
}

impl Mixture {
    pub fn new(signatures: Arc<Signatures>) -> Self {
        let types = signatures.len();
        Self {
            signatures,
            agents: BTreeMap::new(),
            by_type: vec![BTreeSet::new(); types],
            next_id: 0,
            bonds: 0,
            policy: UnbindPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: UnbindPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn signatures(&self) -> &Arc<Signatures> {
        &self.signatures
    }

    pub fn policy(&self) -> UnbindPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: UnbindPolicy) {
        self.policy = policy;
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn bond_count(&self) -> usize {
        self.bonds
    }

    /// The handle the next created agent will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.agents.contains_key(&id)
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    pub fn agent_type(&self, id: AgentId) -> Option<AgentType> {
        self.agents.get(&id).map(|a| a.agent_type)
    }

    /// Live agents in handle order.
    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    /// Live agents of one type, in handle order.
    pub fn agents_of_type(&self, ty: AgentType) -> impl Iterator<Item = AgentId> + '_ {
        self.by_type
            .get(ty.index())
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub fn count_of_type(&self, ty: AgentType) -> usize {
        self.by_type.get(ty.index()).map_or(0, BTreeSet::len)
    }

    pub fn site(&self, loc: Location) -> std::result::Result<&SiteRecord, MixtureError> {
        let agent = self
            .agents
            .get(&loc.agent)
            .ok_or(MixtureError::NotFound(loc.agent))?;
        agent.site(loc.site).ok_or(MixtureError::InvalidSite {
            agent: loc.agent,
            site: loc.site,
        })
    }

    pub fn partner(&self, loc: Location) -> Option<Location> {
        self.site(loc).ok().and_then(|s| s.link.partner())
    }

    pub fn state(&self, loc: Location) -> Option<StateId> {
        self.site(loc).ok().and_then(|s| s.state)
    }

    // ── Mutations ────────────────────────────────────────────────────────

    /// Create an agent with every site free and every state unset.
    pub fn create_agent(
        &mut self,
        ty: AgentType,
    ) -> std::result::Result<(AgentId, Delta), MixtureError> {
        let sites = self
            .signatures
            .get(ty)
            .ok_or(MixtureError::UnknownAgentType(ty))?
            .sites
            .len();
        let id = AgentId(self.next_id);
        self.next_id += 1;
        self.agents.insert(
            id,
            Agent {
                id,
                agent_type: ty,
                sites: vec![SiteRecord::default(); sites],
            },
        );
        self.by_type[ty.index()].insert(id);

        let mut delta = Delta::default();
        delta.created.insert(id);
        Ok((id, delta))
    }

    /// Remove an agent, severing its bonds. Former partners are touched.
    pub fn remove_agent(&mut self, id: AgentId) -> std::result::Result<Delta, MixtureError> {
        let agent = self.agents.remove(&id).ok_or(MixtureError::NotFound(id))?;
        self.by_type[agent.agent_type.index()].remove(&id);

        let mut delta = Delta::default();
        delta.removed.insert(id);
        let mut intra_ends = 0;
        for partner in agent.neighbors() {
            if partner.agent == id {
                intra_ends += 1;
            } else if let Some(record) = self.site_mut(partner) {
                record.link = Link::Free;
                self.bonds -= 1;
                delta.sites.insert(partner);
            }
        }
        self.bonds -= intra_ends / 2;
        Ok(delta)
    }

    /// Set the internal state of a site. Setting the current value is a
    /// no-op with an empty delta.
    pub fn set_site_state(
        &mut self,
        id: AgentId,
        site: SiteId,
        state: StateId,
    ) -> std::result::Result<Delta, MixtureError> {
        let loc = Location::new(id, site);
        let ty = self.agents.get(&id).ok_or(MixtureError::NotFound(id))?.agent_type;
        if site.index() >= self.signatures.site_count(ty) {
            return Err(MixtureError::InvalidSite { agent: id, site });
        }
        if !self.signatures.in_domain(ty, site, state) {
            return Err(MixtureError::InvalidState {
                location: loc,
                state,
            });
        }
        let record = self
            .site_mut(loc)
            .ok_or(MixtureError::InvalidSite { agent: id, site })?;
        if record.state == Some(state) {
            return Ok(Delta::default());
        }
        record.state = Some(state);
        Ok(Delta::default().touch(loc))
    }

    /// Bond two free sites. The sites may belong to the same agent but may
    /// not be the same site.
    pub fn bind(
        &mut self,
        a: AgentId,
        site_a: SiteId,
        b: AgentId,
        site_b: SiteId,
    ) -> std::result::Result<Delta, MixtureError> {
        let la = Location::new(a, site_a);
        let lb = Location::new(b, site_b);
        if la == lb {
            // Report a missing agent or site before the self-binding.
            self.site(la)?;
            return Err(MixtureError::SelfBinding(la));
        }
        if self.site(la)?.link != Link::Free {
            return Err(MixtureError::AlreadyBound(la));
        }
        if self.site(lb)?.link != Link::Free {
            return Err(MixtureError::AlreadyBound(lb));
        }

        if let Some(record) = self.site_mut(la) {
            record.link = Link::Bound(lb);
        }
        if let Some(record) = self.site_mut(lb) {
            record.link = Link::Bound(la);
        }
        self.bonds += 1;
        Ok(Delta::default().touch(la).touch(lb))
    }

    /// Break the bond at a site; both ends are touched. On a free site the
    /// result depends on the [`UnbindPolicy`].
    pub fn unbind(&mut self, id: AgentId, site: SiteId) -> std::result::Result<Delta, MixtureError> {
        let loc = Location::new(id, site);
        let partner = match self.site(loc)?.link {
            Link::Bound(partner) => partner,
            Link::Free => {
                return match self.policy {
                    UnbindPolicy::Lenient => Ok(Delta::default()),
                    UnbindPolicy::Strict => Err(MixtureError::NotBound(loc)),
                }
            }
        };

        if let Some(record) = self.site_mut(loc) {
            record.link = Link::Free;
        }
        if let Some(record) = self.site_mut(partner) {
            record.link = Link::Free;
        }
        self.bonds -= 1;
        Ok(Delta::default().touch(loc).touch(partner))
    }

    /// Create one agent per slot of a fully specified pattern, set its exact
    /// states and realise its labelled bonds. Slot order is kept in the
    /// returned handles. Nothing is mutated if the pattern is rejected.
    pub fn instantiate(&mut self, pattern: &Pattern) -> Result<(Vec<AgentId>, Delta)> {
        pattern.check_instantiable()?;
        for template in pattern.slots().iter().flatten() {
            if self.signatures.get(template.agent_type).is_none() {
                return Err(ModelError::UnknownAgentType(format!("{:?}", template.agent_type)).into());
            }
        }

        let mut delta = Delta::default();
        let mut ids = Vec::with_capacity(pattern.len());
        for template in pattern.slots().iter().flatten() {
            let (id, d) = self.create_agent(template.agent_type)?;
            delta.merge(d);
            ids.push(id);
        }
        for (slot, template) in pattern.slots().iter().flatten().enumerate() {
            for constraint in &template.sites {
                if let StateConstraint::Exact(state) = constraint.state {
                    delta.merge(self.set_site_state(ids[slot], constraint.site, state)?);
                }
                if let LinkConstraint::Partner { slot: other, site } = constraint.link {
                    // Each bond appears twice; realise it from the lower end.
                    if (slot, constraint.site) < (other, site) {
                        delta.merge(self.bind(ids[slot], constraint.site, ids[other], site)?);
                    }
                }
            }
        }
        Ok((ids, delta))
    }

    // ── Structure ────────────────────────────────────────────────────────

    /// Agents reachable from `id` through bonds, including `id` itself.
    pub fn connected_component(&self, id: AgentId) -> std::result::Result<BTreeSet<AgentId>, MixtureError> {
        if !self.agents.contains_key(&id) {
            return Err(MixtureError::NotFound(id));
        }
        let mut seen = BTreeSet::from([id]);
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            if let Some(agent) = self.agents.get(&current) {
                for partner in agent.neighbors() {
                    if seen.insert(partner.agent) {
                        queue.push_back(partner.agent);
                    }
                }
            }
        }
        Ok(seen)
    }

    /// Decompose the mixture into complexes. Each complex is sorted by
    /// handle, complexes by their smallest handle.
    pub fn components(&self) -> Vec<Vec<AgentId>> {
        let dense: HashMap<AgentId, usize> = self
            .agents
            .keys()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();
        let mut uf = UnionFind::<usize>::new(dense.len());
        for agent in self.agents.values() {
            for partner in agent.neighbors() {
                if let (Some(&x), Some(&y)) = (dense.get(&agent.id), dense.get(&partner.agent)) {
                    uf.union(x, y);
                }
            }
        }

        let mut groups: BTreeMap<usize, Vec<AgentId>> = BTreeMap::new();
        for (id, &i) in &dense {
            groups.entry(uf.find(i)).or_default().push(*id);
        }
        let mut complexes: Vec<Vec<AgentId>> = groups
            .into_values()
            .map(|mut members| {
                members.sort();
                members
            })
            .collect();
        complexes.sort_by_key(|members| members[0]);
        complexes
    }

    pub fn complex_count(&self) -> usize {
        self.components().len()
    }

    /// Verify the structural invariants: symmetric bonds between live
    /// agents, in-range sites and states, consistent type index and bond
    /// counter.
    pub fn check_integrity(&self) -> std::result::Result<(), ConsistencyError> {
        let fail = |msg: String| Err(ConsistencyError::Integrity(msg));
        let mut ends = 0usize;
        for agent in self.agents.values() {
            let Some(sig) = self.signatures.get(agent.agent_type) else {
                return fail(format!("agent {} has undeclared type", agent.id));
            };
            if agent.sites.len() != sig.sites.len() {
                return fail(format!("agent {} has {} sites, signature declares {}", agent.id, agent.sites.len(), sig.sites.len()));
            }
            if !self.by_type[agent.agent_type.index()].contains(&agent.id) {
                return fail(format!("agent {} missing from its type index", agent.id));
            }
            for (i, record) in agent.sites.iter().enumerate() {
                let here = Location::new(agent.id, SiteId(i as u32));
                if let Some(state) = record.state {
                    if !self.signatures.in_domain(agent.agent_type, here.site, state) {
                        return fail(format!("site {} holds out-of-domain state {:?}", here, state));
                    }
                }
                if let Link::Bound(partner) = record.link {
                    ends += 1;
                    if partner == here {
                        return fail(format!("site {} is bound to itself", here));
                    }
                    match self.site(partner) {
                        Ok(other) if other.link == Link::Bound(here) => {}
                        Ok(_) => return fail(format!("bond {} -> {} is not symmetric", here, partner)),
                        Err(_) => return fail(format!("site {} is bound to dead location {}", here, partner)),
                    }
                }
            }
        }
        let indexed: usize = self.by_type.iter().map(BTreeSet::len).sum();
        if indexed != self.agents.len() {
            return fail(format!("type index holds {} agents, arena holds {}", indexed, self.agents.len()));
        }
        if ends != 2 * self.bonds {
            return fail(format!("bond counter is {}, found {} bonded site ends", self.bonds, ends));
        }
        if let Some(max) = self.agents.keys().next_back() {
            if max.0 >= self.next_id {
                return fail(format!("agent {} is not below the id counter {}", max, self.next_id));
            }
        }
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn site_mut(&mut self, loc: Location) -> Option<&mut SiteRecord> {
        self.agents
            .get_mut(&loc.agent)
            .and_then(|a| a.sites.get_mut(loc.site.index()))
    }

    /// Rebuild a mixture from raw parts. Used by snapshot restoration, which
    /// validates the result with [`check_integrity`](Self::check_integrity).
    pub(crate) fn from_parts(
        signatures: Arc<Signatures>,
        agents: Vec<Agent>,
        next_id: u64,
        policy: UnbindPolicy,
    ) -> Self {
        let mut mixture = Mixture::new(signatures).with_policy(policy);
        let mut ends = 0usize;
        for agent in agents {
            ends += agent.neighbors().count();
            if let Some(set) = mixture.by_type.get_mut(agent.agent_type.index()) {
                set.insert(agent.id);
            }
            mixture.agents.insert(agent.id, agent);
        }
        mixture.bonds = ends / 2;
        mixture.next_id = next_id;
        mixture
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::AgentSignature;

    fn signatures() -> Arc<Signatures> {
        let sigs = Signatures::new()
            .with(AgentSignature::new("A").site("x").site_with_states("p", &["u", "p"]))
            .unwrap()
            .with(AgentSignature::new("B").site("x").site("y"))
            .unwrap();
        Arc::new(sigs)
    }

    const A: AgentType = AgentType(0);
    const B: AgentType = AgentType(1);
    const X: SiteId = SiteId(0);
    const P: SiteId = SiteId(1);

    #[test]
    fn created_agents_are_free_and_unset() {
        let mut mix = Mixture::new(signatures());
        let (a, delta) = mix.create_agent(A).unwrap();
        assert_eq!(delta.created, BTreeSet::from([a]));
        let agent = mix.agent(a).unwrap();
        assert!(agent.sites.iter().all(|s| s.state.is_none() && s.link == Link::Free));
        assert_eq!(mix.count_of_type(A), 1);
        assert_eq!(
            mix.create_agent(AgentType(9)),
            Err(MixtureError::UnknownAgentType(AgentType(9)))
        );
    }

    #[test]
    fn handles_are_never_reused() {
        let mut mix = Mixture::new(signatures());
        let (a, _) = mix.create_agent(A).unwrap();
        mix.remove_agent(a).unwrap();
        let (b, _) = mix.create_agent(A).unwrap();
        assert_ne!(a, b);
        assert_eq!(mix.remove_agent(a), Err(MixtureError::NotFound(a)));
    }

    #[test]
    fn bind_is_symmetric_and_checked() {
        let mut mix = Mixture::new(signatures());
        let (a, _) = mix.create_agent(A).unwrap();
        let (b, _) = mix.create_agent(B).unwrap();
        let delta = mix.bind(a, X, b, X).unwrap();
        assert_eq!(delta.sites.len(), 2);
        assert_eq!(mix.partner(Location::new(a, X)), Some(Location::new(b, X)));
        assert_eq!(mix.partner(Location::new(b, X)), Some(Location::new(a, X)));
        assert_eq!(mix.bond_count(), 1);

        assert_eq!(
            mix.bind(a, X, b, SiteId(1)),
            Err(MixtureError::AlreadyBound(Location::new(a, X)))
        );
        assert_eq!(
            mix.bind(b, SiteId(1), b, SiteId(1)),
            Err(MixtureError::SelfBinding(Location::new(b, SiteId(1))))
        );
        assert!(matches!(mix.bind(a, SiteId(7), b, SiteId(1)), Err(MixtureError::InvalidSite { .. })));
        mix.check_integrity().unwrap();
    }

    #[test]
    fn intra_agent_bond_is_allowed() {
        let mut mix = Mixture::new(signatures());
        let (b, _) = mix.create_agent(B).unwrap();
        mix.bind(b, SiteId(0), b, SiteId(1)).unwrap();
        mix.check_integrity().unwrap();
        assert_eq!(mix.bond_count(), 1);
        mix.remove_agent(b).unwrap();
        assert_eq!(mix.bond_count(), 0);
        mix.check_integrity().unwrap();
    }

    #[test]
    fn unbind_policy_lenient_and_strict() {
        let mut mix = Mixture::new(signatures());
        let (a, _) = mix.create_agent(A).unwrap();
        assert_eq!(mix.unbind(a, X), Ok(Delta::default()));

        mix.set_policy(UnbindPolicy::Strict);
        assert_eq!(mix.unbind(a, X), Err(MixtureError::NotBound(Location::new(a, X))));

        let (b, _) = mix.create_agent(B).unwrap();
        mix.bind(a, X, b, X).unwrap();
        let delta = mix.unbind(b, X).unwrap();
        assert_eq!(delta.sites, BTreeSet::from([Location::new(a, X), Location::new(b, X)]));
        assert_eq!(mix.bond_count(), 0);
    }

    #[test]
    fn set_state_validates_domain() {
        let mut mix = Mixture::new(signatures());
        let (a, _) = mix.create_agent(A).unwrap();
        let delta = mix.set_site_state(a, P, StateId(1)).unwrap();
        assert_eq!(delta.sites, BTreeSet::from([Location::new(a, P)]));
        assert!(mix.set_site_state(a, P, StateId(1)).unwrap().is_empty());
        assert_eq!(
            mix.set_site_state(a, P, StateId(2)),
            Err(MixtureError::InvalidState { location: Location::new(a, P), state: StateId(2) })
        );
        // `x` declares no states at all.
        assert!(matches!(mix.set_site_state(a, X, StateId(0)), Err(MixtureError::InvalidState { .. })));
    }

    #[test]
    fn removal_severs_bonds_and_touches_partners() {
        let mut mix = Mixture::new(signatures());
        let (a, _) = mix.create_agent(A).unwrap();
        let (b, _) = mix.create_agent(B).unwrap();
        let (c, _) = mix.create_agent(A).unwrap();
        mix.bind(a, X, b, X).unwrap();
        mix.bind(c, X, b, SiteId(1)).unwrap();

        let delta = mix.remove_agent(b).unwrap();
        assert_eq!(delta.removed, BTreeSet::from([b]));
        assert_eq!(delta.sites, BTreeSet::from([Location::new(a, X), Location::new(c, X)]));
        assert_eq!(mix.partner(Location::new(a, X)), None);
        assert_eq!(mix.bond_count(), 0);
        assert_eq!(mix.len(), 2);
        mix.check_integrity().unwrap();
    }

    #[test]
    fn components_follow_bonds() {
        let mut mix = Mixture::new(signatures());
        let (a, _) = mix.create_agent(A).unwrap();
        let (b, _) = mix.create_agent(B).unwrap();
        let (c, _) = mix.create_agent(A).unwrap();
        let (d, _) = mix.create_agent(A).unwrap();
        mix.bind(a, X, b, X).unwrap();
        mix.bind(c, X, b, SiteId(1)).unwrap();

        assert_eq!(mix.components(), vec![vec![a, b, c], vec![d]]);
        assert_eq!(mix.complex_count(), 2);
        assert_eq!(mix.connected_component(c).unwrap(), BTreeSet::from([a, b, c]));
    }
}
