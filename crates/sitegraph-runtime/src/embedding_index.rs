//! Embedding index: the exact, incrementally maintained match sets.
//!
//! Every registered pattern component keeps
//! - its current embeddings in a vector with a position map, for O(1)
//!   uniform sampling and O(1) removal, and
//! - a reverse index from each agent and each (agent, mentioned site)
//!   location to the embeddings that use it.
//!
//! The two are only ever updated together.
//!
//! An embedding's validity depends only on its agents being alive and on
//! the state and binding of the sites its templates mention. So after a
//! [`Delta`], the embeddings that may have become invalid are exactly those
//! reachable through the reverse index from the touched locations and
//! removed agents, and the embeddings that may have become valid must map
//! some mentioning slot onto a touched location or some slot onto a created
//! agent. Invalidating the first group and re-seeding local matches at the
//! second reproduces what a full rematch would find.

use rand::Rng;
use sitegraph_core::error::{ConsistencyError, RuntimeError};
use sitegraph_core::matcher::{Embedding, Matcher};
use sitegraph_core::mixture::{Delta, Mixture};
use sitegraph_core::pattern::{ComponentPattern, Pattern};
use sitegraph_core::types::{AgentId, Location};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Handle of a registered pattern component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(pub usize);

/// Embeddings with constant-time insert, remove and indexed access.
#[derive(Debug, Clone, Default)]
struct EmbeddingSet {
    items: Vec<Embedding>,
    positions: HashMap<Embedding, usize>,
}

impl EmbeddingSet {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn contains(&self, e: &Embedding) -> bool {
        self.positions.contains_key(e)
    }

    fn insert(&mut self, e: Embedding) -> bool {
        if self.positions.contains_key(&e) {
            return false;
        }
        self.positions.insert(e.clone(), self.items.len());
        self.items.push(e);
        true
    }

    fn remove(&mut self, e: &Embedding) -> bool {
        let Some(pos) = self.positions.remove(e) else {
            return false;
        };
        self.items.swap_remove(pos);
        if let Some(moved) = self.items.get(pos) {
            self.positions.insert(moved.clone(), pos);
        }
        true
    }

    fn clear(&mut self) {
        self.items.clear();
        self.positions.clear();
    }
}

/// One registered component with its embeddings and reverse index.
#[derive(Debug, Clone)]
struct TrackedComponent {
    matcher: Matcher,
    embeddings: EmbeddingSet,
    by_agent: HashMap<AgentId, BTreeSet<Embedding>>,
    by_site: HashMap<Location, BTreeSet<Embedding>>,
}

impl TrackedComponent {
    fn new(matcher: Matcher) -> Self {
        Self {
            matcher,
            embeddings: EmbeddingSet::default(),
            by_agent: HashMap::new(),
            by_site: HashMap::new(),
        }
    }

    fn locations<'a>(&'a self, e: &'a Embedding) -> impl Iterator<Item = Location> + 'a {
        e.agents().iter().enumerate().flat_map(move |(slot, &agent)| {
            self.matcher
                .mentioned_sites(slot)
                .map(move |site| Location::new(agent, site))
        })
    }

    fn insert(&mut self, e: Embedding) -> bool {
        if self.embeddings.contains(&e) {
            return false;
        }
        for &agent in e.agents() {
            self.by_agent.entry(agent).or_default().insert(e.clone());
        }
        let locations: Vec<Location> = self.locations(&e).collect();
        for loc in locations {
            self.by_site.entry(loc).or_default().insert(e.clone());
        }
        self.embeddings.insert(e)
    }

    fn remove(&mut self, e: &Embedding) -> bool {
        if !self.embeddings.remove(e) {
            return false;
        }
        for agent in e.agents() {
            remove_entry(&mut self.by_agent, agent, e);
        }
        let locations: Vec<Location> = self.locations(e).collect();
        for loc in &locations {
            remove_entry(&mut self.by_site, loc, e);
        }
        true
    }

    fn rematch(&mut self, mixture: &Mixture) {
        self.embeddings.clear();
        self.by_agent.clear();
        self.by_site.clear();
        for e in self.matcher.match_all(mixture) {
            self.insert(e);
        }
    }

    /// Apply a delta; returns (invalidated, inserted) counts.
    fn update(&mut self, mixture: &Mixture, delta: &Delta) -> (usize, usize) {
        let mut stale: BTreeSet<Embedding> = BTreeSet::new();
        for agent in &delta.removed {
            if let Some(set) = self.by_agent.get(agent) {
                stale.extend(set.iter().cloned());
            }
        }
        for loc in &delta.sites {
            if let Some(set) = self.by_site.get(loc) {
                stale.extend(set.iter().cloned());
            }
        }
        for e in &stale {
            self.remove(e);
        }

        let mut found = Vec::new();
        for loc in &delta.sites {
            let Some(ty) = mixture.agent_type(loc.agent) else {
                continue;
            };
            for slot in self.matcher.slots_mentioning(ty, loc.site) {
                found.extend(self.matcher.match_at(mixture, slot, loc.agent));
            }
        }
        for &agent in &delta.created {
            let Some(ty) = mixture.agent_type(agent) else {
                continue;
            };
            for &slot in self.matcher.slots_of_type(ty) {
                found.extend(self.matcher.match_at(mixture, slot, agent));
            }
        }
        let inserted = found.into_iter().filter(|e| self.insert(e.clone())).count();
        (stale.len(), inserted)
    }
}

fn remove_entry<K: std::hash::Hash + Eq>(
    map: &mut HashMap<K, BTreeSet<Embedding>>,
    key: &K,
    e: &Embedding,
) {
    if let Some(set) = map.get_mut(key) {
        set.remove(e);
        if set.is_empty() {
            map.remove(key);
        }
    }
}

/// Incrementally maintained embedding sets for every registered component.
///
/// Identical components are registered once and shared, so a rule and an
/// observable over the same pattern cost one index.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingIndex {
    components: Vec<TrackedComponent>,
    lookup: HashMap<ComponentPattern, ComponentId>,
}

impl EmbeddingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct registered components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Register a component, running one full match. Registering a
    /// component equal to an earlier one returns the earlier handle.
    pub fn register(&mut self, pattern: &ComponentPattern, mixture: &Mixture) -> ComponentId {
        if let Some(&id) = self.lookup.get(pattern) {
            return id;
        }
        let id = ComponentId(self.components.len());
        let mut tracked = TrackedComponent::new(Matcher::new(pattern.clone()));
        tracked.rematch(mixture);
        debug!(component = id.0, embeddings = tracked.embeddings.len(), "registered component");
        self.components.push(tracked);
        self.lookup.insert(pattern.clone(), id);
        id
    }

    /// Register every component of a pattern, in component order.
    pub fn register_pattern(&mut self, pattern: &Pattern, mixture: &Mixture) -> Vec<ComponentId> {
        pattern
            .components()
            .iter()
            .map(|c| self.register(&c.pattern, mixture))
            .collect()
    }

    /// Bring every component up to date with a mixture change.
    pub fn on_mixture_delta(&mut self, mixture: &Mixture, delta: &Delta) {
        if delta.is_empty() {
            return;
        }
        let (mut invalidated, mut inserted) = (0, 0);
        for tracked in &mut self.components {
            let (i, n) = tracked.update(mixture, delta);
            invalidated += i;
            inserted += n;
        }
        debug!(
            sites = delta.sites.len(),
            created = delta.created.len(),
            removed = delta.removed.len(),
            invalidated,
            inserted,
            "index updated"
        );
    }

    /// Current embedding count of a component (0 for unknown handles).
    pub fn size(&self, id: ComponentId) -> usize {
        self.components.get(id.0).map_or(0, |c| c.embeddings.len())
    }

    /// Product of the sizes of several components; 1 for none. Saturates at
    /// `u64::MAX`.
    pub fn product(&self, ids: &[ComponentId]) -> u64 {
        ids.iter()
            .try_fold(1u64, |acc, &id| acc.checked_mul(self.size(id) as u64))
            .unwrap_or(u64::MAX)
    }

    /// The same product in floating point, for activities.
    pub fn weight(&self, ids: &[ComponentId]) -> f64 {
        ids.iter().map(|&id| self.size(id) as f64).product()
    }

    /// Draw one embedding uniformly.
    pub fn sample_uniform<R: Rng + ?Sized>(
        &self,
        id: ComponentId,
        rng: &mut R,
    ) -> Result<&Embedding, RuntimeError> {
        let items = self
            .components
            .get(id.0)
            .map(|c| &c.embeddings.items)
            .filter(|items| !items.is_empty())
            .ok_or(RuntimeError::EmptyIndex(id.0))?;
        Ok(&items[rng.gen_range(0..items.len())])
    }

    pub fn embeddings(&self, id: ComponentId) -> &[Embedding] {
        self.components
            .get(id.0)
            .map_or(&[], |c| c.embeddings.items.as_slice())
    }

    pub fn component(&self, id: ComponentId) -> Option<&ComponentPattern> {
        self.components.get(id.0).map(|c| c.matcher.pattern())
    }

    pub fn contains(&self, id: ComponentId, e: &Embedding) -> bool {
        self.components
            .get(id.0)
            .map_or(false, |c| c.embeddings.contains(e))
    }

    /// Whether any embedding of any component references `agent`.
    pub fn references(&self, agent: AgentId) -> bool {
        self.components.iter().any(|c| c.by_agent.contains_key(&agent))
    }

    /// Full rematch of every component, discarding incremental state.
    pub fn rebuild(&mut self, mixture: &Mixture) {
        for tracked in &mut self.components {
            tracked.rematch(mixture);
        }
    }

    /// Compare every component with a full rematch.
    pub fn verify(&self, mixture: &Mixture) -> Result<(), ConsistencyError> {
        for (i, tracked) in self.components.iter().enumerate() {
            let expected: BTreeSet<Embedding> = tracked.matcher.match_all(mixture).into_iter().collect();
            let stored: BTreeSet<&Embedding> = tracked.embeddings.items.iter().collect();
            let same = stored.len() == expected.len() && expected.iter().all(|e| stored.contains(e));
            if !same {
                return Err(ConsistencyError::IndexMismatch {
                    component: i,
                    stored: stored.len(),
                    expected: expected.len(),
                });
            }
            let reverse_ok = tracked.by_agent.values().flatten().all(|e| tracked.embeddings.contains(e))
                && tracked.by_site.values().flatten().all(|e| tracked.embeddings.contains(e));
            if !reverse_ok {
                return Err(ConsistencyError::Integrity(format!(
                    "reverse index of component {} references a dropped embedding",
                    i
                )));
            }
        }
        Ok(())
    }
}
