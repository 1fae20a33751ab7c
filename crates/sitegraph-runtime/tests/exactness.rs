//! Index exactness under arbitrary mixture edits.
//!
//! After every accepted edit the incrementally maintained index must equal a
//! full rematch, and each pattern's product of component counts must equal a
//! direct count on the mixture.

use proptest::prelude::*;
use sitegraph_core::prelude::*;
use sitegraph_runtime::embedding_index::{ComponentId, EmbeddingIndex};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Create(u8),
    Remove(usize),
    SetState(usize, u8, u8),
    Bind(usize, u8, usize, u8),
    Unbind(usize, u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..2).prop_map(Op::Create),
        1 => any::<usize>().prop_map(Op::Remove),
        2 => (any::<usize>(), 0u8..3, 0u8..2).prop_map(|(a, s, v)| Op::SetState(a, s, v)),
        4 => (any::<usize>(), 0u8..3, any::<usize>(), 0u8..3)
            .prop_map(|(a, sa, b, sb)| Op::Bind(a, sa, b, sb)),
        2 => (any::<usize>(), 0u8..3).prop_map(|(a, s)| Op::Unbind(a, s)),
    ]
}

fn signatures() -> Arc<Signatures> {
    Arc::new(
        Signatures::new()
            .with(AgentSignature::new("A").site("x").site("y").site_with_states("p", &["u", "p"]))
            .unwrap()
            .with(AgentSignature::new("B").site("x").site_with_states("z", &["a", "b"]))
            .unwrap(),
    )
}

fn patterns(sigs: &Signatures) -> Vec<Pattern> {
    let specs = vec![
        PatternSpec::new().agent(AgentSpec::new("A").free("x")),
        PatternSpec::new()
            .agent(AgentSpec::new("A").label("x", 1))
            .agent(AgentSpec::new("B").label("x", 1)),
        PatternSpec::new()
            .agent(AgentSpec::new("A").label("y", 1))
            .agent(AgentSpec::new("A").label("y", 1)),
        PatternSpec::new().agent(AgentSpec::new("A").site(SiteSpec::new("x").bound()).site(SiteSpec::new("p").state("p"))),
        PatternSpec::new()
            .agent(AgentSpec::new("A").label("y", 1).label("x", 2))
            .agent(AgentSpec::new("A").label("y", 1))
            .agent(AgentSpec::new("B").label("x", 2)),
        PatternSpec::new().agent(AgentSpec::new("B").site(SiteSpec::new("x").bound_to("A", "x"))),
        PatternSpec::new()
            .agent(AgentSpec::new("A").site(SiteSpec::new("p").state("u")))
            .agent(AgentSpec::new("B").site(SiteSpec::new("z").state("a"))),
        PatternSpec::new()
            .agent(AgentSpec::new("A").label("x", 1).label("y", 2))
            .agent(AgentSpec::new("A").label("x", 1).label("y", 2)),
        PatternSpec::new().agent(AgentSpec::new("A").site(SiteSpec::new("p").unset())),
    ];
    specs.iter().map(|s| s.compile(sigs).unwrap()).collect()
}

struct Harness {
    mixture: Mixture,
    index: EmbeddingIndex,
    tracked: Vec<(Pattern, Vec<ComponentId>)>,
    max_created: Option<AgentId>,
    /// When set, deltas accumulate here until `flush`.
    pending: Option<Delta>,
}

impl Harness {
    fn new() -> Self {
        let sigs = signatures();
        let mixture = Mixture::new(sigs.clone());
        let mut index = EmbeddingIndex::new();
        let tracked = patterns(&sigs)
            .into_iter()
            .map(|p| {
                let ids = index.register_pattern(&p, &mixture);
                (p, ids)
            })
            .collect();
        Self {
            mixture,
            index,
            tracked,
            max_created: None,
            pending: None,
        }
    }

    fn deferred() -> Self {
        Self {
            pending: Some(Delta::default()),
            ..Self::new()
        }
    }

    fn pick(&self, n: usize) -> Option<AgentId> {
        let live: Vec<AgentId> = self.mixture.agents().map(|a| a.id).collect();
        if live.is_empty() {
            None
        } else {
            Some(live[n % live.len()])
        }
    }

    fn site(&self, agent: AgentId, s: u8) -> SiteId {
        let ty = self.mixture.agent_type(agent).unwrap();
        SiteId(s as u32 % self.mixture.signatures().site_count(ty) as u32)
    }

    fn absorb(&mut self, delta: Delta) {
        match &mut self.pending {
            Some(pending) => pending.merge(delta),
            None => self.index.on_mixture_delta(&self.mixture, &delta),
        }
    }

    fn flush(&mut self) {
        if let Some(pending) = self.pending.replace(Delta::default()) {
            self.index.on_mixture_delta(&self.mixture, &pending);
        }
    }

    fn apply(&mut self, op: &Op) {
        let delta = match *op {
            Op::Create(t) => {
                let (id, delta) = self.mixture.create_agent(AgentType(t as u32)).unwrap();
                assert!(self.max_created.map_or(true, |m| id > m), "handle {} reused", id);
                self.max_created = Some(id);
                Some(delta)
            }
            Op::Remove(a) => match self.pick(a) {
                Some(a) => Some(self.mixture.remove_agent(a).unwrap()),
                None => None,
            },
            Op::SetState(a, s, v) => match self.pick(a) {
                Some(a) => {
                    let site = self.site(a, s);
                    self.mixture.set_site_state(a, site, StateId(v as u32)).ok()
                }
                None => None,
            },
            Op::Bind(a, sa, b, sb) => match (self.pick(a), self.pick(b)) {
                (Some(a), Some(b)) => {
                    let (sa, sb) = (self.site(a, sa), self.site(b, sb));
                    self.mixture.bind(a, sa, b, sb).ok()
                }
                _ => None,
            },
            Op::Unbind(a, s) => match self.pick(a) {
                Some(a) => {
                    let site = self.site(a, s);
                    self.mixture.unbind(a, site).ok()
                }
                None => None,
            },
        };
        if let Some(delta) = delta {
            self.absorb(delta);
        }
    }

    fn bind(&mut self, a: u64, sa: u32, b: u64, sb: u32) {
        let delta = self
            .mixture
            .bind(AgentId(a), SiteId(sa), AgentId(b), SiteId(sb))
            .unwrap();
        self.absorb(delta);
    }

    fn count(&self, pattern: usize) -> u64 {
        self.index.product(&self.tracked[pattern].1)
    }

    fn check(&self) {
        self.mixture.check_integrity().unwrap();
        self.index.verify(&self.mixture).unwrap();
        for (pattern, ids) in &self.tracked {
            assert_eq!(
                self.index.product(ids),
                count_embeddings(pattern, &self.mixture),
                "count drift for {}",
                pattern.render(self.mixture.signatures())
            );
            for &id in ids {
                for e in self.index.embeddings(id) {
                    assert!(e.agents().iter().all(|a| self.mixture.contains(*a)), "stale embedding {:?}", e);
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_index_equals_full_rematch(ops in proptest::collection::vec(op(), 1..120)) {
        let mut h = Harness::new();
        for op in &ops {
            h.apply(op);
            h.check();
        }
    }

    #[test]
    fn prop_one_merged_delta_equals_many(ops in proptest::collection::vec(op(), 1..60)) {
        let mut h = Harness::deferred();
        for op in &ops {
            h.apply(op);
        }
        h.flush();
        h.check();
    }
}

#[test]
fn removal_of_a_bridge_agent_purges_every_use() {
    let mut h = Harness::new();
    for t in [0, 0, 1] {
        h.apply(&Op::Create(t));
    }
    // A#0.y - A#1.y and A#0.x - B#2.x
    h.bind(0, 1, 1, 1);
    h.bind(0, 0, 2, 0);
    h.check();
    assert_eq!(h.count(4), 1);
    // The homodimer matches in both directions.
    assert_eq!(h.count(2), 2);

    h.apply(&Op::Remove(0));
    h.check();
    assert!(!h.index.references(AgentId(0)));
    assert_eq!(h.count(4), 0);
    assert_eq!(h.count(2), 0);
}

#[test]
fn state_edits_move_embeddings_between_patterns() {
    let mut h = Harness::new();
    h.apply(&Op::Create(0));
    h.apply(&Op::Create(1));
    h.check();
    // A(p{#}) matches; A(p{u}), B(z{a}) does not yet.
    assert_eq!(h.count(8), 1);
    assert_eq!(h.count(6), 0);

    h.apply(&Op::SetState(0, 2, 0));
    h.apply(&Op::SetState(1, 1, 0));
    h.check();
    assert_eq!(h.count(8), 0);
    assert_eq!(h.count(6), 1);

    h.apply(&Op::SetState(1, 1, 1));
    h.check();
    assert_eq!(h.count(6), 0);
}
