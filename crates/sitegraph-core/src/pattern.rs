//! Patterns: immutable queries over the mixture.
//!
//! A pattern is written by name as a [`PatternSpec`] and compiled against
//! the [`Signatures`] into an index-based [`Pattern`]. Compilation resolves
//! shared binding labels into [`LinkConstraint::Partner`] constraints and
//! splits the pattern into connected components, each of which is matched
//! and indexed on its own.

use crate::error::ModelError;
use crate::signature::Signatures;
use crate::types::{AgentType, SiteId, StateId};
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

// ── Name-based description ───────────────────────────────────────────────

/// Internal state requirement, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateSpec {
    #[default]
    Any,
    Unset,
    Is(String),
}

/// Binding requirement, by name. Two sites sharing a `Label` are bonded to
/// each other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkSpec {
    #[default]
    Any,
    Free,
    Bound,
    BoundTo { agent: String, site: String },
    Label(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSpec {
    pub name: String,
    #[serde(default)]
    pub state: StateSpec,
    #[serde(default)]
    pub link: LinkSpec,
}

impl SiteSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StateSpec::Any,
            link: LinkSpec::Any,
        }
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = StateSpec::Is(state.into());
        self
    }

    pub fn unset(mut self) -> Self {
        self.state = StateSpec::Unset;
        self
    }

    pub fn free(mut self) -> Self {
        self.link = LinkSpec::Free;
        self
    }

    pub fn bound(mut self) -> Self {
        self.link = LinkSpec::Bound;
        self
    }

    pub fn bound_to(mut self, agent: impl Into<String>, site: impl Into<String>) -> Self {
        self.link = LinkSpec::BoundTo {
            agent: agent.into(),
            site: site.into(),
        };
        self
    }

    pub fn label(mut self, label: u32) -> Self {
        self.link = LinkSpec::Label(label);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub agent_type: String,
    pub sites: Vec<SiteSpec>,
}

impl AgentSpec {
    pub fn new(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            sites: Vec::new(),
        }
    }

    pub fn site(mut self, site: SiteSpec) -> Self {
        self.sites.push(site);
        self
    }

    /// Shorthand for a free site with any state.
    pub fn free(self, site: &str) -> Self {
        self.site(SiteSpec::new(site).free())
    }

    /// Shorthand for a site bonded through `label`.
    pub fn label(self, site: &str, label: u32) -> Self {
        self.site(SiteSpec::new(site).label(label))
    }
}

/// Ordered list of agent slots. `None` slots only make sense in rule sides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub agents: Vec<Option<AgentSpec>>,
}

impl PatternSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent(mut self, agent: AgentSpec) -> Self {
        self.agents.push(Some(agent));
        self
    }

    pub fn empty_slot(mut self) -> Self {
        self.agents.push(None);
        self
    }

    pub fn compile(&self, signatures: &Signatures) -> Result<Pattern, ModelError> {
        Pattern::compile(self, signatures)
    }
}

// ── Compiled form ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateConstraint {
    Any,
    Unset,
    Exact(StateId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkConstraint {
    Any,
    Free,
    /// Bound to anything.
    Bound,
    /// Bound to a site of the given type outside the pattern's control.
    BoundTo { agent_type: AgentType, site: SiteId },
    /// Bound to `site` of the agent in `slot`.
    Partner { slot: usize, site: SiteId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiteConstraint {
    pub site: SiteId,
    pub state: StateConstraint,
    pub link: LinkConstraint,
}

/// Requirements on one agent, with site constraints sorted by site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentTemplate {
    pub agent_type: AgentType,
    pub sites: Vec<SiteConstraint>,
}

impl AgentTemplate {
    pub fn constraint(&self, site: SiteId) -> Option<&SiteConstraint> {
        self.sites
            .binary_search_by_key(&site, |c| c.site)
            .ok()
            .map(|i| &self.sites[i])
    }

    pub fn mentions(&self, site: SiteId) -> bool {
        self.constraint(site).is_some()
    }

    /// How many sites actually restrict a match.
    pub fn specificity(&self) -> usize {
        self.sites
            .iter()
            .map(|c| {
                usize::from(c.state != StateConstraint::Any) + usize::from(c.link != LinkConstraint::Any)
            })
            .sum()
    }
}

/// A connected pattern. `Partner` slots index into `templates`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentPattern {
    pub templates: Vec<AgentTemplate>,
}

impl ComponentPattern {
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// A component together with the pattern slots its templates come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub pattern: ComponentPattern,
    /// `slots[local]` is the pattern slot of the component's `local` template.
    pub slots: Vec<usize>,
}

/// A compiled pattern. `Partner` slots index into [`slots`](Self::slots).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    slots: Vec<Option<AgentTemplate>>,
    components: Vec<Component>,
}

impl Pattern {
    pub fn compile(spec: &PatternSpec, signatures: &Signatures) -> Result<Pattern, ModelError> {
        let mut slots = Vec::with_capacity(spec.agents.len());
        let mut labels: BTreeMap<u32, Vec<(usize, SiteId)>> = BTreeMap::new();

        for (slot, agent) in spec.agents.iter().enumerate() {
            let Some(agent) = agent else {
                slots.push(None);
                continue;
            };
            let ty = signatures.agent_type(&agent.agent_type)?;
            let mut sites: Vec<SiteConstraint> = Vec::with_capacity(agent.sites.len());
            for site_spec in &agent.sites {
                let site = signatures.site(ty, &site_spec.name)?;
                if sites.iter().any(|c| c.site == site) {
                    return Err(ModelError::DuplicateSite {
                        agent: agent.agent_type.clone(),
                        site: site_spec.name.clone(),
                    });
                }
                let state = match &site_spec.state {
                    StateSpec::Any => StateConstraint::Any,
                    StateSpec::Unset => StateConstraint::Unset,
                    StateSpec::Is(name) => StateConstraint::Exact(signatures.state(ty, site, name)?),
                };
                let link = match &site_spec.link {
                    LinkSpec::Any => LinkConstraint::Any,
                    LinkSpec::Free => LinkConstraint::Free,
                    LinkSpec::Bound => LinkConstraint::Bound,
                    LinkSpec::BoundTo { agent, site } => {
                        let agent_type = signatures.agent_type(agent)?;
                        let site = signatures.site(agent_type, site)?;
                        LinkConstraint::BoundTo { agent_type, site }
                    }
                    LinkSpec::Label(label) => {
                        labels.entry(*label).or_default().push((slot, site));
                        // Resolved below once both ends are known.
                        LinkConstraint::Any
                    }
                };
                sites.push(SiteConstraint { site, state, link });
            }
            sites.sort_by_key(|c| c.site);
            slots.push(Some(AgentTemplate {
                agent_type: ty,
                sites,
            }));
        }

        let mut uf = UnionFind::<usize>::new(slots.len());
        for (label, ends) in &labels {
            let [(slot_a, site_a), (slot_b, site_b)] = ends.as_slice() else {
                return Err(if ends.len() < 2 {
                    ModelError::DanglingLabel(*label)
                } else {
                    ModelError::OverusedLabel(*label)
                });
            };
            set_partner(&mut slots, *slot_a, *site_a, *slot_b, *site_b);
            set_partner(&mut slots, *slot_b, *site_b, *slot_a, *site_a);
            uf.union(*slot_a, *slot_b);
        }

        let components = split_components(&slots, &uf);
        Ok(Pattern { slots, components })
    }

    /// The pattern with no slots. It has exactly one (empty) embedding.
    pub fn empty() -> Self {
        Pattern {
            slots: Vec::new(),
            components: Vec::new(),
        }
    }

    /// Number of slots, empty ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Option<AgentTemplate>] {
        &self.slots
    }

    pub fn slot(&self, slot: usize) -> Option<&AgentTemplate> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn agent_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Whether [`Mixture::instantiate`](crate::mixture::Mixture::instantiate)
    /// accepts this pattern.
    pub fn is_instantiable(&self) -> bool {
        self.check_instantiable().is_ok()
    }

    pub fn check_instantiable(&self) -> Result<(), ModelError> {
        for (slot, template) in self.slots.iter().enumerate() {
            let Some(template) = template else {
                return Err(ModelError::Underspecified(format!("slot {} is empty", slot)));
            };
            for c in &template.sites {
                if matches!(c.link, LinkConstraint::Bound | LinkConstraint::BoundTo { .. }) {
                    return Err(ModelError::Underspecified(format!(
                        "slot {} site {} is bound to an agent outside the pattern",
                        slot, c.site.0
                    )));
                }
            }
        }
        Ok(())
    }

    /// Kappa-style rendering, e.g. `A(x[1], p{u}), B(x[1])`.
    pub fn render(&self, signatures: &Signatures) -> String {
        let mut labels: BTreeMap<(usize, SiteId), usize> = BTreeMap::new();
        let mut next_label = 1;
        let mut out = String::new();
        for (slot, template) in self.slots.iter().enumerate() {
            if slot > 0 {
                out.push_str(", ");
            }
            let Some(template) = template else {
                out.push('.');
                continue;
            };
            let ty = template.agent_type;
            let _ = write!(out, "{}(", signatures.type_name(ty));
            for (i, c) in template.sites.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(signatures.site_name(ty, c.site));
                match c.link {
                    LinkConstraint::Any => {}
                    LinkConstraint::Free => out.push_str("[.]"),
                    LinkConstraint::Bound => out.push_str("[_]"),
                    LinkConstraint::BoundTo { agent_type, site } => {
                        let _ = write!(
                            out,
                            "[{}.{}]",
                            signatures.site_name(agent_type, site),
                            signatures.type_name(agent_type)
                        );
                    }
                    LinkConstraint::Partner { slot: other, site } => {
                        let label = match labels.get(&(other, site)) {
                            Some(&label) => label,
                            None => {
                                next_label += 1;
                                next_label - 1
                            }
                        };
                        labels.insert((slot, c.site), label);
                        let _ = write!(out, "[{}]", label);
                    }
                }
                match c.state {
                    StateConstraint::Any => {}
                    StateConstraint::Unset => out.push_str("{#}"),
                    StateConstraint::Exact(s) => {
                        let _ = write!(out, "{{{}}}", signatures.state_name(ty, c.site, s));
                    }
                }
            }
            out.push(')');
        }
        out
    }
}

fn set_partner(
    slots: &mut [Option<AgentTemplate>],
    slot: usize,
    site: SiteId,
    partner_slot: usize,
    partner_site: SiteId,
) {
    if let Some(Some(template)) = slots.get_mut(slot) {
        if let Some(c) = template.sites.iter_mut().find(|c| c.site == site) {
            c.link = LinkConstraint::Partner {
                slot: partner_slot,
                site: partner_site,
            };
        }
    }
}

/// Group present slots by bond connectivity, ordered by their first slot,
/// remapping `Partner` references to component-local indices.
fn split_components(slots: &[Option<AgentTemplate>], uf: &UnionFind<usize>) -> Vec<Component> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (slot, template) in slots.iter().enumerate() {
        if template.is_some() {
            groups.entry(uf.find(slot)).or_default().push(slot);
        }
    }
    let mut members: Vec<Vec<usize>> = groups.into_values().collect();
    members.sort_by_key(|m| m[0]);

    members
        .into_iter()
        .map(|component_slots| {
            let local = |global: usize| component_slots.iter().position(|&s| s == global).unwrap_or(0);
            let templates = component_slots
                .iter()
                .filter_map(|&s| slots[s].clone())
                .map(|mut template| {
                    for c in &mut template.sites {
                        if let LinkConstraint::Partner { slot, site } = c.link {
                            c.link = LinkConstraint::Partner { slot: local(slot), site };
                        }
                    }
                    template
                })
                .collect();
            Component {
                pattern: ComponentPattern { templates },
                slots: component_slots.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::AgentSignature;

    fn signatures() -> Signatures {
        Signatures::new()
            .with(AgentSignature::new("A").site("x").site_with_states("p", &["u", "p"]))
            .unwrap()
            .with(AgentSignature::new("B").site("x").site("y"))
            .unwrap()
    }

    #[test]
    fn labels_become_partner_constraints() {
        let sigs = signatures();
        let pattern = PatternSpec::new()
            .agent(AgentSpec::new("A").label("x", 1).site(SiteSpec::new("p").state("p")))
            .agent(AgentSpec::new("B").label("x", 1))
            .compile(&sigs)
            .unwrap();

        let a = pattern.slot(0).unwrap();
        assert_eq!(
            a.constraint(SiteId(0)).unwrap().link,
            LinkConstraint::Partner { slot: 1, site: SiteId(0) }
        );
        assert_eq!(a.constraint(SiteId(1)).unwrap().state, StateConstraint::Exact(StateId(1)));
        assert_eq!(pattern.components().len(), 1);
        assert_eq!(pattern.render(&sigs), "A(x[1], p{p}), B(x[1])");
    }

    #[test]
    fn disconnected_slots_form_separate_components() {
        let sigs = signatures();
        let pattern = PatternSpec::new()
            .agent(AgentSpec::new("B").free("x"))
            .agent(AgentSpec::new("A").label("x", 7))
            .agent(AgentSpec::new("B").label("y", 7))
            .compile(&sigs)
            .unwrap();

        let components = pattern.components();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].slots, vec![0]);
        assert_eq!(components[1].slots, vec![1, 2]);
        // Partner slots are local to the component.
        assert_eq!(
            components[1].pattern.templates[0].sites[0].link,
            LinkConstraint::Partner { slot: 1, site: SiteId(1) }
        );
    }

    #[test]
    fn malformed_labels_are_rejected() {
        let sigs = signatures();
        let dangling = PatternSpec::new().agent(AgentSpec::new("A").label("x", 3));
        assert_eq!(dangling.compile(&sigs), Err(ModelError::DanglingLabel(3)));

        let overused = PatternSpec::new()
            .agent(AgentSpec::new("A").label("x", 2))
            .agent(AgentSpec::new("B").label("x", 2).label("y", 2));
        assert_eq!(overused.compile(&sigs), Err(ModelError::OverusedLabel(2)));
    }

    #[test]
    fn unknown_names_and_duplicate_sites_are_rejected() {
        let sigs = signatures();
        let cases = [
            PatternSpec::new().agent(AgentSpec::new("Z")),
            PatternSpec::new().agent(AgentSpec::new("A").free("q")),
            PatternSpec::new().agent(AgentSpec::new("A").site(SiteSpec::new("p").state("zz"))),
            PatternSpec::new().agent(AgentSpec::new("A").free("x").free("x")),
        ];
        for spec in cases {
            assert!(spec.compile(&sigs).is_err(), "{:?} should not compile", spec);
        }
    }

    #[test]
    fn instantiable_requires_every_slot_and_internal_bonds() {
        let sigs = signatures();
        let ok = PatternSpec::new()
            .agent(AgentSpec::new("A").label("x", 1))
            .agent(AgentSpec::new("B").label("x", 1))
            .compile(&sigs)
            .unwrap();
        assert!(ok.is_instantiable());

        let open = PatternSpec::new()
            .agent(AgentSpec::new("A").site(SiteSpec::new("x").bound()))
            .compile(&sigs)
            .unwrap();
        assert!(matches!(open.check_instantiable(), Err(ModelError::Underspecified(_))));

        let hole = PatternSpec::new().empty_slot().compile(&sigs).unwrap();
        assert!(!hole.is_instantiable());
        assert!(hole.components().is_empty());
    }
}
