//! Rules: a left-hand pattern, an edit script and a rate.
//!
//! Edit scripts address agents either through a left-hand slot or through a
//! fresh agent the script creates. Scripts are kept in phase order
//! (unbind, remove, create, set-state, bind) so that every operation's
//! inputs exist when it runs. Application is checked against the mixture
//! before the first mutation.

use sitegraph_core::error::{MixtureError, ModelError};
use sitegraph_core::expr::{EmptyEnv, Env, Expr};
use sitegraph_core::mixture::{Delta, Link, Mixture};
use sitegraph_core::pattern::{AgentTemplate, LinkConstraint, Pattern, StateConstraint};
use sitegraph_core::signature::Signatures;
use sitegraph_core::types::{AgentId, AgentType, Location, SiteId, StateId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Rate constant or expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rate {
    Constant(f64),
    Expr(Expr),
}

impl Rate {
    pub fn eval(&self, env: &dyn Env) -> Result<f64, ModelError> {
        match self {
            Rate::Constant(k) => Ok(*k),
            Rate::Expr(e) => e.eval(env),
        }
    }

    pub fn expr(&self) -> Option<&Expr> {
        match self {
            Rate::Constant(_) => None,
            Rate::Expr(e) => Some(e),
        }
    }
}

impl From<f64> for Rate {
    fn from(k: f64) -> Self {
        Rate::Constant(k)
    }
}

impl From<Expr> for Rate {
    fn from(e: Expr) -> Self {
        Rate::Expr(e)
    }
}

/// An agent an edit operation acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Target {
    /// The agent the embedding maps this left-hand slot to.
    Slot(usize),
    /// The n-th agent created by the script.
    Fresh(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditOp {
    /// Break the bond at a site if there is one.
    Unbind { target: Target, site: SiteId },
    Remove { slot: usize },
    Create { fresh: usize, agent_type: AgentType },
    SetState { target: Target, site: SiteId, state: StateId },
    Bind { a: Target, site_a: SiteId, b: Target, site_b: SiteId },
}

impl EditOp {
    fn phase(&self) -> u8 {
        match self {
            EditOp::Unbind { .. } => 0,
            EditOp::Remove { .. } => 1,
            EditOp::Create { .. } => 2,
            EditOp::SetState { .. } => 3,
            EditOp::Bind { .. } => 4,
        }
    }
}

/// Operations in phase order; the relative order within a phase is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditScript {
    ops: Vec<EditOp>,
}

impl EditScript {
    pub fn new(mut ops: Vec<EditOp>) -> Self {
        ops.sort_by_key(EditOp::phase);
        Self { ops }
    }

    pub fn ops(&self) -> &[EditOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of agents the script creates.
    pub fn fresh_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, EditOp::Create { .. }))
            .count()
    }
}

/// Which left-hand tuples a rule counts, by where its components sit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Molecularity {
    /// Every tuple of component embeddings.
    #[default]
    Any,
    /// All components inside one complex.
    Unimolecular,
    /// Exactly two components, in two different complexes.
    Bimolecular,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    name: String,
    lhs: Pattern,
    script: EditScript,
    rate: Rate,
    #[serde(default)]
    molecularity: Molecularity,
}

impl Rule {
    /// Derive the edit script from a left/right pattern pair with the same
    /// number of slots.
    pub fn from_patterns(
        name: impl Into<String>,
        lhs: Pattern,
        rhs: &Pattern,
        rate: impl Into<Rate>,
    ) -> Result<Rule, ModelError> {
        let name = name.into();
        if lhs.len() != rhs.len() {
            return Err(ModelError::SlotMismatch {
                rule: name,
                lhs: lhs.len(),
                rhs: rhs.len(),
            });
        }
        let script = derive_script(&name, &lhs, rhs)?;
        Rule::checked(name, lhs, script, rate.into())
    }

    /// Build a rule from an explicit edit script, validated against the
    /// left-hand side and the signatures.
    pub fn with_script(
        name: impl Into<String>,
        lhs: Pattern,
        ops: Vec<EditOp>,
        rate: impl Into<Rate>,
        signatures: &Signatures,
    ) -> Result<Rule, ModelError> {
        let name = name.into();
        let script = EditScript::new(ops);
        validate_script(&name, &lhs, &script, signatures)?;
        Rule::checked(name, lhs, script, rate.into())
    }

    /// A forward rule `lhs -> rhs` and its reverse `rhs -> lhs`. The reverse
    /// rule is named `"<name> (reverse)"`.
    pub fn reversible(
        name: impl Into<String>,
        lhs: Pattern,
        rhs: Pattern,
        forward: impl Into<Rate>,
        reverse: impl Into<Rate>,
    ) -> Result<(Rule, Rule), ModelError> {
        let name = name.into();
        let back = Rule::from_patterns(format!("{} (reverse)", name), rhs.clone(), &lhs, reverse)?;
        let fwd = Rule::from_patterns(name, lhs, &rhs, forward)?;
        Ok((fwd, back))
    }

    /// Split `lhs -> rhs` into a bimolecular rule named `"<name> (bimolecular)"`
    /// and a unimolecular one named `"<name> (unimolecular)"`. A constant
    /// zero rate drops that rule.
    pub fn by_molecularity(
        name: impl Into<String>,
        lhs: Pattern,
        rhs: &Pattern,
        bimolecular: impl Into<Rate>,
        unimolecular: impl Into<Rate>,
    ) -> Result<Vec<Rule>, ModelError> {
        let name = name.into();
        let mut rules = Vec::with_capacity(2);
        for (molecularity, rate, suffix) in [
            (Molecularity::Bimolecular, bimolecular.into(), "bimolecular"),
            (Molecularity::Unimolecular, unimolecular.into(), "unimolecular"),
        ] {
            if rate == Rate::Constant(0.0) {
                continue;
            }
            let rule = Rule::from_patterns(format!("{} ({})", name, suffix), lhs.clone(), rhs, rate)?;
            rules.push(rule.with_molecularity(molecularity)?);
        }
        Ok(rules)
    }

    /// Restrict the rule to a molecularity. Bimolecular rules need exactly
    /// two left-hand components, unimolecular ones at least one.
    pub fn with_molecularity(mut self, molecularity: Molecularity) -> Result<Rule, ModelError> {
        let components = self.lhs.components().len();
        let fits = match molecularity {
            Molecularity::Any => true,
            Molecularity::Unimolecular => components >= 1,
            Molecularity::Bimolecular => components == 2,
        };
        if !fits {
            return Err(ModelError::invalid_rule(
                &self.name,
                format!("{:?} rule with {} left-hand components", molecularity, components),
            ));
        }
        self.molecularity = molecularity;
        Ok(self)
    }

    fn checked(name: String, lhs: Pattern, script: EditScript, rate: Rate) -> Result<Rule, ModelError> {
        if let Rate::Constant(k) = rate {
            if !(k >= 0.0 && k.is_finite()) {
                return Err(ModelError::InvalidRate {
                    rule: name,
                    reason: format!("constant {} is negative or not finite", k),
                });
            }
        }
        Ok(Rule {
            name,
            lhs,
            script,
            rate,
            molecularity: Molecularity::Any,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lhs(&self) -> &Pattern {
        &self.lhs
    }

    pub fn script(&self) -> &EditScript {
        &self.script
    }

    pub fn rate(&self) -> &Rate {
        &self.rate
    }

    pub fn molecularity(&self) -> Molecularity {
        self.molecularity
    }

    /// Rate evaluated without any variables or observables in scope.
    pub fn constant_rate(&self) -> Result<f64, ModelError> {
        self.rate.eval(&EmptyEnv)
    }

    /// Apply the script through `assignment` (`assignment[slot]` is the
    /// agent the embedding maps a left-hand slot to). Returns the merged
    /// delta and the handles of the created agents.
    ///
    /// All preconditions are checked first; an error means the mixture was
    /// not touched.
    pub fn apply(
        &self,
        mixture: &mut Mixture,
        assignment: &[Option<AgentId>],
    ) -> Result<(Delta, Vec<AgentId>), MixtureError> {
        self.precheck(mixture, assignment)?;

        let mut delta = Delta::default();
        // Indexed by the declared fresh number, not by creation order.
        let mut fresh: Vec<Option<AgentId>> = vec![None; self.script.fresh_count()];
        let resolve = |target: Target, fresh: &[Option<AgentId>]| -> Option<AgentId> {
            match target {
                Target::Slot(slot) => assignment.get(slot).copied().flatten(),
                Target::Fresh(i) => fresh.get(i).copied().flatten(),
            }
        };
        let missing = MixtureError::NotFound(AgentId(u64::MAX));

        for op in self.script.ops() {
            match *op {
                EditOp::Unbind { target, site } => {
                    let agent = resolve(target, &fresh).ok_or(missing.clone())?;
                    if mixture.partner(Location::new(agent, site)).is_some() {
                        delta.merge(mixture.unbind(agent, site)?);
                    }
                }
                EditOp::Remove { slot } => {
                    let agent = resolve(Target::Slot(slot), &fresh).ok_or(missing.clone())?;
                    delta.merge(mixture.remove_agent(agent)?);
                }
                EditOp::Create { fresh: index, agent_type } => {
                    let slot = fresh.get_mut(index).ok_or(missing.clone())?;
                    let (id, d) = mixture.create_agent(agent_type)?;
                    *slot = Some(id);
                    delta.merge(d);
                }
                EditOp::SetState { target, site, state } => {
                    let agent = resolve(target, &fresh).ok_or(missing.clone())?;
                    delta.merge(mixture.set_site_state(agent, site, state)?);
                }
                EditOp::Bind { a, site_a, b, site_b } => {
                    let a = resolve(a, &fresh).ok_or(missing.clone())?;
                    let b = resolve(b, &fresh).ok_or(missing.clone())?;
                    delta.merge(mixture.bind(a, site_a, b, site_b)?);
                }
            }
        }
        Ok((delta, fresh.into_iter().flatten().collect()))
    }

    /// Everything `apply` needs from the mixture: slot agents live, and each
    /// pre-existing bind endpoint free once the script's unbinds and
    /// removals have run.
    fn precheck(&self, mixture: &Mixture, assignment: &[Option<AgentId>]) -> Result<(), MixtureError> {
        let slot_agent = |slot: usize| -> Result<AgentId, MixtureError> {
            let agent = assignment
                .get(slot)
                .copied()
                .flatten()
                .ok_or(MixtureError::NotFound(AgentId(u64::MAX)))?;
            if mixture.contains(agent) {
                Ok(agent)
            } else {
                Err(MixtureError::NotFound(agent))
            }
        };

        let mut freed: BTreeSet<Location> = BTreeSet::new();
        let mut removed: BTreeSet<AgentId> = BTreeSet::new();
        for op in self.script.ops() {
            match *op {
                EditOp::Unbind { target: Target::Slot(slot), site } => {
                    let loc = Location::new(slot_agent(slot)?, site);
                    if let Some(partner) = mixture.partner(loc) {
                        freed.insert(loc);
                        freed.insert(partner);
                    }
                }
                EditOp::Remove { slot } => {
                    removed.insert(slot_agent(slot)?);
                }
                EditOp::SetState { target: Target::Slot(slot), .. } => {
                    slot_agent(slot)?;
                }
                _ => {}
            }
        }

        for op in self.script.ops() {
            if let EditOp::Bind { a, site_a, b, site_b } = *op {
                for (target, site) in [(a, site_a), (b, site_b)] {
                    let Target::Slot(slot) = target else {
                        continue;
                    };
                    let loc = Location::new(slot_agent(slot)?, site);
                    match mixture.site(loc)?.link {
                        Link::Free => {}
                        Link::Bound(partner) => {
                            if !freed.contains(&loc) && !removed.contains(&partner.agent) {
                                return Err(MixtureError::AlreadyBound(loc));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// What a right-hand slot refers to once the script has run.
#[derive(Clone, Copy)]
enum Image {
    Kept(usize),
    Created(usize),
}

impl Image {
    fn target(self) -> Target {
        match self {
            Image::Kept(slot) => Target::Slot(slot),
            Image::Created(i) => Target::Fresh(i),
        }
    }
}

fn derive_script(name: &str, lhs: &Pattern, rhs: &Pattern) -> Result<EditScript, ModelError> {
    let mut ops = Vec::new();
    let mut images: Vec<Option<Image>> = vec![None; rhs.len()];
    let mut created = 0;

    for slot in 0..lhs.len() {
        match (lhs.slot(slot), rhs.slot(slot)) {
            (None, None) => {}
            (Some(_), None) => ops.push(EditOp::Remove { slot }),
            (l, Some(r)) => {
                let same_type = l.map_or(false, |l| l.agent_type == r.agent_type);
                if same_type {
                    images[slot] = Some(Image::Kept(slot));
                } else {
                    if l.is_some() {
                        ops.push(EditOp::Remove { slot });
                    }
                    ops.push(EditOp::Create {
                        fresh: created,
                        agent_type: r.agent_type,
                    });
                    images[slot] = Some(Image::Created(created));
                    created += 1;
                }
            }
        }
    }

    let lhs_constraint = |slot: usize, site: SiteId| lhs.slot(slot).and_then(|t| t.constraint(site)).copied();

    for (slot, template) in rhs.slots().iter().enumerate() {
        let (Some(template), Some(image)) = (template, images[slot]) else {
            continue;
        };
        let target = image.target();
        let kept = matches!(image, Image::Kept(_));
        for c in &template.sites {
            let before = if kept { lhs_constraint(slot, c.site) } else { None };

            match c.state {
                StateConstraint::Any => {}
                StateConstraint::Unset => {
                    return Err(ModelError::invalid_rule(
                        name,
                        format!("right-hand slot {} cannot require an unset state", slot),
                    ))
                }
                StateConstraint::Exact(state) => {
                    if before.map(|b| b.state) != Some(StateConstraint::Exact(state)) {
                        ops.push(EditOp::SetState {
                            target,
                            site: c.site,
                            state,
                        });
                    }
                }
            }

            match c.link {
                LinkConstraint::Any => {}
                LinkConstraint::Bound | LinkConstraint::BoundTo { .. } => {
                    return Err(ModelError::invalid_rule(
                        name,
                        format!("right-hand slot {} binds to an agent outside the rule", slot),
                    ))
                }
                LinkConstraint::Free => {
                    if kept && before.map(|b| b.link) != Some(LinkConstraint::Free) {
                        ops.push(EditOp::Unbind { target, site: c.site });
                    }
                }
                LinkConstraint::Partner { slot: other, site } => {
                    // Each bond is listed at both ends; handle it once.
                    if (slot, c.site) > (other, site) {
                        continue;
                    }
                    let Some(other_image) = images[other] else {
                        continue;
                    };
                    let other_kept = matches!(other_image, Image::Kept(_));
                    let unchanged = kept
                        && other_kept
                        && before.map(|b| b.link) == Some(LinkConstraint::Partner { slot: other, site });
                    if unchanged {
                        continue;
                    }
                    if kept && before.map(|b| b.link) != Some(LinkConstraint::Free) {
                        ops.push(EditOp::Unbind { target, site: c.site });
                    }
                    let other_before = if other_kept { lhs_constraint(other, site) } else { None };
                    if other_kept && other_before.map(|b| b.link) != Some(LinkConstraint::Free) {
                        ops.push(EditOp::Unbind {
                            target: other_image.target(),
                            site,
                        });
                    }
                    ops.push(EditOp::Bind {
                        a: target,
                        site_a: c.site,
                        b: other_image.target(),
                        site_b: site,
                    });
                }
            }
        }
    }
    Ok(EditScript::new(ops))
}

fn validate_script(
    name: &str,
    lhs: &Pattern,
    script: &EditScript,
    signatures: &Signatures,
) -> Result<(), ModelError> {
    let fail = |reason: String| Err(ModelError::invalid_rule(name, reason));

    let mut fresh_types: Vec<Option<AgentType>> = vec![None; script.fresh_count()];
    let mut removed: BTreeSet<usize> = BTreeSet::new();
    for op in script.ops() {
        match *op {
            EditOp::Create { fresh, agent_type } => {
                if signatures.get(agent_type).is_none() {
                    return fail(format!("creates undeclared agent type {:?}", agent_type));
                }
                match fresh_types.get_mut(fresh) {
                    Some(entry) if entry.is_none() => *entry = Some(agent_type),
                    _ => return fail(format!("fresh agent {} is created twice or out of range", fresh)),
                }
            }
            EditOp::Remove { slot } => {
                if lhs.slot(slot).is_none() {
                    return fail(format!("removes empty or missing slot {}", slot));
                }
                if !removed.insert(slot) {
                    return fail(format!("removes slot {} twice", slot));
                }
            }
            _ => {}
        }
    }

    let type_of = |target: Target| -> Option<AgentType> {
        match target {
            Target::Slot(slot) => lhs.slot(slot).map(|t: &AgentTemplate| t.agent_type),
            Target::Fresh(i) => fresh_types.get(i).copied().flatten(),
        }
    };
    let check_site = |target: Target, site: SiteId| -> Result<AgentType, ModelError> {
        if let Target::Slot(slot) = target {
            if removed.contains(&slot) {
                return Err(ModelError::invalid_rule(name, format!("uses slot {} after removing it", slot)));
            }
        }
        let ty = type_of(target)
            .ok_or_else(|| ModelError::invalid_rule(name, format!("refers to unknown agent {:?}", target)))?;
        if site.index() >= signatures.site_count(ty) {
            return Err(ModelError::unknown_site(signatures.type_name(ty), format!("#{}", site.0)));
        }
        Ok(ty)
    };

    let mut bound_ends: BTreeSet<(Target, SiteId)> = BTreeSet::new();
    for op in script.ops() {
        match *op {
            EditOp::Unbind { target, site } => {
                if matches!(target, Target::Fresh(_)) {
                    return fail("unbinds a site of a freshly created agent".into());
                }
                check_site(target, site)?;
            }
            EditOp::SetState { target, site, state } => {
                let ty = check_site(target, site)?;
                if !signatures.in_domain(ty, site, state) {
                    return fail(format!("state {:?} is outside the domain of site {:?}", state, site));
                }
            }
            EditOp::Bind { a, site_a, b, site_b } => {
                check_site(a, site_a)?;
                check_site(b, site_b)?;
                if (a, site_a) == (b, site_b) {
                    return fail("binds a site to itself".into());
                }
                if !bound_ends.insert((a, site_a)) || !bound_ends.insert((b, site_b)) {
                    return fail("binds the same site twice".into());
                }
            }
            EditOp::Create { .. } | EditOp::Remove { .. } => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitegraph_core::pattern::{AgentSpec, PatternSpec, SiteSpec};
    use sitegraph_core::signature::AgentSignature;
    use std::sync::Arc;

    fn signatures() -> Arc<Signatures> {
        Arc::new(
            Signatures::new()
                .with(AgentSignature::new("A").site("x").site_with_states("s", &["u", "p"]))
                .unwrap()
                .with(AgentSignature::new("B").site("x"))
                .unwrap(),
        )
    }

    fn compile(sigs: &Signatures, spec: PatternSpec) -> Pattern {
        spec.compile(sigs).unwrap()
    }

    #[test]
    fn binding_rule_unbinds_nothing_when_sites_are_free() {
        let sigs = signatures();
        let lhs = compile(&sigs, PatternSpec::new().agent(AgentSpec::new("A").free("x")).agent(AgentSpec::new("B").free("x")));
        let rhs = compile(&sigs, PatternSpec::new().agent(AgentSpec::new("A").label("x", 1)).agent(AgentSpec::new("B").label("x", 1)));
        let rule = Rule::from_patterns("bind", lhs, &rhs, 1.0).unwrap();
        assert_eq!(
            rule.script().ops(),
            &[EditOp::Bind { a: Target::Slot(0), site_a: SiteId(0), b: Target::Slot(1), site_b: SiteId(0) }]
        );
    }

    #[test]
    fn derived_scripts_are_phase_ordered() {
        let sigs = signatures();
        // A(x[1], s{u}), B(x[1]) -> A(x[.], s{p}), ., B(x[.])
        let lhs = compile(
            &sigs,
            PatternSpec::new()
                .agent(AgentSpec::new("A").label("x", 1).site(SiteSpec::new("s").state("u")))
                .agent(AgentSpec::new("B").label("x", 1))
                .empty_slot(),
        );
        let rhs = compile(
            &sigs,
            PatternSpec::new()
                .agent(AgentSpec::new("A").free("x").site(SiteSpec::new("s").state("p")))
                .empty_slot()
                .agent(AgentSpec::new("B").free("x")),
        );
        let rule = Rule::from_patterns("cleave", lhs, &rhs, 2.0).unwrap();
        let phases: Vec<u8> = rule.script().ops().iter().map(EditOp::phase).collect();
        let mut sorted = phases.clone();
        sorted.sort();
        assert_eq!(phases, sorted);
        assert!(rule.script().ops().contains(&EditOp::Remove { slot: 1 }));
        assert!(rule.script().ops().contains(&EditOp::Create { fresh: 0, agent_type: AgentType(1) }));
        assert!(rule
            .script()
            .ops()
            .contains(&EditOp::SetState { target: Target::Slot(0), site: SiteId(1), state: StateId(1) }));
    }

    #[test]
    fn right_hand_side_must_be_concrete() {
        let sigs = signatures();
        let lhs = compile(&sigs, PatternSpec::new().agent(AgentSpec::new("A")));
        let open = compile(&sigs, PatternSpec::new().agent(AgentSpec::new("A").site(SiteSpec::new("x").bound())));
        assert!(matches!(Rule::from_patterns("r", lhs.clone(), &open, 1.0), Err(ModelError::InvalidRule { .. })));
        let two = compile(&sigs, PatternSpec::new().agent(AgentSpec::new("A")).agent(AgentSpec::new("A")));
        assert!(matches!(Rule::from_patterns("r", lhs.clone(), &two, 1.0), Err(ModelError::SlotMismatch { .. })));
        assert!(matches!(Rule::from_patterns("r", lhs.clone(), &lhs, -1.0), Err(ModelError::InvalidRate { .. })));
    }

    #[test]
    fn apply_realises_the_rewrite() {
        let sigs = signatures();
        let mut mix = Mixture::new(sigs.clone());
        let (a, _) = mix.create_agent(AgentType(0)).unwrap();
        let (b, _) = mix.create_agent(AgentType(1)).unwrap();

        let lhs = compile(&sigs, PatternSpec::new().agent(AgentSpec::new("A").free("x")).agent(AgentSpec::new("B").free("x")));
        let rhs = compile(
            &sigs,
            PatternSpec::new()
                .agent(AgentSpec::new("A").label("x", 1).site(SiteSpec::new("s").state("p")))
                .agent(AgentSpec::new("B").label("x", 1)),
        );
        let (fwd, rev) = Rule::reversible("bind", lhs, rhs, 1.0, 0.5).unwrap();
        assert_eq!(rev.name(), "bind (reverse)");

        let (delta, fresh) = fwd.apply(&mut mix, &[Some(a), Some(b)]).unwrap();
        assert!(fresh.is_empty());
        assert!(delta.sites.contains(&Location::new(a, SiteId(0))));
        assert_eq!(mix.partner(Location::new(a, SiteId(0))), Some(Location::new(b, SiteId(0))));
        assert_eq!(mix.state(Location::new(a, SiteId(1))), Some(StateId(1)));

        // Applying again must fail before touching anything.
        let err = fwd.apply(&mut mix, &[Some(a), Some(b)]).unwrap_err();
        assert_eq!(err, MixtureError::AlreadyBound(Location::new(a, SiteId(0))));
        assert_eq!(mix.bond_count(), 1);

        rev.apply(&mut mix, &[Some(a), Some(b)]).unwrap();
        assert_eq!(mix.bond_count(), 0);
        mix.check_integrity().unwrap();
    }

    #[test]
    fn explicit_scripts_are_validated() {
        let sigs = signatures();
        let lhs = compile(&sigs, PatternSpec::new().agent(AgentSpec::new("A")));
        let after_removal = vec![
            EditOp::Remove { slot: 0 },
            EditOp::SetState { target: Target::Slot(0), site: SiteId(1), state: StateId(0) },
        ];
        assert!(Rule::with_script("r", lhs.clone(), after_removal, 1.0, &sigs).is_err());

        let bad_state = vec![EditOp::SetState { target: Target::Slot(0), site: SiteId(1), state: StateId(5) }];
        assert!(Rule::with_script("r", lhs.clone(), bad_state, 1.0, &sigs).is_err());

        let spawn = vec![
            EditOp::Bind { a: Target::Slot(0), site_a: SiteId(0), b: Target::Fresh(0), site_b: SiteId(0) },
            EditOp::Create { fresh: 0, agent_type: AgentType(1) },
        ];
        let rule = Rule::with_script("spawn", lhs, spawn, 1.0, &sigs).unwrap();
        assert!(matches!(rule.script().ops()[0], EditOp::Create { .. }));

        let mut mix = Mixture::new(sigs);
        let (a, _) = mix.create_agent(AgentType(0)).unwrap();
        let (delta, fresh) = rule.apply(&mut mix, &[Some(a)]).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(delta.created, BTreeSet::from([fresh[0]]));
        assert_eq!(mix.partner(Location::new(fresh[0], SiteId(0))), Some(Location::new(a, SiteId(0))));
    }

    #[test]
    fn fresh_agents_are_addressed_by_their_declared_number() {
        let sigs = signatures();
        let lhs = compile(&sigs, PatternSpec::new().agent(AgentSpec::new("A").free("x")));
        let ops = vec![
            EditOp::Create { fresh: 1, agent_type: AgentType(0) },
            EditOp::Create { fresh: 0, agent_type: AgentType(1) },
            EditOp::Bind { a: Target::Slot(0), site_a: SiteId(0), b: Target::Fresh(0), site_b: SiteId(0) },
        ];
        let rule = Rule::with_script("spawn-b", lhs, ops, 1.0, &sigs).unwrap();

        let mut mix = Mixture::new(sigs);
        let (a, _) = mix.create_agent(AgentType(0)).unwrap();
        let (_, fresh) = rule.apply(&mut mix, &[Some(a)]).unwrap();
        assert_eq!(fresh.len(), 2);
        assert_eq!(mix.agent_type(fresh[0]), Some(AgentType(1)));
        assert_eq!(mix.agent_type(fresh[1]), Some(AgentType(0)));

        let partner = mix.partner(Location::new(a, SiteId(0))).unwrap();
        assert_eq!(partner, Location::new(fresh[0], SiteId(0)));
        assert_eq!(mix.agent_type(partner.agent), Some(AgentType(1)));
        mix.check_integrity().unwrap();
    }

    #[test]
    fn molecular_split_names_and_validates_rules() {
        let sigs = signatures();
        let free = compile(&sigs, PatternSpec::new().agent(AgentSpec::new("A").free("x")).agent(AgentSpec::new("A").free("x")));
        let bound = compile(&sigs, PatternSpec::new().agent(AgentSpec::new("A").label("x", 1)).agent(AgentSpec::new("A").label("x", 1)));

        let rules = Rule::by_molecularity("dimerise", free.clone(), &bound, 1.0, 2.0).unwrap();
        let names: Vec<&str> = rules.iter().map(Rule::name).collect();
        assert_eq!(names, ["dimerise (bimolecular)", "dimerise (unimolecular)"]);
        assert_eq!(rules[0].molecularity(), Molecularity::Bimolecular);
        assert_eq!(rules[1].molecularity(), Molecularity::Unimolecular);
        assert_eq!(rules[0].script(), rules[1].script());

        let only_uni = Rule::by_molecularity("dimerise", free, &bound, 0.0, 2.0).unwrap();
        assert_eq!(only_uni.len(), 1);
        assert_eq!(only_uni[0].molecularity(), Molecularity::Unimolecular);

        // A connected left-hand side has one component, not two.
        let single = Rule::from_patterns("unbind", bound.clone(), &bound, 1.0).unwrap();
        assert!(matches!(
            single.clone().with_molecularity(Molecularity::Bimolecular),
            Err(ModelError::InvalidRule { .. })
        ));
        assert!(single.with_molecularity(Molecularity::Unimolecular).is_ok());
    }
}
