//! System: one trajectory of a rule-based model.
//!
//! The system owns the mixture, the embedding index, the registered rules,
//! observables and variables, the scheduler and the clock. Each step:
//! 1. Rule activities are computed from rates and index sizes
//! 2. The scheduler draws the waiting time, the rule and its embeddings
//! 3. The clock advances
//! 4. The rule's edit script is applied to the mixture
//! 5. The index absorbs the resulting delta
//!
//! Every outside mutation goes through the same mixture operations and the
//! same index update as a rule firing.

use crate::embedding_index::{ComponentId, EmbeddingIndex};
use crate::molecularity::{self, ComplexLabels};
use crate::rule::{Molecularity, Rule};
use crate::scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use sitegraph_core::error::{ConsistencyError, MixtureError, ModelError, Result, RuntimeError, SimError};
use sitegraph_core::expr::{Env, Expr};
use sitegraph_core::matcher::Embedding;
use sitegraph_core::mixture::{Delta, Mixture, UnbindPolicy};
use sitegraph_core::pattern::{Pattern, PatternSpec};
use sitegraph_core::signature::Signatures;
use sitegraph_core::snapshot::MixtureSnapshot;
use sitegraph_core::types::{AgentId, AgentType, SiteId, StateId, Time};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// RNG seed. Entropy-seeded when absent.
    pub seed: Option<u64>,
    /// Behaviour of `unbind` on an already free site.
    pub unbind_policy: UnbindPolicy,
    /// Compare the index with a full rematch every this many events
    /// (0 = never).
    pub consistency_check_interval: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: None,
            unbind_policy: UnbindPolicy::Lenient,
            consistency_check_interval: 0,
        }
    }
}

/// What one call to [`System::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum StepOutcome {
    /// A rule fired and the mixture changed.
    Event { rule: usize, time: Time },
    /// A rule was drawn but its component embeddings overlapped; the clock
    /// advanced and nothing else changed.
    Null { rule: usize, time: Time },
    /// No rule can fire. The clock did not move.
    Quiescent { time: Time },
}

impl StepOutcome {
    pub fn time(&self) -> Time {
        match *self {
            StepOutcome::Event { time, .. }
            | StepOutcome::Null { time, .. }
            | StepOutcome::Quiescent { time } => time,
        }
    }

    pub fn is_quiescent(&self) -> bool {
        matches!(self, StepOutcome::Quiescent { .. })
    }
}

/// Result of one of the `run_*` helpers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunSummary {
    pub start_time: Time,
    pub end_time: Time,
    pub events: u64,
    pub null_events: u64,
    pub quiescent: bool,
}

/// Statistics about the system.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub time: Time,
    pub events: u64,
    pub null_events: u64,
    pub rule_firings: BTreeMap<String, u64>,
    pub agents: usize,
    pub bonds: usize,
    pub complexes: usize,
    pub indexed_components: usize,
}

/// Everything needed to diagnose a failed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDump {
    pub time: Time,
    pub events: u64,
    pub rule: Option<String>,
    pub mixture: MixtureSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Running,
    Aborted,
}

#[derive(Debug, Clone)]
struct RuleEntry {
    rule: Rule,
    components: Vec<ComponentId>,
    fired: u64,
}

/// A named pattern whose embedding count is tracked.
#[derive(Debug, Clone)]
pub struct Observable {
    pub name: String,
    pub pattern: Pattern,
    components: Vec<ComponentId>,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub expr: Expr,
}

pub struct System {
    config: SimulationConfig,
    signatures: Arc<Signatures>,
    mixture: Mixture,
    index: EmbeddingIndex,
    rules: Vec<RuleEntry>,
    observables: Vec<Observable>,
    observable_names: HashMap<String, usize>,
    variables: Vec<Variable>,
    variable_names: HashMap<String, usize>,
    scheduler: Scheduler,
    time: Time,
    events: u64,
    null_events: u64,
    status: Status,
}

impl System {
    pub fn new(signatures: Arc<Signatures>, config: SimulationConfig) -> Self {
        let mixture = Mixture::new(signatures.clone()).with_policy(config.unbind_policy);
        Self {
            scheduler: Scheduler::new(config.seed),
            config,
            signatures,
            mixture,
            index: EmbeddingIndex::new(),
            rules: Vec::new(),
            observables: Vec::new(),
            observable_names: HashMap::new(),
            variables: Vec::new(),
            variable_names: HashMap::new(),
            time: 0.0,
            events: 0,
            null_events: 0,
            status: Status::Running,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn signatures(&self) -> &Arc<Signatures> {
        &self.signatures
    }

    pub fn mixture(&self) -> &Mixture {
        &self.mixture
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    pub fn time(&self) -> Time {
        self.time
    }

    /// Productive events fired so far.
    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn null_events(&self) -> u64 {
        self.null_events
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_aborted(&self) -> bool {
        self.status == Status::Aborted
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rule(&self, index: usize) -> Option<&Rule> {
        self.rules.get(index).map(|e| &e.rule)
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().map(|e| &e.rule)
    }

    pub fn rule_index(&self, name: &str) -> Option<usize> {
        self.rules.iter().position(|e| e.rule.name() == name)
    }

    pub fn observables(&self) -> &[Observable] {
        &self.observables
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    // ── Registration ─────────────────────────────────────────────────────

    /// Register a rule and index its left-hand side. Rate expressions may
    /// only reference already declared variables and observables.
    pub fn add_rule(&mut self, rule: Rule) -> Result<usize> {
        if self.rule_index(rule.name()).is_some() {
            return Err(ModelError::DuplicateName(rule.name().to_string()).into());
        }
        if let Some(expr) = rule.rate().expr() {
            self.check_references(expr)?;
        }
        let components = self.index.register_pattern(rule.lhs(), &self.mixture);
        info!(rule = rule.name(), components = components.len(), "rule registered");
        self.rules.push(RuleEntry {
            rule,
            components,
            fired: 0,
        });
        Ok(self.rules.len() - 1)
    }

    pub fn add_observable(&mut self, name: impl Into<String>, pattern: Pattern) -> Result<usize> {
        let name = name.into();
        if self.observable_names.contains_key(&name) {
            return Err(ModelError::DuplicateName(name).into());
        }
        let components = self.index.register_pattern(&pattern, &self.mixture);
        self.observable_names.insert(name.clone(), self.observables.len());
        self.observables.push(Observable {
            name,
            pattern,
            components,
        });
        Ok(self.observables.len() - 1)
    }

    /// Declare a variable. Its expression may reference earlier variables
    /// and registered observables only, which also rules out cycles.
    pub fn define_variable(&mut self, name: impl Into<String>, expr: Expr) -> Result<()> {
        let name = name.into();
        if self.variable_names.contains_key(&name) {
            return Err(ModelError::DuplicateName(name).into());
        }
        self.check_references(&expr)?;
        self.variable_names.insert(name.clone(), self.variables.len());
        self.variables.push(Variable { name, expr });
        Ok(())
    }

    fn check_references(&self, expr: &Expr) -> Result<()> {
        if let Some(name) = expr.variables().into_iter().find(|v| !self.variable_names.contains_key(*v)) {
            return Err(ModelError::UnknownVariable(name.to_string()).into());
        }
        if let Some(name) = expr.observables().into_iter().find(|o| !self.observable_names.contains_key(*o)) {
            return Err(ModelError::UnknownObservable(name.to_string()).into());
        }
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Embedding count of an observable: the product of its components'
    /// counts.
    pub fn count_observable(&self, name: &str) -> Result<u64> {
        let idx = self
            .observable_names
            .get(name)
            .ok_or_else(|| ModelError::UnknownObservable(name.to_string()))?;
        Ok(self.index.product(&self.observables[*idx].components))
    }

    /// Every observable with its current count, in registration order.
    pub fn observable_values(&self) -> Vec<(&str, u64)> {
        self.observables
            .iter()
            .map(|o| (o.name.as_str(), self.index.product(&o.components)))
            .collect()
    }

    pub fn variable_value(&self, name: &str) -> Result<f64> {
        let idx = self
            .variable_names
            .get(name)
            .ok_or_else(|| ModelError::UnknownVariable(name.to_string()))?;
        Ok(self.variables[*idx].expr.eval(self)?)
    }

    /// Left-hand tuples a rule currently counts (1 for an empty left-hand
    /// side). Restricted rules only count tuples of their molecularity.
    pub fn rule_embeddings(&self, rule: usize) -> u64 {
        let labels = self.complex_labels();
        self.rules
            .get(rule)
            .map_or(0, |e| self.tuple_count(e, labels.as_ref()) as u64)
    }

    /// Complex labels for the current mixture, if any rule needs them.
    fn complex_labels(&self) -> Option<ComplexLabels> {
        self.rules
            .iter()
            .any(|e| e.rule.molecularity() != Molecularity::Any)
            .then(|| ComplexLabels::of(&self.mixture))
    }

    fn tuple_count(&self, entry: &RuleEntry, labels: Option<&ComplexLabels>) -> f64 {
        match labels {
            Some(labels) => molecularity::count(&self.index, &entry.components, entry.rule.molecularity(), labels),
            None => self.index.weight(&entry.components),
        }
    }

    /// Activity of every rule in registration order. A rule with no
    /// embeddings has activity 0 whatever its rate.
    pub fn activities(&self) -> Result<Vec<f64>> {
        self.activities_with(self.complex_labels().as_ref())
    }

    fn activities_with(&self, labels: Option<&ComplexLabels>) -> Result<Vec<f64>> {
        self.rules
            .iter()
            .map(|entry| -> Result<f64> {
                let count = self.tuple_count(entry, labels);
                if count == 0.0 {
                    return Ok(0.0);
                }
                let rate = entry.rule.rate().eval(self)?;
                let activity = rate * count;
                if !(rate >= 0.0 && activity.is_finite()) {
                    return Err(RuntimeError::InvalidActivity {
                        rule: entry.rule.name().to_string(),
                        value: activity,
                    }
                    .into());
                }
                Ok(activity)
            })
            .collect()
    }

    // ── Outside mutations ────────────────────────────────────────────────

    fn absorb(&mut self, delta: &Delta) {
        self.index.on_mixture_delta(&self.mixture, delta);
    }

    pub fn create_agent(&mut self, ty: AgentType) -> Result<AgentId> {
        let (id, delta) = self.mixture.create_agent(ty)?;
        self.absorb(&delta);
        Ok(id)
    }

    pub fn remove_agent(&mut self, id: AgentId) -> Result<()> {
        let delta = self.mixture.remove_agent(id)?;
        self.absorb(&delta);
        Ok(())
    }

    pub fn set_site_state(&mut self, id: AgentId, site: SiteId, state: StateId) -> Result<()> {
        let delta = self.mixture.set_site_state(id, site, state)?;
        self.absorb(&delta);
        Ok(())
    }

    pub fn bind(&mut self, a: AgentId, site_a: SiteId, b: AgentId, site_b: SiteId) -> Result<()> {
        let delta = self.mixture.bind(a, site_a, b, site_b)?;
        self.absorb(&delta);
        Ok(())
    }

    pub fn unbind(&mut self, id: AgentId, site: SiteId) -> Result<()> {
        let delta = self.mixture.unbind(id, site)?;
        self.absorb(&delta);
        Ok(())
    }

    /// Add `copies` instances of a fully specified pattern.
    pub fn instantiate(&mut self, pattern: &Pattern, copies: usize) -> Result<Vec<Vec<AgentId>>> {
        pattern.check_instantiable()?;
        let mut delta = Delta::default();
        let mut created = Vec::with_capacity(copies);
        for _ in 0..copies {
            match self.mixture.instantiate(pattern) {
                Ok((ids, d)) => {
                    delta.merge(d);
                    created.push(ids);
                }
                Err(err) => {
                    self.absorb(&delta);
                    return Err(err);
                }
            }
        }
        self.absorb(&delta);
        debug!(copies, agents = self.mixture.len(), "instantiated pattern");
        Ok(created)
    }

    pub fn instantiate_spec(&mut self, spec: &PatternSpec, copies: usize) -> Result<Vec<Vec<AgentId>>> {
        let pattern = spec.compile(&self.signatures)?;
        self.instantiate(&pattern, copies)
    }

    /// Remove a set of agents in one delta.
    pub fn remove_agents(&mut self, ids: &[AgentId]) -> Result<()> {
        if let Some(&missing) = ids.iter().find(|id| !self.mixture.contains(**id)) {
            return Err(MixtureError::NotFound(missing).into());
        }
        let mut delta = Delta::default();
        for &id in ids {
            if self.mixture.contains(id) {
                delta.merge(self.mixture.remove_agent(id)?);
            }
        }
        self.absorb(&delta);
        Ok(())
    }

    // ── Simulation ───────────────────────────────────────────────────────

    fn ensure_running(&self) -> Result<()> {
        match self.status {
            Status::Running => Ok(()),
            Status::Aborted => Err(RuntimeError::Aborted.into()),
        }
    }

    /// Fire one event.
    pub fn step(&mut self) -> Result<StepOutcome> {
        self.ensure_running()?;
        let labels = self.complex_labels();
        let activities = match self.activities_with(labels.as_ref()) {
            Ok(activities) => activities,
            Err(err) => return Err(self.abort(None, err)),
        };
        let selection = match self.scheduler.select(&activities) {
            Ok(Some(selection)) => selection,
            Ok(None) => return Ok(StepOutcome::Quiescent { time: self.time }),
            Err(err) => return Err(self.abort(None, err.into())),
        };
        let rule = selection.rule;

        let entry = &self.rules[rule];
        let sampled = match (entry.rule.molecularity(), labels.as_ref()) {
            (Molecularity::Any, _) | (_, None) => self.scheduler.sample_embeddings(&self.index, &entry.components),
            (restricted, Some(labels)) => {
                molecularity::sample(self.scheduler.rng(), &self.index, &entry.components, restricted, labels)
            }
        };
        let embeddings = match sampled {
            Ok(embeddings) => embeddings,
            Err(err) => return Err(self.abort(Some(rule), err.into())),
        };

        self.time += selection.dt;
        let outcome = match self.assignment(rule, &embeddings) {
            None => {
                self.null_events += 1;
                debug!(rule = self.rules[rule].rule.name(), time = self.time, "null event");
                StepOutcome::Null {
                    rule,
                    time: self.time,
                }
            }
            Some(assignment) => {
                let applied = self.rules[rule].rule.apply(&mut self.mixture, &assignment);
                let (delta, _) = match applied {
                    Ok(result) => result,
                    Err(source) => {
                        let err = ConsistencyError::RuleApplication {
                            rule: self.rules[rule].rule.name().to_string(),
                            source,
                            dump: self.dump_json(Some(rule)),
                        };
                        return Err(self.abort(Some(rule), err.into()));
                    }
                };
                self.index.on_mixture_delta(&self.mixture, &delta);
                self.rules[rule].fired += 1;
                self.events += 1;
                debug!(
                    rule = self.rules[rule].rule.name(),
                    time = self.time,
                    touched = delta.sites.len(),
                    created = delta.created.len(),
                    removed = delta.removed.len(),
                    "event"
                );
                StepOutcome::Event {
                    rule,
                    time: self.time,
                }
            }
        };
        self.scheduler.complete();

        let interval = self.config.consistency_check_interval;
        if interval > 0 && matches!(outcome, StepOutcome::Event { .. }) && self.events % interval == 0 {
            if let Err(err) = self.verify_consistency() {
                return Err(self.abort(Some(rule), err.into()));
            }
        }
        Ok(outcome)
    }

    /// Map left-hand slots to agents through the sampled component
    /// embeddings; `None` if two components picked the same agent.
    fn assignment(&self, rule: usize, embeddings: &[Embedding]) -> Option<Vec<Option<AgentId>>> {
        let lhs = self.rules[rule].rule.lhs();
        let mut assignment = vec![None; lhs.len()];
        let mut used: Vec<AgentId> = Vec::with_capacity(lhs.agent_count());
        for (component, embedding) in lhs.components().iter().zip(embeddings) {
            for (local, &slot) in component.slots.iter().enumerate() {
                let agent = embedding.agent(local)?;
                if used.contains(&agent) {
                    return None;
                }
                used.push(agent);
                assignment[slot] = Some(agent);
            }
        }
        Some(assignment)
    }

    /// Run until the clock reaches `horizon`. The event that crosses the
    /// horizon is applied, so the clock ends at or past it unless the run
    /// went quiescent first.
    pub fn run_until_time(&mut self, horizon: Time) -> Result<RunSummary> {
        self.run_observed(horizon, |_, _| {})
    }

    /// Schedule `count` events (null events included).
    pub fn run_events(&mut self, count: u64) -> Result<RunSummary> {
        let mut summary = self.begin_run();
        for _ in 0..count {
            if self.record(&mut summary)? {
                break;
            }
        }
        Ok(self.finish_run(summary))
    }

    /// Step while `condition` holds for the current state.
    pub fn run_while<F>(&mut self, mut condition: F) -> Result<RunSummary>
    where
        F: FnMut(&System) -> bool,
    {
        let mut summary = self.begin_run();
        while condition(self) {
            if self.record(&mut summary)? {
                break;
            }
        }
        Ok(self.finish_run(summary))
    }

    /// Run until `horizon`, handing the system and each step's outcome to
    /// `observer` after every step.
    pub fn run_observed<F>(&mut self, horizon: Time, mut observer: F) -> Result<RunSummary>
    where
        F: FnMut(&System, &StepOutcome),
    {
        let mut summary = self.begin_run();
        while self.time < horizon {
            let outcome = self.step()?;
            tally(&mut summary, &outcome);
            observer(self, &outcome);
            if outcome.is_quiescent() {
                break;
            }
        }
        Ok(self.finish_run(summary))
    }

    fn begin_run(&self) -> RunSummary {
        RunSummary {
            start_time: self.time,
            end_time: self.time,
            events: 0,
            null_events: 0,
            quiescent: false,
        }
    }

    /// Step once and tally; true when the run went quiescent.
    fn record(&mut self, summary: &mut RunSummary) -> Result<bool> {
        let outcome = self.step()?;
        tally(summary, &outcome);
        Ok(outcome.is_quiescent())
    }

    fn finish_run(&self, mut summary: RunSummary) -> RunSummary {
        summary.end_time = self.time;
        info!(
            start = summary.start_time,
            end = summary.end_time,
            events = summary.events,
            null_events = summary.null_events,
            quiescent = summary.quiescent,
            "run finished"
        );
        summary
    }

    // ── Consistency ──────────────────────────────────────────────────────

    /// Check mixture integrity and compare the index with a full rematch.
    pub fn verify_consistency(&self) -> std::result::Result<(), ConsistencyError> {
        self.mixture.check_integrity()?;
        self.index.verify(&self.mixture)
    }

    fn abort(&mut self, rule: Option<usize>, err: SimError) -> SimError {
        let dump = self.dump_json(rule);
        error!(error = %err, time = self.time, events = self.events, dump = %dump, "simulation aborted");
        self.status = Status::Aborted;
        err
    }

    // ── State exchange ───────────────────────────────────────────────────

    pub fn snapshot(&self) -> MixtureSnapshot {
        self.mixture.snapshot()
    }

    pub fn dump(&self, rule: Option<usize>) -> StateDump {
        StateDump {
            time: self.time,
            events: self.events,
            rule: rule.and_then(|r| self.rules.get(r)).map(|e| e.rule.name().to_string()),
            mixture: self.mixture.snapshot(),
        }
    }

    fn dump_json(&self, rule: Option<usize>) -> String {
        serde_json::to_string(&self.dump(rule)).unwrap_or_else(|e| format!("<dump failed: {}>", e))
    }

    /// Replace the mixture with one produced elsewhere and advance the
    /// clock. Every registered pattern is rematched from scratch.
    pub fn adopt(&mut self, snapshot: &MixtureSnapshot, elapsed: Time, events: u64) -> Result<()> {
        self.ensure_running()?;
        let mixture = Mixture::from_snapshot(self.signatures.clone(), snapshot, self.config.unbind_policy)?;
        warn!(components = self.index.len(), "adopting external mixture, discarding incremental index state");
        self.mixture = mixture;
        self.index.rebuild(&self.mixture);
        self.time += elapsed;
        self.events += events;
        info!(time = self.time, agents = self.mixture.len(), "snapshot adopted");
        Ok(())
    }

    /// Restore clock and counters, e.g. from a saved session.
    pub fn set_clock(&mut self, time: Time, events: u64) {
        self.time = time;
        self.events = events;
    }

    /// Restore the null-event count and per-rule firing counts. Rules
    /// missing from `rule_firings` restart at zero; a name this system has
    /// no rule for is an error and changes nothing.
    pub fn restore_tallies(&mut self, null_events: u64, rule_firings: &BTreeMap<String, u64>) -> Result<()> {
        if let Some(name) = rule_firings.keys().find(|name| self.rule_index(name).is_none()) {
            return Err(ModelError::invalid_rule(name.as_str(), "saved firing count for a rule this system lacks").into());
        }
        for entry in &mut self.rules {
            entry.fired = rule_firings.get(entry.rule.name()).copied().unwrap_or(0);
        }
        self.null_events = null_events;
        Ok(())
    }

    pub fn stats(&self) -> SystemStats {
        SystemStats {
            time: self.time,
            events: self.events,
            null_events: self.null_events,
            rule_firings: self
                .rules
                .iter()
                .map(|e| (e.rule.name().to_string(), e.fired))
                .collect(),
            agents: self.mixture.len(),
            bonds: self.mixture.bond_count(),
            complexes: self.mixture.complex_count(),
            indexed_components: self.index.len(),
        }
    }
}

fn tally(summary: &mut RunSummary, outcome: &StepOutcome) {
    match outcome {
        StepOutcome::Event { .. } => summary.events += 1,
        StepOutcome::Null { .. } => summary.null_events += 1,
        StepOutcome::Quiescent { .. } => summary.quiescent = true,
    }
}

impl Env for System {
    fn variable(&self, name: &str) -> Option<f64> {
        let idx = self.variable_names.get(name)?;
        self.variables[*idx].expr.eval(self).ok()
    }

    fn observable(&self, name: &str) -> Option<f64> {
        self.count_observable(name).ok().map(|n| n as f64)
    }

    fn time(&self) -> f64 {
        self.time
    }

    fn events(&self) -> u64 {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::EditOp;
    use sitegraph_core::pattern::AgentSpec;
    use sitegraph_core::signature::AgentSignature;

    fn system(seed: u64) -> System {
        let sigs = Signatures::new()
            .with(AgentSignature::new("A").site("x"))
            .unwrap()
            .with(AgentSignature::new("B").site("x"))
            .unwrap();
        System::new(
            Arc::new(sigs),
            SimulationConfig {
                seed: Some(seed),
                consistency_check_interval: 10,
                ..Default::default()
            },
        )
    }

    fn pattern(sys: &System, spec: PatternSpec) -> Pattern {
        spec.compile(sys.signatures()).unwrap()
    }

    fn free_pair() -> PatternSpec {
        PatternSpec::new()
            .agent(AgentSpec::new("A").free("x"))
            .agent(AgentSpec::new("B").free("x"))
    }

    fn bound_pair() -> PatternSpec {
        PatternSpec::new()
            .agent(AgentSpec::new("A").label("x", 1))
            .agent(AgentSpec::new("B").label("x", 1))
    }

    #[test]
    fn empty_system_is_quiescent() {
        let mut sys = system(1);
        let lhs = pattern(&sys, free_pair());
        let rhs = pattern(&sys, bound_pair());
        sys.add_rule(Rule::from_patterns("bind", lhs, &rhs, 1.0).unwrap()).unwrap();
        assert_eq!(sys.step().unwrap(), StepOutcome::Quiescent { time: 0.0 });
        assert_eq!(sys.time(), 0.0);
    }

    #[test]
    fn binding_runs_to_completion() {
        let mut sys = system(2);
        let lhs = pattern(&sys, free_pair());
        let rhs = pattern(&sys, bound_pair());
        sys.add_rule(Rule::from_patterns("bind", lhs, &rhs, 1.0).unwrap()).unwrap();
        sys.add_observable("AB", pattern(&sys, bound_pair())).unwrap();
        sys.instantiate_spec(&PatternSpec::new().agent(AgentSpec::new("A")).agent(AgentSpec::new("B")), 5)
            .unwrap();

        let summary = sys.run_until_time(f64::INFINITY).unwrap();
        assert!(summary.quiescent);
        // Disconnected left-hand sides may clash, but never for A/B pairs.
        assert_eq!(summary.events, 5);
        assert_eq!(sys.count_observable("AB").unwrap(), 5);
        assert_eq!(sys.stats().rule_firings["bind"], 5);
        sys.verify_consistency().unwrap();
    }

    #[test]
    fn clashing_components_give_null_events() {
        let mut sys = system(3);
        // Two A's dimerising through their single site.
        let lhs = pattern(&sys, PatternSpec::new().agent(AgentSpec::new("A").free("x")).agent(AgentSpec::new("A").free("x")));
        let rhs = pattern(&sys, PatternSpec::new().agent(AgentSpec::new("A").label("x", 1)).agent(AgentSpec::new("A").label("x", 1)));
        sys.add_rule(Rule::from_patterns("dimerise", lhs, &rhs, 1.0).unwrap()).unwrap();
        sys.instantiate_spec(&PatternSpec::new().agent(AgentSpec::new("A")), 2).unwrap();

        // Count is 2 x 2 = 4, of which 2 pick the same agent twice.
        assert_eq!(sys.rule_embeddings(0), 4);
        let summary = sys.run_until_time(f64::INFINITY).unwrap();
        assert_eq!(summary.events, 1);
        assert_eq!(sys.mixture().bond_count(), 1);
        assert_eq!(sys.null_events(), summary.null_events);
    }

    #[test]
    fn registration_rejects_bad_references() {
        let mut sys = system(4);
        let lhs = pattern(&sys, free_pair());
        let rhs = pattern(&sys, bound_pair());
        let rate = Expr::var("k") * Expr::num(2.0);
        let rule = Rule::from_patterns("bind", lhs.clone(), &rhs, rate).unwrap();
        assert!(matches!(sys.add_rule(rule.clone()), Err(SimError::Model(ModelError::UnknownVariable(_)))));

        sys.define_variable("k", Expr::obs("AB")).unwrap_err();
        sys.add_observable("AB", pattern(&sys, bound_pair())).unwrap();
        sys.define_variable("k", Expr::obs("AB") + Expr::num(1.0)).unwrap();
        sys.add_rule(rule.clone()).unwrap();
        assert!(matches!(sys.add_rule(rule), Err(SimError::Model(ModelError::DuplicateName(_)))));
        assert_eq!(sys.variable_value("k").unwrap(), 1.0);
    }

    #[test]
    fn negative_rate_expression_aborts_the_run() {
        let mut sys = system(5);
        let lhs = pattern(&sys, free_pair());
        let rhs = pattern(&sys, bound_pair());
        let rate = Expr::num(1.0) - Expr::Time - Expr::num(2.0);
        sys.add_rule(Rule::from_patterns("bind", lhs, &rhs, rate).unwrap()).unwrap();
        sys.instantiate_spec(&PatternSpec::new().agent(AgentSpec::new("A")).agent(AgentSpec::new("B")), 1)
            .unwrap();
        assert!(matches!(
            sys.step(),
            Err(SimError::Runtime(RuntimeError::InvalidActivity { .. }))
        ));
        assert!(sys.is_aborted());
        assert!(matches!(sys.step(), Err(SimError::Runtime(RuntimeError::Aborted))));
        assert_eq!(sys.time(), 0.0);
    }

    #[test]
    fn observable_driven_negative_rate_aborts_the_run() {
        let mut sys = system(5);
        let single_a = PatternSpec::new().agent(AgentSpec::new("A"));
        sys.add_observable("nA", pattern(&sys, single_a.clone())).unwrap();
        let lhs = pattern(&sys, single_a);
        let decay = Rule::with_script(
            "decay",
            lhs,
            vec![EditOp::Remove { slot: 0 }],
            Expr::num(0.0) - Expr::obs("nA"),
            sys.signatures(),
        )
        .unwrap();
        sys.add_rule(decay).unwrap();
        for _ in 0..3 {
            sys.create_agent(AgentType(0)).unwrap();
        }

        match sys.step() {
            Err(SimError::Runtime(RuntimeError::InvalidActivity { rule, value })) => {
                assert_eq!(rule, "decay");
                assert_eq!(value, -9.0);
            }
            other => panic!("expected an invalid activity, got {:?}", other),
        }
        assert!(sys.is_aborted());
        assert_eq!(sys.mixture().len(), 3);
    }

    #[test]
    fn outside_mutations_keep_the_index_exact() {
        let mut sys = system(6);
        sys.add_observable("AB", pattern(&sys, bound_pair())).unwrap();
        sys.add_observable("freeA", pattern(&sys, PatternSpec::new().agent(AgentSpec::new("A").free("x"))))
            .unwrap();
        let a = sys.create_agent(AgentType(0)).unwrap();
        let b = sys.create_agent(AgentType(1)).unwrap();
        assert_eq!(sys.count_observable("freeA").unwrap(), 1);
        sys.bind(a, SiteId(0), b, SiteId(0)).unwrap();
        assert_eq!(sys.count_observable("AB").unwrap(), 1);
        assert_eq!(sys.count_observable("freeA").unwrap(), 0);
        sys.remove_agents(&[b]).unwrap();
        assert_eq!(sys.count_observable("AB").unwrap(), 0);
        assert_eq!(sys.count_observable("freeA").unwrap(), 1);
        sys.verify_consistency().unwrap();
    }

    #[test]
    fn adopt_rematches_everything() {
        let mut sys = system(7);
        sys.add_observable("AB", pattern(&sys, bound_pair())).unwrap();
        let mut other = Mixture::new(sys.signatures().clone());
        let dimer = pattern(&sys, bound_pair());
        other.instantiate(&dimer).unwrap();
        other.instantiate(&dimer).unwrap();

        sys.adopt(&other.snapshot(), 2.5, 9).unwrap();
        assert_eq!(sys.count_observable("AB").unwrap(), 2);
        assert_eq!(sys.time(), 2.5);
        assert_eq!(sys.events(), 9);
        sys.verify_consistency().unwrap();
    }
}
