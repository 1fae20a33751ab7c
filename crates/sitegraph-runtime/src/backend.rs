//! Simulation backends.
//!
//! A backend advances a [`System`] by a time or event budget. The native
//! backend steps the system's own scheduler; the external backend hands a
//! serialised model to another engine and adopts the mixture it returns.
//! [`Simulation`] drives whichever one was configured.

use crate::rule::Rule;
use crate::system::{SimulationConfig, System};
use serde::{Deserialize, Serialize};
use sitegraph_core::error::{Result, RuntimeError};
use sitegraph_core::expr::Expr;
use sitegraph_core::pattern::Pattern;
use sitegraph_core::signature::Signatures;
use sitegraph_core::snapshot::MixtureSnapshot;
use sitegraph_core::types::Time;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// How far to advance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Budget {
    /// Simulated time, relative to the current clock.
    Time(Time),
    /// Scheduled events (null events included).
    Events(u64),
}

/// What one call to [`Backend::advance`] did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Advance {
    pub elapsed: Time,
    pub events: u64,
    pub quiescent: bool,
}

pub trait Backend {
    fn name(&self) -> &str;

    fn advance(&mut self, system: &mut System, budget: Budget) -> Result<Advance>;
}

/// Steps the system's own scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeBackend;

impl Backend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    fn advance(&mut self, system: &mut System, budget: Budget) -> Result<Advance> {
        let summary = match budget {
            Budget::Time(duration) => system.run_until_time(system.time() + duration)?,
            Budget::Events(count) => system.run_events(count)?,
        };
        Ok(Advance {
            elapsed: summary.end_time - summary.start_time,
            events: summary.events,
            quiescent: summary.quiescent,
        })
    }
}

/// Everything an external engine needs to continue a trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub signatures: Signatures,
    pub rules: Vec<Rule>,
    pub variables: Vec<(String, Expr)>,
    pub observables: Vec<(String, Pattern)>,
    pub mixture: MixtureSnapshot,
    pub time: Time,
    pub events: u64,
}

impl ModelSnapshot {
    pub fn capture(system: &System) -> Self {
        Self {
            signatures: system.signatures().as_ref().clone(),
            rules: system.rules().cloned().collect(),
            variables: system
                .variables()
                .iter()
                .map(|v| (v.name.clone(), v.expr.clone()))
                .collect(),
            observables: system
                .observables()
                .iter()
                .map(|o| (o.name.clone(), o.pattern.clone()))
                .collect(),
            mixture: system.snapshot(),
            time: system.time(),
            events: system.events(),
        }
    }

    /// Rebuild a native system from the snapshot.
    pub fn restore(&self, config: SimulationConfig) -> Result<System> {
        let mut system = System::new(Arc::new(self.signatures.clone()), config);
        for (name, pattern) in &self.observables {
            system.add_observable(name.clone(), pattern.clone())?;
        }
        for (name, expr) in &self.variables {
            system.define_variable(name.clone(), expr.clone())?;
        }
        for rule in &self.rules {
            system.add_rule(rule.clone())?;
        }
        system.adopt(&self.mixture, 0.0, 0)?;
        system.set_clock(self.time, self.events);
        Ok(system)
    }
}

/// The result an external engine hands back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineReport {
    pub mixture: MixtureSnapshot,
    pub elapsed: Time,
    pub events: u64,
    #[serde(default)]
    pub quiescent: bool,
}

/// Another simulation engine that can run a model snapshot.
pub trait ExternalEngine {
    fn name(&self) -> &str;

    fn run(&mut self, model: &ModelSnapshot, budget: Budget) -> Result<EngineReport>;
}

/// Delegates to an [`ExternalEngine`] and adopts its result. The system's
/// index is rebuilt from scratch after every call.
pub struct ExternalBackend {
    engine: Box<dyn ExternalEngine>,
}

impl ExternalBackend {
    pub fn new(engine: Box<dyn ExternalEngine>) -> Self {
        Self { engine }
    }

    fn failure(&self, reason: impl Into<String>) -> RuntimeError {
        RuntimeError::Backend {
            backend: self.engine.name().to_string(),
            reason: reason.into(),
        }
    }
}

impl Backend for ExternalBackend {
    fn name(&self) -> &str {
        self.engine.name()
    }

    fn advance(&mut self, system: &mut System, budget: Budget) -> Result<Advance> {
        let model = ModelSnapshot::capture(system);
        let report = self
            .engine
            .run(&model, budget)
            .map_err(|e| self.failure(e.to_string()))?;
        if !(report.elapsed >= 0.0 && report.elapsed.is_finite()) {
            return Err(self.failure(format!("invalid elapsed time {}", report.elapsed)).into());
        }
        system.adopt(&report.mixture, report.elapsed, report.events)?;
        info!(
            backend = self.engine.name(),
            elapsed = report.elapsed,
            events = report.events,
            "external advance adopted"
        );
        Ok(Advance {
            elapsed: report.elapsed,
            events: report.events,
            quiescent: report.quiescent,
        })
    }
}

/// Configuration for backend selection.
#[derive(Default)]
pub enum BackendConfig {
    /// The built-in scheduler (default).
    #[default]
    Native,
    External(Box<dyn ExternalEngine>),
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendConfig::Native => write!(f, "Native"),
            BackendConfig::External(engine) => write!(f, "External({})", engine.name()),
        }
    }
}

impl BackendConfig {
    pub fn native() -> Self {
        BackendConfig::Native
    }

    pub fn external(engine: impl ExternalEngine + 'static) -> Self {
        BackendConfig::External(Box::new(engine))
    }
}

pub type DynBackend = Box<dyn Backend>;

pub fn create_backend(config: BackendConfig) -> DynBackend {
    match config {
        BackendConfig::Native => Box::new(NativeBackend),
        BackendConfig::External(engine) => Box::new(ExternalBackend::new(engine)),
    }
}

/// A system together with the backend that advances it.
pub struct Simulation {
    system: System,
    backend: DynBackend,
}

impl Simulation {
    pub fn new(system: System, config: BackendConfig) -> Self {
        Self {
            system,
            backend: create_backend(config),
        }
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut System {
        &mut self.system
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn advance(&mut self, budget: Budget) -> Result<Advance> {
        self.backend.advance(&mut self.system, budget)
    }

    pub fn into_system(self) -> System {
        self.system
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SystemBuilder;
    use sitegraph_core::pattern::{AgentSpec, PatternSpec};
    use sitegraph_core::signature::AgentSignature;

    fn system() -> System {
        SystemBuilder::new()
            .signature(AgentSignature::new("A").site("x"))
            .population(PatternSpec::new().agent(AgentSpec::new("A")), 6)
            .observable("free", PatternSpec::new().agent(AgentSpec::new("A").free("x")))
            .rule(
                "pair",
                PatternSpec::new()
                    .agent(AgentSpec::new("A").free("x"))
                    .agent(AgentSpec::new("A").free("x")),
                PatternSpec::new()
                    .agent(AgentSpec::new("A").label("x", 1))
                    .agent(AgentSpec::new("A").label("x", 1)),
                1.0,
            )
            .seed(9)
            .build()
            .unwrap()
    }

    #[test]
    fn native_backend_runs_to_quiescence() {
        let mut sim = Simulation::new(system(), BackendConfig::default());
        assert_eq!(sim.backend_name(), "native");
        let advance = sim.advance(Budget::Time(f64::INFINITY)).unwrap();
        assert!(advance.quiescent);
        assert_eq!(advance.events, 3);
        assert_eq!(sim.system().count_observable("free").unwrap(), 0);
    }

    #[test]
    fn event_budget_is_respected() {
        let mut sim = Simulation::new(system(), BackendConfig::native());
        let advance = sim.advance(Budget::Events(1)).unwrap();
        assert!(advance.events <= 1);
        assert!(advance.elapsed > 0.0);
    }

    struct Failing;

    impl ExternalEngine for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn run(&mut self, _: &ModelSnapshot, _: Budget) -> Result<EngineReport> {
            Err(RuntimeError::Aborted.into())
        }
    }

    #[test]
    fn engine_failures_surface_as_backend_errors() {
        let mut sim = Simulation::new(system(), BackendConfig::external(Failing));
        let err = sim.advance(Budget::Time(1.0)).unwrap_err();
        assert!(matches!(
            err,
            sitegraph_core::error::SimError::Runtime(RuntimeError::Backend { .. })
        ));
        assert_eq!(sim.system().time(), 0.0);
    }
}
