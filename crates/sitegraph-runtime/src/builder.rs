//! System builder.
//!
//! Collects a model by name (signatures, initial population, observables,
//! variables, rules and configuration) and compiles all of it on
//! [`SystemBuilder::build`]. The first model error aborts the build.
//!
//! # Example
//!
//! ```rust
//! use sitegraph_core::prelude::*;
//! use sitegraph_runtime::builder::SystemBuilder;
//!
//! let bound = PatternSpec::new()
//!     .agent(AgentSpec::new("A").label("x", 1))
//!     .agent(AgentSpec::new("B").label("x", 1));
//! let free = PatternSpec::new()
//!     .agent(AgentSpec::new("A").free("x"))
//!     .agent(AgentSpec::new("B").free("x"));
//!
//! let mut system = SystemBuilder::new()
//!     .signature(AgentSignature::new("A").site("x"))
//!     .signature(AgentSignature::new("B").site("x"))
//!     .population(PatternSpec::new().agent(AgentSpec::new("A")), 10)
//!     .population(PatternSpec::new().agent(AgentSpec::new("B")), 10)
//!     .observable("AB", bound.clone())
//!     .reversible_rule("bind", free, bound, 1.0, 0.5)
//!     .seed(7)
//!     .build()
//!     .unwrap();
//!
//! system.run_until_time(1.0).unwrap();
//! assert_eq!(system.mixture().len(), 20);
//! ```

use crate::rule::{Rate, Rule};
use crate::system::{SimulationConfig, System};
use sitegraph_core::error::Result;
use sitegraph_core::expr::Expr;
use sitegraph_core::mixture::UnbindPolicy;
use sitegraph_core::pattern::PatternSpec;
use sitegraph_core::signature::{AgentSignature, Signatures};
use std::sync::Arc;
use tracing::info;

enum RuleDecl {
    Pair {
        name: String,
        lhs: PatternSpec,
        rhs: PatternSpec,
        rate: Rate,
        reverse: Option<Rate>,
    },
    Molecular {
        name: String,
        lhs: PatternSpec,
        rhs: PatternSpec,
        bimolecular: Rate,
        unimolecular: Rate,
        reverse: Option<Rate>,
    },
    Compiled(Rule),
}

/// Builder for a [`System`].
#[derive(Default)]
pub struct SystemBuilder {
    signatures: Vec<AgentSignature>,
    population: Vec<(PatternSpec, usize)>,
    observables: Vec<(String, PatternSpec)>,
    variables: Vec<(String, Expr)>,
    rules: Vec<RuleDecl>,
    config: SimulationConfig,
}

impl SystemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signature(mut self, signature: AgentSignature) -> Self {
        self.signatures.push(signature);
        self
    }

    /// `copies` instances of a fully specified pattern in the initial
    /// mixture.
    pub fn population(mut self, pattern: PatternSpec, copies: usize) -> Self {
        self.population.push((pattern, copies));
        self
    }

    pub fn observable(mut self, name: impl Into<String>, pattern: PatternSpec) -> Self {
        self.observables.push((name.into(), pattern));
        self
    }

    /// Variables are defined in call order; each may reference the ones
    /// before it and any observable.
    pub fn variable(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.variables.push((name.into(), expr));
        self
    }

    pub fn rule(
        mut self,
        name: impl Into<String>,
        lhs: PatternSpec,
        rhs: PatternSpec,
        rate: impl Into<Rate>,
    ) -> Self {
        self.rules.push(RuleDecl::Pair {
            name: name.into(),
            lhs,
            rhs,
            rate: rate.into(),
            reverse: None,
        });
        self
    }

    /// A rule and its reverse; see [`Rule::reversible`].
    pub fn reversible_rule(
        mut self,
        name: impl Into<String>,
        lhs: PatternSpec,
        rhs: PatternSpec,
        forward: impl Into<Rate>,
        reverse: impl Into<Rate>,
    ) -> Self {
        self.rules.push(RuleDecl::Pair {
            name: name.into(),
            lhs,
            rhs,
            rate: forward.into(),
            reverse: Some(reverse.into()),
        });
        self
    }

    /// `lhs -> rhs` split by molecularity: one rate for left-hand components
    /// in different complexes, one for components inside one complex, and
    /// an optional unrestricted reverse. See [`Rule::by_molecularity`].
    pub fn molecular_rule(
        mut self,
        name: impl Into<String>,
        lhs: PatternSpec,
        rhs: PatternSpec,
        bimolecular: impl Into<Rate>,
        unimolecular: impl Into<Rate>,
        reverse: Option<Rate>,
    ) -> Self {
        self.rules.push(RuleDecl::Molecular {
            name: name.into(),
            lhs,
            rhs,
            bimolecular: bimolecular.into(),
            unimolecular: unimolecular.into(),
            reverse,
        });
        self
    }

    /// An already compiled rule. It must have been compiled against
    /// signatures declared in the same order as this builder's.
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(RuleDecl::Compiled(rule));
        self
    }

    pub fn config(mut self, config: SimulationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn unbind_policy(mut self, policy: UnbindPolicy) -> Self {
        self.config.unbind_policy = policy;
        self
    }

    pub fn consistency_check_interval(mut self, interval: u64) -> Self {
        self.config.consistency_check_interval = interval;
        self
    }

    /// The signatures declared so far, compiled.
    pub fn signatures(&self) -> Result<Signatures> {
        let mut sigs = Signatures::new();
        for sig in &self.signatures {
            sigs.add(sig.clone())?;
        }
        Ok(sigs)
    }

    /// Compile everything. Observables come first, then variables, then
    /// rules, and the initial population last.
    pub fn build(self) -> Result<System> {
        let signatures = Arc::new(self.signatures()?);
        let mut system = System::new(signatures.clone(), self.config);

        for (name, spec) in self.observables {
            let pattern = spec.compile(&signatures)?;
            system.add_observable(name, pattern)?;
        }
        for (name, expr) in self.variables {
            system.define_variable(name, expr)?;
        }
        for decl in self.rules {
            match decl {
                RuleDecl::Compiled(rule) => {
                    system.add_rule(rule)?;
                }
                RuleDecl::Pair {
                    name,
                    lhs,
                    rhs,
                    rate,
                    reverse,
                } => {
                    let lhs = lhs.compile(&signatures)?;
                    let rhs = rhs.compile(&signatures)?;
                    match reverse {
                        None => {
                            system.add_rule(Rule::from_patterns(name, lhs, &rhs, rate)?)?;
                        }
                        Some(reverse) => {
                            let (fwd, back) = Rule::reversible(name, lhs, rhs, rate, reverse)?;
                            system.add_rule(fwd)?;
                            system.add_rule(back)?;
                        }
                    }
                }
                RuleDecl::Molecular {
                    name,
                    lhs,
                    rhs,
                    bimolecular,
                    unimolecular,
                    reverse,
                } => {
                    let lhs = lhs.compile(&signatures)?;
                    let rhs = rhs.compile(&signatures)?;
                    for rule in Rule::by_molecularity(name.clone(), lhs.clone(), &rhs, bimolecular, unimolecular)? {
                        system.add_rule(rule)?;
                    }
                    if let Some(reverse) = reverse {
                        system.add_rule(Rule::from_patterns(format!("{} (reverse)", name), rhs, &lhs, reverse)?)?;
                    }
                }
            }
        }
        for (spec, copies) in self.population {
            system.instantiate_spec(&spec, copies)?;
        }

        info!(
            agent_types = signatures.len(),
            rules = system.rule_count(),
            observables = system.observables().len(),
            agents = system.mixture().len(),
            "system built"
        );
        Ok(system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitegraph_core::error::{ModelError, SimError};
    use sitegraph_core::pattern::AgentSpec;

    fn base() -> SystemBuilder {
        SystemBuilder::new()
            .signature(AgentSignature::new("A").site("x").site_with_states("p", &["u", "p"]))
            .signature(AgentSignature::new("B").site("x"))
            .seed(3)
    }

    #[test]
    fn builds_population_and_rules() {
        let sys = base()
            .population(
                PatternSpec::new()
                    .agent(AgentSpec::new("A").label("x", 1))
                    .agent(AgentSpec::new("B").label("x", 1)),
                4,
            )
            .observable("A", PatternSpec::new().agent(AgentSpec::new("A")))
            .reversible_rule(
                "bind",
                PatternSpec::new()
                    .agent(AgentSpec::new("A").free("x"))
                    .agent(AgentSpec::new("B").free("x")),
                PatternSpec::new()
                    .agent(AgentSpec::new("A").label("x", 1))
                    .agent(AgentSpec::new("B").label("x", 1)),
                1.0,
                2.0,
            )
            .build()
            .unwrap();
        assert_eq!(sys.mixture().len(), 8);
        assert_eq!(sys.mixture().bond_count(), 4);
        assert_eq!(sys.count_observable("A").unwrap(), 4);
        assert_eq!(sys.rule_count(), 2);
        assert_eq!(sys.rule(1).unwrap().name(), "bind (reverse)");
        assert_eq!(sys.rule_embeddings(0), 0);
        assert_eq!(sys.rule_embeddings(1), 4);
    }

    #[test]
    fn model_errors_abort_the_build() {
        let unknown_site = base()
            .observable("bad", PatternSpec::new().agent(AgentSpec::new("A").free("y")))
            .build();
        assert!(matches!(unknown_site, Err(SimError::Model(ModelError::UnknownSite { .. }))));

        let forward_reference = base()
            .variable("k", Expr::var("later"))
            .variable("later", Expr::num(1.0))
            .build();
        assert!(matches!(forward_reference, Err(SimError::Model(ModelError::UnknownVariable(_)))));

        let duplicate = base().signature(AgentSignature::new("B")).build();
        assert!(matches!(duplicate, Err(SimError::Model(ModelError::DuplicateAgentType(_)))));
    }

    #[test]
    fn partial_population_is_rejected() {
        let res = base()
            .population(PatternSpec::new().agent(AgentSpec::new("A").free("x")).empty_slot(), 1)
            .build();
        assert!(matches!(res, Err(SimError::Model(ModelError::Underspecified(_)))));
    }
}
