//! # Sitegraph
//!
//! Incremental pattern matching and exact stochastic simulation of
//! rule-based site-graph models.
//!
//! A model declares agent types with named sites. Each site can bind at most
//! one partner and may carry an internal state. Rules rewrite local patterns
//! of agents at a rate proportional to how many times their left-hand side
//! embeds in the current mixture. Those counts are kept exact after every
//! event by an incremental embedding index, so each step costs work
//! proportional to the size of the change rather than the size of the
//! mixture.
//!
//! ## Quick Start
//!
//! ```rust
//! use sitegraph::prelude::*;
//!
//! let free = PatternSpec::new()
//!     .agent(AgentSpec::new("A").free("x"))
//!     .agent(AgentSpec::new("B").free("x"));
//! let bound = PatternSpec::new()
//!     .agent(AgentSpec::new("A").label("x", 1))
//!     .agent(AgentSpec::new("B").label("x", 1));
//!
//! let mut system = SystemBuilder::new()
//!     .signature(AgentSignature::new("A").site("x"))
//!     .signature(AgentSignature::new("B").site("x"))
//!     .population(PatternSpec::new().agent(AgentSpec::new("A")), 100)
//!     .population(PatternSpec::new().agent(AgentSpec::new("B")), 100)
//!     .observable("AB", bound.clone())
//!     .reversible_rule("bind", free, bound, 0.01, 1.0)
//!     .seed(42)
//!     .build()
//!     .unwrap();
//!
//! system.run_until_time(1.0).unwrap();
//! let dimers = system.count_observable("AB").unwrap();
//! assert!(dimers <= 100);
//! ```
//!
//! ## Architecture
//!
//! - [`sitegraph_core`]: signatures, the mixture, patterns, the matcher,
//!   expressions, snapshots and errors
//! - [`sitegraph_runtime`]: the embedding index, rules, the scheduler, the
//!   system, backends and sessions
//!
//! ## Session Persistence
//!
//! ```rust,ignore
//! use sitegraph::prelude::*;
//! use std::path::Path;
//!
//! save_session(&system, Path::new("session.json"))?;
//!
//! let state = load_session(Path::new("session.json"))?;
//! let mut restored = builder.build()?;
//! restore_into_system(&mut restored, &state)?;
//! ```

pub use sitegraph_core as core;
pub use sitegraph_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust
/// use sitegraph::prelude::*;
/// ```
pub mod prelude {
    pub use sitegraph_runtime::prelude::*;
}
