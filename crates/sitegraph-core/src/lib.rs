//! # Sitegraph Core
//!
//! Data structures and pure algorithms for rule-based site-graph models.
//!
//! - [`signature`]: declared agent types, their sites and state domains
//! - [`mixture`]: the mutable agent graph and its mutation deltas
//! - [`pattern`]: name-based pattern specs compiled into index-based queries
//! - [`matcher`]: forced-extension matching of connected pattern components
//! - [`expr`]: algebraic expressions for rates and variables
//! - [`snapshot`]: name-based, serialisable mixture snapshots
//!
//! ## Quick Start
//!
//! ```rust
//! use sitegraph_core::prelude::*;
//! use std::sync::Arc;
//!
//! let sigs = Signatures::new()
//!     .with(AgentSignature::new("A").site("x"))
//!     .unwrap()
//!     .with(AgentSignature::new("B").site("x"))
//!     .unwrap();
//! let mut mixture = Mixture::new(Arc::new(sigs));
//!
//! let dimer = PatternSpec::new()
//!     .agent(AgentSpec::new("A").label("x", 1))
//!     .agent(AgentSpec::new("B").label("x", 1))
//!     .compile(mixture.signatures())
//!     .unwrap();
//! mixture.instantiate(&dimer).unwrap();
//! assert_eq!(count_embeddings(&dimer, &mixture), 1);
//! ```

pub mod error;
pub mod expr;
pub mod matcher;
pub mod mixture;
pub mod pattern;
pub mod prelude;
pub mod signature;
pub mod snapshot;
pub mod types;
