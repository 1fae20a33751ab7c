//! # Sitegraph Runtime
//!
//! Drives trajectories of rule-based site-graph models.
//!
//! The runtime keeps every registered pattern's embeddings exact as the
//! mixture changes, draws events with Gillespie's direct method and applies
//! the chosen rule's edit script. One [`System`](system::System) is one
//! trajectory; a [`Simulation`](backend::Simulation) pairs it with a backend.

pub mod backend;
pub mod builder;
pub mod embedding_index;
pub mod molecularity;
pub mod prelude;
pub mod rule;
pub mod scheduler;
pub mod session;
pub mod system;
