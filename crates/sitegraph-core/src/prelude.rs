//! Sitegraph Core Prelude: convenient imports for common usage.
//!
//! ```rust
//! use sitegraph_core::prelude::*;
//! ```

pub use crate::types::{AgentId, AgentType, Location, SiteId, StateId, Time};

pub use crate::error::{ConsistencyError, MixtureError, ModelError, Result, RuntimeError, SimError};

pub use crate::signature::{AgentSignature, SiteSignature, Signatures};

pub use crate::mixture::{Agent, Delta, Link, Mixture, SiteRecord, UnbindPolicy};

pub use crate::pattern::{
    AgentSpec, AgentTemplate, Component, ComponentPattern, LinkConstraint, LinkSpec, Pattern,
    PatternSpec, SiteConstraint, SiteSpec, StateConstraint, StateSpec,
};

pub use crate::matcher::{count_embeddings, Embedding, Matcher};

pub use crate::expr::{BinaryOp, EmptyEnv, Env, Expr, UnaryOp};

pub use crate::snapshot::{AgentSnapshot, LinkSnapshot, MixtureSnapshot, SiteSnapshot};
