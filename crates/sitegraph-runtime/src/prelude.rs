//! Sitegraph Runtime Prelude: convenient imports for common usage.
//!
//! ```rust
//! use sitegraph_runtime::prelude::*;
//! ```

// Re-export the system
pub use crate::system::{
    Observable, RunSummary, SimulationConfig, StateDump, Status, StepOutcome, System, SystemStats,
    Variable,
};

pub use crate::builder::SystemBuilder;

pub use crate::rule::{EditOp, EditScript, Molecularity, Rate, Rule, Target};

pub use crate::molecularity::ComplexLabels;

pub use crate::embedding_index::{ComponentId, EmbeddingIndex};

pub use crate::scheduler::{Scheduler, SchedulerState, Selection};

// Re-export backends
pub use crate::backend::{
    create_backend, Advance, Backend, BackendConfig, Budget, DynBackend, EngineReport,
    ExternalBackend, ExternalEngine, ModelSnapshot, NativeBackend, Simulation,
};

// Re-export session
pub use crate::session::{
    load_session, restore_into_system, save_session, verify_fidelity, SessionMetadata, SessionState,
};

// Re-export from core
pub use sitegraph_core::prelude::*;
