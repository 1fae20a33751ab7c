//! Session persistence: save and load a trajectory's state as JSON.
//!
//! A session holds the mixture snapshot, the clock and per-rule firing
//! counts. The model itself (signatures, rules, observables) is not stored;
//! a session is restored into a system built from the same model.

use crate::system::System;
use serde::{Deserialize, Serialize};
use sitegraph_core::error::Result;
use sitegraph_core::snapshot::MixtureSnapshot;
use sitegraph_core::types::Time;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Serializable state of one trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub mixture: MixtureSnapshot,
    #[serde(default)]
    pub rule_firings: BTreeMap<String, u64>,
    pub metadata: SessionMetadata,
}

/// Session metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub time: Time,
    pub events: u64,
    #[serde(default)]
    pub null_events: u64,
    pub agent_count: usize,
    pub bond_count: usize,
}

impl SessionState {
    pub fn capture(system: &System) -> Self {
        let stats = system.stats();
        Self {
            mixture: system.snapshot(),
            rule_firings: stats.rule_firings,
            metadata: SessionMetadata {
                session_id: uuid::Uuid::new_v4().to_string(),
                time: stats.time,
                events: stats.events,
                null_events: stats.null_events,
                agent_count: stats.agents,
                bond_count: stats.bonds,
            },
        }
    }
}

/// Save the system's state to a JSON file, creating parent directories.
pub fn save_session(system: &System, path: &Path) -> Result<SessionMetadata> {
    let state = SessionState::capture(system);
    let json = serde_json::to_string_pretty(&state)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json)?;
    info!(session = %state.metadata.session_id, path = %path.display(), "session saved");
    Ok(state.metadata)
}

/// Load a saved session from JSON.
pub fn load_session(path: &Path) -> Result<SessionState> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Replace the system's mixture, clock and tallies with a saved session's.
/// Every registered pattern is rematched.
pub fn restore_into_system(system: &mut System, state: &SessionState) -> Result<()> {
    let previous = (system.null_events(), system.stats().rule_firings);
    system.restore_tallies(state.metadata.null_events, &state.rule_firings)?;
    if let Err(err) = system.adopt(&state.mixture, 0.0, 0) {
        system.restore_tallies(previous.0, &previous.1)?;
        return Err(err);
    }
    system.set_clock(state.metadata.time, state.metadata.events);
    info!(
        session = %state.metadata.session_id,
        time = state.metadata.time,
        agents = state.metadata.agent_count,
        "session restored"
    );
    Ok(())
}

/// Check that a restored system matches the session it came from: same
/// clock, tallies, agent count and bond count.
pub fn verify_fidelity(system: &System, state: &SessionState) -> bool {
    system.time() == state.metadata.time
        && system.events() == state.metadata.events
        && system.null_events() == state.metadata.null_events
        && system.stats().rule_firings == state.rule_firings
        && system.mixture().len() == state.metadata.agent_count
        && system.mixture().bond_count() == state.metadata.bond_count
}
