//! Event scheduler: Gillespie direct method over rule activities.
//!
//! The scheduler owns the run's random stream. Each step it draws the
//! waiting time, then the firing rule, then one embedding per left-hand
//! component. It does not touch the mixture.

use crate::embedding_index::{ComponentId, EmbeddingIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use sitegraph_core::error::RuntimeError;
use sitegraph_core::matcher::Embedding;

/// The rule chosen to fire and the waiting time before it does.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub rule: usize,
    pub dt: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SchedulerState {
    /// No event pending.
    #[default]
    Idle,
    /// An event was drawn and awaits application.
    Selected(Selection),
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    rng: StdRng,
    state: SchedulerState,
}

impl Scheduler {
    /// Seeded for reproducible runs, or from entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Draw the next event from per-rule activities, in registration order.
    /// `Ok(None)` means total activity is zero: nothing can ever fire again
    /// without an outside change.
    ///
    /// Activities must already be validated as finite and non-negative.
    pub fn select(&mut self, activities: &[f64]) -> Result<Option<Selection>, RuntimeError> {
        let total: f64 = activities.iter().sum();
        if total <= 0.0 {
            self.state = SchedulerState::Idle;
            return Ok(None);
        }
        let exp = Exp::new(total).map_err(|_| RuntimeError::InvalidActivity {
            rule: "<total>".to_string(),
            value: total,
        })?;
        let dt = exp.sample(&mut self.rng);

        let draw = self.rng.gen::<f64>() * total;
        let mut cumulative = 0.0;
        let mut chosen = None;
        for (rule, &activity) in activities.iter().enumerate() {
            if activity <= 0.0 {
                continue;
            }
            // Rounding can leave the draw just past the last interval.
            chosen = Some(rule);
            cumulative += activity;
            if draw < cumulative {
                break;
            }
        }

        let selection = chosen.map(|rule| Selection { rule, dt });
        self.state = match selection {
            Some(s) => SchedulerState::Selected(s),
            None => SchedulerState::Idle,
        };
        Ok(selection)
    }

    /// One uniformly drawn embedding per component, in order.
    pub fn sample_embeddings(
        &mut self,
        index: &EmbeddingIndex,
        components: &[ComponentId],
    ) -> Result<Vec<Embedding>, RuntimeError> {
        components
            .iter()
            .map(|&id| index.sample_uniform(id, &mut self.rng).cloned())
            .collect()
    }

    /// Return to idle once the selected event has been resolved.
    pub fn complete(&mut self) -> Option<Selection> {
        match std::mem::take(&mut self.state) {
            SchedulerState::Selected(s) => Some(s),
            SchedulerState::Idle => None,
        }
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}
