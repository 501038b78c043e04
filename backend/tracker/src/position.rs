//! # Position refinement
//!
//! Continuous geolocation reports a point plus an accuracy radius. Samples are
//! consumed until one is accurate enough, the sample budget runs out or the
//! time window closes. The settled fix is the most accurate sample seen.
use serde::{Deserialize, Serialize};

use crate::geo::Coordinates;

pub const TARGET_ACCURACY_M: f64 = 10.0;
pub const MAX_SAMPLES: usize = 5;
pub const TIME_BUDGET_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    #[serde(flatten)]
    pub coords: Coordinates,
    pub accuracy_m: f64,
    /// Milliseconds on the reporting device's clock.
    #[serde(default)]
    pub at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefineStep {
    Continue,
    Settled(PositionSample),
}

#[derive(Debug, Clone, Default)]
pub struct PositionRefiner {
    best: Option<PositionSample>,
    started_ms: Option<u64>,
    samples: usize,
    settled: bool,
}

impl PositionRefiner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn best(&self) -> Option<PositionSample> {
        self.best
    }

    pub fn push(&mut self, sample: PositionSample) -> RefineStep {
        if self.settled {
            return self.best.map_or(RefineStep::Continue, RefineStep::Settled);
        }

        let started = *self.started_ms.get_or_insert(sample.at_ms);
        let elapsed = sample.at_ms.saturating_sub(started);

        if elapsed > TIME_BUDGET_MS {
            if let Some(best) = self.best {
                self.settled = true;
                return RefineStep::Settled(best);
            }
        }

        self.samples += 1;

        let improves = match self.best {
            Some(best) => sample.accuracy_m < best.accuracy_m,
            None => true,
        };
        if improves && sample.accuracy_m.is_finite() {
            self.best = Some(sample);
        }

        let exhausted = self.samples >= MAX_SAMPLES || elapsed >= TIME_BUDGET_MS;
        let accurate = sample.accuracy_m <= TARGET_ACCURACY_M;

        match self.best {
            Some(best) if accurate || exhausted => {
                self.settled = true;
                RefineStep::Settled(best)
            }
            _ => RefineStep::Continue,
        }
    }
}

/// Runs a finite batch of samples in order, returning the fix it settles on.
pub fn refine<I>(samples: I) -> Option<PositionSample>
where
    I: IntoIterator<Item = PositionSample>,
{
    let mut refiner = PositionRefiner::new();

    for sample in samples {
        if let RefineStep::Settled(fix) = refiner.push(sample) {
            return Some(fix);
        }
    }

    refiner.best()
}
