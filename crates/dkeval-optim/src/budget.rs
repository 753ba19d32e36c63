use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::OptimError;

/// Evaluation and wall-clock limits for one optimizer invocation.
///
/// # Defaults
///
/// | Parameter         | Default |
/// |-------------------|---------|
/// | `max_evaluations` | 500     |
/// | `max_seconds`     | `None`  |
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BudgetFields")]
pub struct Budget {
    max_evaluations: usize,
    max_seconds: Option<f64>,
}

/// Unvalidated wire form of [`Budget`].
#[derive(Deserialize)]
struct BudgetFields {
    max_evaluations: usize,
    max_seconds: Option<f64>,
}

impl TryFrom<BudgetFields> for Budget {
    type Error = OptimError;

    fn try_from(fields: BudgetFields) -> Result<Self, Self::Error> {
        let budget = Self::new(fields.max_evaluations)?;
        match fields.max_seconds {
            None => Ok(budget),
            Some(seconds) => Ok(budget.with_max_duration(
                Duration::try_from_secs_f64(seconds).map_err(|_| OptimError::InvalidDuration { seconds })?,
            )),
        }
    }
}

impl Budget {
    /// Allow at most `max_evaluations` objective evaluations.
    ///
    /// # Errors
    ///
    /// Returns [`OptimError::ZeroBudget`] when `max_evaluations` is zero.
    pub fn new(max_evaluations: usize) -> Result<Self, OptimError> {
        if max_evaluations == 0 {
            return Err(OptimError::ZeroBudget);
        }
        Ok(Self {
            max_evaluations,
            max_seconds: None,
        })
    }

    /// Add a wall-clock limit.
    #[must_use]
    pub fn with_max_duration(mut self, limit: Duration) -> Self {
        self.max_seconds = Some(limit.as_secs_f64());
        self
    }

    /// Return the evaluation cap.
    #[must_use]
    pub fn max_evaluations(&self) -> usize {
        self.max_evaluations
    }

    /// Return the wall-clock limit, if any.
    #[must_use]
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_seconds.and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    /// Start counting against this budget.
    #[must_use]
    pub fn start(&self) -> BudgetTracker {
        BudgetTracker {
            budget: *self,
            started: Instant::now(),
            evaluations: 0,
        }
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_evaluations: 500,
            max_seconds: None,
        }
    }
}

/// Running consumption of a [`Budget`].
#[derive(Debug, Clone)]
pub struct BudgetTracker {
    budget: Budget,
    started: Instant,
    evaluations: usize,
}

impl BudgetTracker {
    /// Count `n` evaluations.
    pub fn record(&mut self, n: usize) {
        self.evaluations += n;
    }

    /// Evaluations counted so far.
    #[must_use]
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Time since [`Budget::start`].
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// `true` once either limit is reached.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.evaluations >= self.budget.max_evaluations
            || self.budget.max_duration().is_some_and(|limit| self.elapsed() >= limit)
    }
}
