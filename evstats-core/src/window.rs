//! Elapsed-time cutoff for event streams.

use crate::error::Result;
use crate::source::EventSource;
use crate::types::Event;
use tracing::info;

/// Maximum event-time span to accumulate, in microseconds.
///
/// Unbounded budgets are positive infinity, so comparisons need no special case.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowBudget {
    duration_us: f64,
}

impl WindowBudget {
    pub fn unbounded() -> Self {
        Self {
            duration_us: f64::INFINITY,
        }
    }

    pub fn from_micros(duration_us: f64) -> Self {
        Self { duration_us }
    }

    /// Sums independently supplied budgets. Parts that are absent or not
    /// strictly positive are ignored; if none remain the budget is unbounded.
    pub fn from_parts(seconds: Option<f64>, ms: Option<f64>, us: Option<f64>) -> Self {
        let parts = [(seconds, 1e6), (ms, 1e3), (us, 1.0)];
        let mut duration_us = 0.0;
        let mut any = false;
        for (value, scale) in parts {
            if let Some(v) = value.filter(|v| *v > 0.0) {
                duration_us += v * scale;
                any = true;
            }
        }
        if any {
            Self::from_micros(duration_us)
        } else {
            Self::unbounded()
        }
    }

    pub fn duration_us(&self) -> f64 {
        self.duration_us
    }

    /// Budget in seconds; infinite when unbounded.
    pub fn duration_seconds(&self) -> f64 {
        self.duration_us * 1e-6
    }

    pub fn is_bounded(&self) -> bool {
        self.duration_us.is_finite()
    }
}

impl Default for WindowBudget {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Verdict for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Continue,
    /// The stream ends here; carries the absolute timestamp of the
    /// rejected event.
    Stop { last_timestamp: i64 },
}

/// One-shot gate closing once an event passes `t_first + duration`.
#[derive(Debug, Clone)]
pub struct WindowPolicy {
    budget: WindowBudget,
    t_offset: i64,
    t_end: Option<f64>,
    stopped_at: Option<i64>,
}

impl WindowPolicy {
    pub fn new(budget: WindowBudget) -> Self {
        Self {
            budget,
            t_offset: 0,
            t_end: None,
            stopped_at: None,
        }
    }

    /// Sets the bias added to timestamps when reporting the stop point.
    pub fn with_t_offset(mut self, t_offset: i64) -> Self {
        self.t_offset = t_offset;
        self
    }

    pub fn budget(&self) -> WindowBudget {
        self.budget
    }

    /// Cutoff timestamp, known once the first event was seen.
    pub fn t_end(&self) -> Option<f64> {
        self.t_end
    }

    /// Absolute timestamp of the event that closed the window, if any.
    pub fn stopped_at(&self) -> Option<i64> {
        self.stopped_at
    }

    pub fn admit(&mut self, event: &Event) -> Admission {
        if let Some(last_timestamp) = self.stopped_at {
            return Admission::Stop { last_timestamp };
        }

        let duration = self.budget.duration_us;
        let t_end = *self.t_end.get_or_insert(event.t as f64 + duration);
        if event.t as f64 > t_end {
            let last_timestamp = event.t.saturating_add(self.t_offset);
            self.stopped_at = Some(last_timestamp);
            return Admission::Stop { last_timestamp };
        }
        Admission::Continue
    }
}

/// Events of a source, truncated at the first one the window rejects.
pub struct Admitted<'w, S> {
    source: S,
    window: &'w mut WindowPolicy,
    done: bool,
}

/// Composes a source with a window policy into one lazy sequence.
pub fn admitted<S: EventSource>(source: S, window: &mut WindowPolicy) -> Admitted<'_, S> {
    Admitted {
        source,
        window,
        done: false,
    }
}

impl<S: EventSource> Iterator for Admitted<'_, S> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let event = match self.source.next_event() {
            Ok(Some(event)) => event,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        match self.window.admit(&event) {
            Admission::Continue => Some(Ok(event)),
            Admission::Stop { last_timestamp } => {
                info!(
                    last_timestamp,
                    t_end = self.window.t_end().unwrap_or(f64::INFINITY),
                    "end of duration reached"
                );
                self.done = true;
                None
            }
        }
    }
}

impl<S: EventSource> std::iter::FusedIterator for Admitted<'_, S> {}
