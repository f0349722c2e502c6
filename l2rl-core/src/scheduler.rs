use crate::error::L2rlError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};

/// Maps the remaining fraction of the step budget (1 at the start, 0 at the end) to a multiplier
/// of the initial value.
pub type ScheduleFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    Constant,
    #[default]
    Linear,
    #[serde(skip)]
    Custom(ScheduleFn),
}

impl Schedule {
    pub fn custom(f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    fn multiplier(&self, remaining: f64) -> f64 {
        match self {
            Self::Constant => 1.,
            Self::Linear => remaining.max(0.),
            Self::Custom(f) => {
                let m = f(remaining);
                if m.is_nan() { 0. } else { m.clamp(0., 1.) }
            }
        }
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant => f.write_str("Constant"),
            Self::Linear => f.write_str("Linear"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant => f.write_str("constant"),
            Self::Linear => f.write_str("linear"),
            Self::Custom(_) => f.write_str("custom"),
        }
    }
}

impl FromStr for Schedule {
    type Err = L2rlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "constant" => Ok(Self::Constant),
            "linear" => Ok(Self::Linear),
            other => Err(L2rlError::configuration(format!(
                "unknown schedule `{other}`, expected `linear` or `constant`"
            ))),
        }
    }
}

/// Learning rate as a function of how much of the step budget has been consumed.
#[derive(Debug, Clone)]
pub struct Scheduler {
    initial: f64,
    total_steps: usize,
    steps: usize,
    schedule: Schedule,
}

impl Scheduler {
    pub fn new(initial: f64, total_steps: usize, schedule: Schedule) -> Self {
        Self {
            initial,
            total_steps,
            steps: 0,
            schedule,
        }
    }

    fn value_at(&self, step: usize) -> f64 {
        let remaining = if self.total_steps == 0 {
            0.
        } else {
            1. - step as f64 / self.total_steps as f64
        };
        self.initial * self.schedule.multiplier(remaining)
    }

    /// The value at the current step, without consuming it.
    pub fn peek(&self) -> f64 {
        self.value_at(self.steps)
    }

    /// The value [`Scheduler::advance`] would return for `n`, without consuming anything.
    pub fn peek_advance(&self, n: usize) -> f64 {
        self.value_at(self.steps + n.saturating_sub(1))
    }

    /// Returns the current value and consumes one step.
    pub fn value(&mut self) -> f64 {
        let value = self.peek();
        self.steps += 1;
        value
    }

    /// Consumes `n` steps, returning the value of the last one. Same as calling `value` `n` times.
    pub fn advance(&mut self, n: usize) -> f64 {
        if n == 0 {
            return self.peek();
        }
        self.steps += n - 1;
        self.value()
    }

    pub fn steps_consumed(&self) -> usize {
        self.steps
    }

    pub fn initial(&self) -> f64 {
        self.initial
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn constant_returns_initial() {
        let mut scheduler = Scheduler::new(7e-4, 10, Schedule::Constant);
        for _ in 0..25 {
            assert_eq!(scheduler.value(), 7e-4);
        }
    }

    #[test]
    fn linear_decays_to_zero_and_stays() {
        let mut scheduler = Scheduler::new(1., 4, Schedule::Linear);
        let values: Vec<f64> = (0..6).map(|_| scheduler.value()).collect();
        assert_eq!(values, vec![1., 0.75, 0.5, 0.25, 0., 0.]);
    }

    #[test]
    fn linear_is_non_increasing_and_bounded() {
        let initial = 0.3;
        let mut scheduler = Scheduler::new(initial, 97, Schedule::Linear);
        let mut last = f64::INFINITY;
        for _ in 0..200 {
            let v = scheduler.value();
            assert!((0. ..=initial).contains(&v));
            assert!(v <= last);
            last = v;
        }
    }

    #[test]
    fn custom_multipliers_are_clamped() {
        let mut scheduler = Scheduler::new(2., 10, Schedule::custom(|remaining| remaining * 3. - 1.));
        for _ in 0..12 {
            let v = scheduler.value();
            assert!((0. ..=2.).contains(&v), "{v} out of range");
        }
    }

    #[test]
    fn advance_matches_repeated_value_calls() {
        let mut a = Scheduler::new(1., 100, Schedule::Linear);
        let mut b = a.clone();
        assert_eq!(b.initial(), 1.);
        let ahead = b.peek_advance(10);
        assert_eq!(b.steps_consumed(), 0);
        let last = (0..10).map(|_| a.value()).last();
        assert_eq!(Some(ahead), last);
        assert_eq!(Some(b.advance(10)), last);
        assert_eq!(a.steps_consumed(), b.steps_consumed());
    }

    #[test]
    fn unknown_schedule_is_a_configuration_error() {
        let err = "cosine".parse::<Schedule>().unwrap_err();
        assert!(matches!(err, L2rlError::Configuration(_)));
        assert!(matches!("linear".parse::<Schedule>(), Ok(Schedule::Linear)));
    }
}
