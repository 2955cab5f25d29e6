use super::statistic::StatCategory;
use super::statistic::Statistic;
use crate::dist::student_t_quantile;
use std::cell::Cell;

/// arithmetic mean with Welford's running recurrence for the second moment.
/// observation weights are ignored; use `WeightedMeanEstimator` for
/// time-weighted measures.
pub struct MeanEstimator {
    level: f64,
    count: Cell<usize>,
    mean: Cell<f64>,
    m2: Cell<f64>,
    enabled: Cell<bool>,
}

impl MeanEstimator {
    pub fn new(level: f64) -> Self {
        Self {
            level,
            count: Cell::new(0),
            mean: Cell::new(0.0),
            m2: Cell::new(0.0),
            enabled: Cell::new(true),
        }
    }
}

impl Default for MeanEstimator {
    fn default() -> Self {
        Self::new(crate::DEFAULT_CONFIDENCE_LEVEL)
    }
}

impl Statistic for MeanEstimator {
    fn collect(&self, value: f64, _weight: f64) {
        let count = self.count.get() + 1;
        self.count.set(count);
        let delta = value - self.mean.get();
        self.mean.set(self.mean.get() + delta / count as f64);
        self.m2.set(self.m2.get() + delta * (value - self.mean.get()));
    }

    fn reset(&self) {
        self.count.set(0);
        self.mean.set(0.0);
        self.m2.set(0.0);
    }

    fn category(&self) -> StatCategory {
        StatCategory::Mean
    }

    fn name(&self) -> String {
        "Mean".to_string()
    }

    fn num_observations(&self) -> usize {
        self.count.get()
    }

    fn estimate(&self) -> f64 {
        self.mean.get()
    }

    fn variance(&self) -> f64 {
        match self.count.get() {
            n if n > 1 => self.m2.get() / (n - 1) as f64,
            _ => f64::INFINITY,
        }
    }

    fn half_width(&self) -> f64 {
        match self.count.get() {
            n if n > 1 => {
                let t = student_t_quantile((1.0 + self.level) / 2.0, (n - 1) as f64);
                t * self.standard_deviation() / (n as f64).sqrt()
            }
            _ => f64::INFINITY,
        }
    }

    fn confidence_level(&self) -> f64 {
        self.level
    }

    fn relative_precision(&self) -> f64 {
        match (self.estimate(), self.count.get()) {
            (e, n) if e != 0.0 && n > 1 => self.half_width() / e.abs(),
            _ => f64::INFINITY,
        }
    }

    fn enabled(&self) -> bool {
        self.enabled.get()
    }

    fn enable(&self, value: bool) {
        self.enabled.set(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_the_naive_mean_and_variance() {
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let stat = MeanEstimator::default();
        for &x in &xs {
            stat.collect(x, 1.0);
        }
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
        assert!((stat.estimate() - mean).abs() < 1e-12);
        assert!((stat.variance() - var).abs() < 1e-12);
    }

    #[test]
    fn single_observation_has_infinite_width() {
        let stat = MeanEstimator::default();
        stat.collect(1.0, 1.0);
        assert!(stat.half_width().is_infinite());
        assert!(stat.relative_precision().is_infinite());
    }

    #[test]
    fn half_width_shrinks_with_the_sample() {
        let stat = MeanEstimator::default();
        for i in 0..10 {
            stat.collect(if i % 2 == 0 { 9.0 } else { 11.0 }, 1.0);
        }
        let coarse = stat.half_width();
        for i in 0..90 {
            stat.collect(if i % 2 == 0 { 9.0 } else { 11.0 }, 1.0);
        }
        assert!(stat.half_width() < coarse);
    }

    #[test]
    fn reset_clears_the_accumulators() {
        let stat = MeanEstimator::default();
        stat.collect(5.0, 1.0);
        stat.reset();
        assert!(stat.num_observations() == 0);
        assert!(stat.estimate() == 0.0);
    }
}
