use super::statistic::StatCategory;
use super::statistic::Statistic;
use crate::dist::student_t_quantile;
use std::cell::Cell;

/// weighted mean with West's numerically stable running update. weights are
/// typically time spans (queue lengths) or batch sizes.
pub struct WeightedMeanEstimator {
    level: f64,
    count: Cell<usize>,
    mean: Cell<f64>,
    s2: Cell<f64>,
    sum_weights: Cell<f64>,
    enabled: Cell<bool>,
}

impl WeightedMeanEstimator {
    pub fn new(level: f64) -> Self {
        Self {
            level,
            count: Cell::new(0),
            mean: Cell::new(0.0),
            s2: Cell::new(0.0),
            sum_weights: Cell::new(0.0),
            enabled: Cell::new(true),
        }
    }
}

impl Default for WeightedMeanEstimator {
    fn default() -> Self {
        Self::new(crate::DEFAULT_CONFIDENCE_LEVEL)
    }
}

impl Statistic for WeightedMeanEstimator {
    fn collect(&self, value: f64, weight: f64) {
        let count = self.count.get() + 1;
        self.count.set(count);
        let q = value - self.mean.get();
        let sum = self.sum_weights.get() + weight;
        self.sum_weights.set(sum);
        self.mean.set(self.mean.get() + q * weight / sum);
        if count > 1 {
            self.s2.set(self.s2.get() + weight * q * (value - self.mean.get()));
        }
    }

    fn reset(&self) {
        self.count.set(0);
        self.mean.set(0.0);
        self.s2.set(0.0);
        self.sum_weights.set(0.0);
    }

    fn category(&self) -> StatCategory {
        StatCategory::WeightedMean
    }

    fn name(&self) -> String {
        "Weighted Mean".to_string()
    }

    fn num_observations(&self) -> usize {
        self.count.get()
    }

    fn estimate(&self) -> f64 {
        self.mean.get()
    }

    fn variance(&self) -> f64 {
        match self.count.get() {
            n if n > 1 => self.s2.get() / self.sum_weights.get(),
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
    fn unit_weights_reduce_to_the_plain_mean() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let stat = WeightedMeanEstimator::default();
        for &x in &xs {
            stat.collect(x, 1.0);
        }
        assert!((stat.estimate() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn matches_the_naive_weighted_mean() {
        let data = [(1.0, 2.0), (5.0, 1.0), (3.0, 4.0), (2.0, 0.5)];
        let stat = WeightedMeanEstimator::default();
        for &(x, w) in &data {
            stat.collect(x, w);
        }
        let sw = data.iter().map(|&(_, w)| w).sum::<f64>();
        let mean = data.iter().map(|&(x, w)| x * w).sum::<f64>() / sw;
        assert!((stat.estimate() - mean).abs() < 1e-12);
        let var = data.iter().map(|&(x, w)| w * (x - mean).powi(2)).sum::<f64>() / sw;
        assert!((stat.variance() - var).abs() < 1e-12);
    }

    #[test]
    fn weight_scaling_preserves_the_estimate() {
        let a = WeightedMeanEstimator::default();
        let b = WeightedMeanEstimator::default();
        for (x, w) in [(1.0, 1.0), (7.0, 3.0), (4.0, 2.0)] {
            a.collect(x, w);
            b.collect(x, 10.0 * w);
        }
        assert!((a.estimate() - b.estimate()).abs() < 1e-12);
        assert!((a.variance() - b.variance()).abs() < 1e-12);
    }
}
