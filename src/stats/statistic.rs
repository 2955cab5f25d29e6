#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatCategory {
    Mean,
    WeightedMean,
    Quantile,
}

/// a point estimator fed with weighted observations and queried for its
/// estimate and confidence interval. implementations use interior
/// mutability so that statistics can be shared across the engine, nodes,
/// and analysis layers under the single-threaded cooperative schedule.
pub trait Statistic {
    fn collect(&self, value: f64, weight: f64);
    fn reset(&self);
    fn category(&self) -> StatCategory;
    fn name(&self) -> String;
    fn num_observations(&self) -> usize;
    fn estimate(&self) -> f64;
    fn variance(&self) -> f64;
    fn standard_deviation(&self) -> f64 {
        self.variance().sqrt()
    }
    fn half_width(&self) -> f64;
    fn confidence_level(&self) -> f64;
    /// half-width over |estimate|; infinite for a zero estimate, since any
    /// error is infinitely large compared with zero
    fn relative_precision(&self) -> f64;
    fn enabled(&self) -> bool;
    fn enable(&self, value: bool);
}

/// renders `est ± sd — C.I. (lo, hi) at L% (r.e. p% — sample size: N)`
pub struct Summary<'a>(pub &'a dyn Statistic);

impl std::fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stat = self.0;
        write!(
            f,
            "{} ± {} — C.I. ({}, {}) at {}% (r.e. {}% — sample size: {})",
            stat.estimate(),
            stat.standard_deviation(),
            stat.estimate() - stat.half_width(),
            stat.estimate() + stat.half_width(),
            stat.confidence_level() * 100.0,
            stat.relative_precision() * 100.0,
            stat.num_observations(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::MeanEstimator;

    #[test]
    fn summary_mentions_the_sample_size() {
        let stat = MeanEstimator::default();
        stat.collect(1.0, 1.0);
        stat.collect(3.0, 1.0);
        let text = format!("{}", Summary(&stat));
        assert!(text.contains("sample size: 2"));
        assert!(text.contains("C.I."));
        assert!(text.starts_with("2 ±"));
    }
}
