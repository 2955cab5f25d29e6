use super::batch_size::BatchSizeDetector;
use super::transient::TransientDetector;
use crate::dist::student_t_quantile;
use crate::stats::Analyzable;
use crate::stats::Report;
use crate::stats::StatCategory;
use crate::stats::Statistic;
use crate::stats::WeightedMeanEstimator;
use std::cell::Cell;
use std::cell::RefCell;

/// analyzable statistic for the batch-means method.
///
/// observations pass warm-up detection, then batch-size detection, then
/// accumulate into batches of the detected size; each completed batch mean
/// feeds the inner statistic, whose spread over batch means carries the
/// confidence interval. optionally, Schmeiser's rule reconsolidates the
/// collected batch means into fewer, longer batches to re-test precision.
pub struct BatchMeansStatistic {
    inner: Box<dyn Statistic>,
    transient: RefCell<Box<dyn TransientDetector>>,
    size_detector: RefCell<Box<dyn BatchSizeDetector>>,
    batch_mean: WeightedMeanEstimator,
    target_precision: f64,
    max_observations: usize,
    min_batches: usize,
    schmeiser: Cell<bool>,
    schmeiser_batches: usize,
    count: Cell<usize>,
    half_width: Cell<f64>,
    precision: Cell<f64>,
    trans_detected: Cell<bool>,
    trans_len: Cell<usize>,
    size_detected: Cell<bool>,
    batch_size: Cell<usize>,
    steady_time: Cell<f64>,
    enabled: Cell<bool>,
    means: RefCell<Vec<f64>>,
}

impl BatchMeansStatistic {
    pub fn new(
        inner: Box<dyn Statistic>,
        transient: Box<dyn TransientDetector>,
        size_detector: Box<dyn BatchSizeDetector>,
        target_precision: f64,
        max_observations: usize,
    ) -> Self {
        let stat = Self {
            inner,
            transient: RefCell::new(transient),
            size_detector: RefCell::new(size_detector),
            batch_mean: WeightedMeanEstimator::default(),
            target_precision,
            max_observations,
            min_batches: crate::DEFAULT_MIN_NUM_BATCHES,
            schmeiser: Cell::new(false),
            schmeiser_batches: crate::DEFAULT_SCHMEISER_BATCHES,
            count: Cell::new(0),
            half_width: Cell::new(f64::INFINITY),
            precision: Cell::new(f64::INFINITY),
            trans_detected: Cell::new(false),
            trans_len: Cell::new(0),
            size_detected: Cell::new(false),
            batch_size: Cell::new(0),
            steady_time: Cell::new(0.0),
            enabled: Cell::new(true),
            means: RefCell::new(Vec::new()),
        };
        stat.pickup_immediate_detectors();
        stat
    }

    pub fn enable_schmeiser_rule(&self) {
        self.schmeiser.set(true);
    }

    pub fn disable_schmeiser_rule(&self) {
        self.schmeiser.set(false);
    }

    pub fn batch_size_detected(&self) -> bool {
        self.size_detected.get()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    pub fn num_batches(&self) -> usize {
        self.inner.num_observations()
    }

    pub fn batch_done(&self) -> bool {
        self.size_detected.get() && self.count.get() % self.batch_size.get() == 0
    }

    fn pickup_immediate_detectors(&self) {
        if self.transient.borrow().detected() {
            self.complete_transient();
        }
        if self.trans_detected.get() && !self.size_detected.get() {
            let det = self.size_detector.borrow();
            if det.detected() {
                self.size_detected.set(true);
                self.batch_size.set(det.estimated_size().max(1));
            }
        }
    }

    fn complete_transient(&self) {
        self.trans_detected.set(true);
        let (length, samples) = {
            let det = self.transient.borrow();
            (det.estimated_length(), det.steady_state_observations())
        };
        self.trans_len.set(length);
        self.transient.borrow_mut().reset();
        // the replay must not double-count observations already seen
        self.count.set(self.count.get().saturating_sub(samples.len()));
        log::debug!(
            "transient over after {} observations; replaying {} steady-state samples",
            length,
            samples.len()
        );
        for (value, weight) in samples {
            self.collect(value, weight);
        }
    }

    fn complete_size(&self) {
        self.size_detected.set(true);
        let (size, means) = {
            let det = self.size_detector.borrow();
            (det.estimated_size(), det.computed_means())
        };
        self.batch_size.set(size.max(1));
        self.size_detector.borrow_mut().reset();
        log::debug!(
            "batch size {} detected; taking back {} batch means",
            self.batch_size.get(),
            means.len()
        );
        for mean in means {
            self.push_batch_mean(mean);
        }
        // the raw count consumed during sizing is rarely a multiple of the
        // detected size; realign it to a batch boundary so every batch from
        // here on holds exactly batch_size observations
        self.count.set(self.num_batches() * self.batch_size.get());
    }

    /// fold a completed batch mean into the inner statistic and refresh the
    /// half-width, optionally re-testing via Schmeiser's reconsolidation
    fn push_batch_mean(&self, mean: f64) {
        self.inner.collect(mean, 1.0);
        let batches = self.num_batches();
        if batches > 1 && batches >= self.min_batches {
            let t = student_t_quantile(
                (1.0 + self.confidence_level()) / 2.0,
                (batches - 1) as f64,
            );
            let hw = t * (self.inner.variance() / batches as f64).sqrt();
            self.half_width.set(hw);
            self.precision.set(match self.inner.estimate() {
                e if e != 0.0 => hw / e.abs(),
                _ => f64::INFINITY,
            });
        }
        if !self.target_precision_reached() && self.schmeiser.get() && self.schmeiser_batches > 0 {
            self.means.borrow_mut().push(mean);
            if batches % self.schmeiser_batches == 0 {
                self.reconsolidate();
            }
        }
    }

    /// Schmeiser 1982: group the collected batch means into
    /// `schmeiser_batches` longer batches and re-test precision with the
    /// reduced degrees of freedom
    fn reconsolidate(&self) {
        let means = self.means.borrow();
        let k = self.schmeiser_batches;
        let per = means.len() / k;
        if k < 2 || per == 0 {
            return;
        }
        let mut grand_mean = 0.0;
        let mut spread = 0.0;
        for j in 0..k {
            let sum = means[j * per..(j + 1) * per].iter().sum::<f64>();
            let mean = sum / per as f64;
            let delta = mean - grand_mean;
            grand_mean += delta / (j + 1) as f64;
            spread += delta * (mean - grand_mean);
        }
        let sd = (spread / (k - 1) as f64).sqrt();
        let t = student_t_quantile((1.0 + self.confidence_level()) / 2.0, (k - 1) as f64);
        let hw = t * sd / (k as f64).sqrt();
        self.half_width.set(hw);
        self.precision.set(match grand_mean {
            m if m != 0.0 => hw / m.abs(),
            _ => f64::INFINITY,
        });
    }
}

impl Statistic for BatchMeansStatistic {
    fn collect(&self, value: f64, weight: f64) {
        if !self.enabled.get() {
            return;
        }
        let count = self.count.get() + 1;
        self.count.set(count);
        if self.max_observations != crate::OBSERVATIONS_INFINITY && count >= self.max_observations
        {
            log::warn!(
                "statistic '{}' will be disabled: collected the maximum {} observations",
                self.name(),
                self.max_observations
            );
            self.enable(false);
            return;
        }
        if self.size_detected.get() {
            self.batch_mean.collect(value, weight);
            if count % self.batch_size.get() == 0 {
                self.push_batch_mean(self.batch_mean.estimate());
                self.batch_mean.reset();
            }
        } else if self.trans_detected.get() {
            let newly = self.size_detector.borrow_mut().detect(value, weight);
            if newly {
                self.complete_size();
            } else if self.size_detector.borrow().aborted() {
                log::warn!(
                    "statistic '{}' will be disabled: batch size detection aborted",
                    self.name()
                );
                self.enable(false);
            }
        } else {
            let newly = self.transient.borrow_mut().detect(value, weight);
            if newly {
                self.complete_transient();
            } else if self.transient.borrow().aborted() {
                log::warn!(
                    "statistic '{}' will be disabled: transient detection aborted",
                    self.name()
                );
                self.enable(false);
            }
        }
    }

    fn reset(&self) {
        self.inner.reset();
        self.transient.borrow_mut().reset();
        self.size_detector.borrow_mut().reset();
        self.batch_mean.reset();
        self.count.set(0);
        self.half_width.set(f64::INFINITY);
        self.precision.set(f64::INFINITY);
        self.trans_detected.set(false);
        self.trans_len.set(0);
        self.size_detected.set(false);
        self.batch_size.set(0);
        self.enabled.set(true);
        self.means.borrow_mut().clear();
        self.pickup_immediate_detectors();
    }

    fn category(&self) -> StatCategory {
        self.inner.category()
    }

    fn name(&self) -> String {
        self.inner.name()
    }

    /// raw observations during warm-up and sizing; batches once batching
    /// has begun
    fn num_observations(&self) -> usize {
        match self.size_detected.get() {
            true => self.num_batches(),
            false => self.count.get(),
        }
    }

    fn estimate(&self) -> f64 {
        self.inner.estimate()
    }

    fn variance(&self) -> f64 {
        match self.num_batches() {
            0 => f64::INFINITY,
            n => self.inner.variance() / n as f64,
        }
    }

    fn half_width(&self) -> f64 {
        self.half_width.get()
    }

    fn confidence_level(&self) -> f64 {
        self.inner.confidence_level()
    }

    fn relative_precision(&self) -> f64 {
        self.precision.get()
    }

    fn enabled(&self) -> bool {
        self.enabled.get()
    }

    fn enable(&self, value: bool) {
        self.enabled.set(value);
    }
}

impl Analyzable for BatchMeansStatistic {
    fn target_relative_precision(&self) -> f64 {
        self.target_precision
    }

    fn max_num_observations(&self) -> usize {
        self.max_observations
    }

    fn steady_state_entered(&self) -> bool {
        self.trans_detected.get()
    }

    fn transient_phase_length(&self) -> usize {
        self.trans_len.get()
    }

    fn steady_state_enter_time(&self) -> f64 {
        self.steady_time.get()
    }

    fn set_steady_state_enter_time(&self, time: f64) {
        self.steady_time.set(time);
    }

    fn observation_complete(&self) -> bool {
        self.batch_done()
    }
}

impl std::fmt::Display for BatchMeansStatistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Report(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FixedBatchSize;
    use crate::analysis::NullTransientDetector;
    use crate::stats::MeanEstimator;
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn fixed_stat(batch: usize) -> BatchMeansStatistic {
        BatchMeansStatistic::new(
            Box::new(MeanEstimator::default()),
            Box::new(NullTransientDetector::default()),
            Box::new(FixedBatchSize::new(batch)),
            crate::DEFAULT_RELATIVE_PRECISION,
            crate::OBSERVATIONS_INFINITY,
        )
    }

    #[test]
    fn batch_means_feed_the_inner_statistic() {
        let stat = fixed_stat(4);
        for i in 0..12 {
            stat.collect(i as f64, 1.0);
        }
        // batches average 1.5, 5.5, 9.5
        assert!(stat.num_batches() == 3);
        assert!((stat.estimate() - 5.5).abs() < 1e-12);
        assert!(stat.observation_complete());
    }

    #[test]
    fn incomplete_batch_is_reported() {
        let stat = fixed_stat(4);
        for i in 0..6 {
            stat.collect(i as f64, 1.0);
        }
        assert!(!stat.observation_complete());
    }

    #[test]
    fn num_observations_counts_batches_after_chunking() {
        let stat = fixed_stat(5);
        for i in 0..20 {
            stat.collect(i as f64, 1.0);
        }
        assert!(stat.num_observations() == 4);
    }

    #[test]
    fn precision_converges_on_stationary_noise() {
        let mut rng = SmallRng::seed_from_u64(17);
        let stat = fixed_stat(10);
        let mut n = 0;
        while !stat.target_precision_reached() {
            stat.collect(1.0 + rng.random::<f64>(), 1.0);
            n += 1;
            assert!(n < 1_000_000);
        }
        assert!(stat.relative_precision() <= crate::DEFAULT_RELATIVE_PRECISION);
    }

    #[test]
    fn detected_batches_hold_exactly_the_detected_size() {
        use crate::analysis::PawlikowskiBatchSize;

        let mut rng = SmallRng::seed_from_u64(5);
        let stat = BatchMeansStatistic::new(
            Box::new(MeanEstimator::default()),
            Box::new(NullTransientDetector::default()),
            Box::new(PawlikowskiBatchSize::new(crate::OBSERVATIONS_INFINITY, 10, 20, 0.1).unwrap()),
            crate::DEFAULT_RELATIVE_PRECISION,
            crate::OBSERVATIONS_INFINITY,
        );
        let mut n = 0usize;
        while !stat.batch_size_detected() {
            stat.collect(rng.random::<f64>(), 1.0);
            n += 1;
            assert!(n < 200_000);
        }
        // the raw count consumed during sizing is not a batch multiple, yet
        // the next batch must still take exactly batch_size observations
        let size = stat.batch_size();
        let batches = stat.num_batches();
        assert!(stat.observation_complete());
        for i in 1..=size {
            stat.collect(rng.random::<f64>(), 1.0);
            assert!(stat.observation_complete() == (i == size));
        }
        assert!(stat.num_batches() == batches + 1);
    }

    #[test]
    fn schmeiser_rule_tightens_the_interval() {
        let mut rng = SmallRng::seed_from_u64(23);
        let plain = fixed_stat(5);
        let ruled = fixed_stat(5);
        ruled.enable_schmeiser_rule();
        for _ in 0..3000 {
            let x = 1.0 + rng.random::<f64>();
            plain.collect(x, 1.0);
            ruled.collect(x, 1.0);
        }
        assert!(ruled.half_width().is_finite());
        assert!(plain.half_width().is_finite());
    }
}
