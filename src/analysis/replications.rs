use super::num_replications::NumReplicationsDetector;
use super::replication_size::ReplicationSizeDetector;
use super::transient::TransientDetector;
use crate::stats::Analyzable;
use crate::stats::MeanEstimator;
use crate::stats::Report;
use crate::stats::StatCategory;
use crate::stats::Statistic;
use std::cell::Cell;
use std::cell::RefCell;

/// analyzable statistic for the independent-replications method.
///
/// inside a replication, observations flow through warm-up detection, then
/// replication-size detection, then into the inner statistic; each detector
/// replays the observations it consumed once it decides. across
/// replications, the grand mean over replication means carries the
/// confidence interval, and the num-replications detector decides when
/// enough replications have run.
pub struct ReplicationStatistic {
    inner: Box<dyn Statistic>,
    transient: RefCell<Box<dyn TransientDetector>>,
    size_detector: RefCell<Box<dyn ReplicationSizeDetector>>,
    num_detector: RefCell<Box<dyn NumReplicationsDetector>>,
    grand: MeanEstimator,
    target_precision: f64,
    max_observations: usize,
    min_replications: usize,
    trans_detected: Cell<bool>,
    trans_len: Cell<usize>,
    size_detected: Cell<bool>,
    size: Cell<usize>,
    num_detected: Cell<bool>,
    num_replications: Cell<usize>,
    steady_time: Cell<f64>,
    enabled: Cell<bool>,
}

impl ReplicationStatistic {
    pub fn new(
        inner: Box<dyn Statistic>,
        transient: Box<dyn TransientDetector>,
        size_detector: Box<dyn ReplicationSizeDetector>,
        num_detector: Box<dyn NumReplicationsDetector>,
        target_precision: f64,
        max_observations: usize,
    ) -> Self {
        let level = inner.confidence_level();
        let stat = Self {
            inner,
            transient: RefCell::new(transient),
            size_detector: RefCell::new(size_detector),
            num_detector: RefCell::new(num_detector),
            grand: MeanEstimator::new(level),
            target_precision,
            max_observations,
            min_replications: 2,
            trans_detected: Cell::new(false),
            trans_len: Cell::new(0),
            size_detected: Cell::new(false),
            size: Cell::new(0),
            num_detected: Cell::new(false),
            num_replications: Cell::new(0),
            steady_time: Cell::new(0.0),
            enabled: Cell::new(true),
        };
        stat.pickup_immediate_detectors();
        stat
    }

    /// replications completed so far
    pub fn actual_num_replications(&self) -> usize {
        self.grand.num_observations()
    }

    /// observations accumulated in the current replication
    pub fn actual_replication_size(&self) -> usize {
        self.inner.num_observations()
    }

    /// detected replication length in observations
    pub fn replication_size(&self) -> usize {
        self.size.get()
    }

    /// detected number of replications to run
    pub fn required_replications(&self) -> usize {
        self.num_replications.get()
    }

    pub fn replication_done(&self) -> bool {
        self.size_detected.get() && self.actual_replication_size() >= self.size.get()
    }

    /// dummy detectors report detected straight after reset; honor that so
    /// fixed-size and fixed-count experiments work without observations
    fn pickup_immediate_detectors(&self) {
        if self.num_detector.borrow().detected() {
            self.num_detected.set(true);
            let n = self.num_detector.borrow().estimated_number();
            self.num_replications.set(n.max(self.min_replications));
        }
        self.pickup_transient();
        self.pickup_size();
    }

    fn pickup_transient(&self) {
        if self.trans_detected.get() {
            return;
        }
        if self.transient.borrow().detected() {
            self.complete_transient();
        } else if self.transient.borrow().aborted() {
            log::warn!(
                "statistic '{}' will be disabled: transient detection aborted",
                self.name()
            );
            self.enable(false);
        }
    }

    fn pickup_size(&self) {
        if self.size_detected.get() || !self.trans_detected.get() {
            return;
        }
        if self.size_detector.borrow().detected() {
            self.complete_size();
        } else if self.size_detector.borrow().aborted() {
            log::warn!(
                "statistic '{}' will be disabled: replication size detection aborted",
                self.name()
            );
            self.enable(false);
        }
    }

    /// the warm-up just ended: replay the retained steady-state samples
    /// (they land in size detection or accumulation) and free the detector
    fn complete_transient(&self) {
        self.trans_detected.set(true);
        let (length, samples) = {
            let det = self.transient.borrow();
            (det.estimated_length(), det.steady_state_observations())
        };
        self.trans_len.set(length);
        self.transient.borrow_mut().reset();
        log::debug!(
            "transient over after {} observations; replaying {} steady-state samples",
            length,
            samples.len()
        );
        for (value, weight) in samples {
            self.collect(value, weight);
        }
    }

    /// the replication size is known: replay the consumed observations into
    /// the inner statistic and free the detector
    fn complete_size(&self) {
        self.size_detected.set(true);
        let (size, samples) = {
            let det = self.size_detector.borrow();
            (det.estimated_size(), det.consumed_observations())
        };
        self.size.set(size);
        self.size_detector.borrow_mut().reset();
        for (value, weight) in samples {
            self.collect(value, weight);
        }
    }

    /// fold one replication mean into the grand mean and re-run the
    /// num-replications decision
    fn push_replicate_mean(&self, mean: f64) {
        self.grand.collect(mean, 1.0);
        let performed = self.actual_num_replications();
        log::debug!(
            "replication #{}: replicate mean {} -> estimate {}",
            performed,
            mean,
            self.grand.estimate()
        );
        let mut precision_reached = false;
        if self.num_detected.get() && performed >= self.num_replications.get() {
            precision_reached = self.target_precision_reached();
        }
        if !self.num_detected.get()
            || (performed >= self.num_replications.get() && !precision_reached)
        {
            let detected = self.num_detector.borrow_mut().detect(
                performed,
                self.grand.estimate(),
                self.grand.standard_deviation(),
            );
            self.num_detected.set(detected);
            if detected {
                let wanted = self.num_detector.borrow().estimated_number();
                if self.num_replications.get() < wanted {
                    self.num_replications.set(wanted.max(self.min_replications));
                } else if self.num_replications.get() <= performed && !precision_reached {
                    // the re-detected count is not larger than what has
                    // already run: the target precision is unreachable
                    log::warn!(
                        "statistic '{}' will be disabled: unable to reach the wanted precision",
                        self.name()
                    );
                    self.enable(false);
                }
            } else if self.num_detector.borrow().aborted() {
                log::warn!(
                    "statistic '{}' will be disabled: replication count detection aborted",
                    self.name()
                );
                self.enable(false);
            }
        }
    }
}

impl Statistic for ReplicationStatistic {
    fn collect(&self, value: f64, weight: f64) {
        if !self.enabled.get() {
            return;
        }
        if self.max_observations != crate::OBSERVATIONS_INFINITY
            && self.inner.num_observations() >= self.max_observations
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
            self.inner.collect(value, weight);
        } else if self.trans_detected.get() {
            let newly = self.size_detector.borrow_mut().detect(value, weight);
            if newly {
                self.complete_size();
            } else {
                self.pickup_size();
            }
        } else {
            let newly = self.transient.borrow_mut().detect(value, weight);
            if newly {
                self.complete_transient();
            } else {
                self.pickup_transient();
            }
        }
    }

    fn reset(&self) {
        self.inner.reset();
        self.grand.reset();
        self.transient.borrow_mut().reset();
        self.trans_detected.set(false);
        self.trans_len.set(0);
        self.size_detector.borrow_mut().reset();
        self.size_detected.set(false);
        self.size.set(0);
        self.num_detector.borrow_mut().reset();
        self.num_detected.set(false);
        self.num_replications.set(0);
        self.enabled.set(true);
        self.pickup_immediate_detectors();
    }

    fn category(&self) -> StatCategory {
        self.inner.category()
    }

    fn name(&self) -> String {
        self.inner.name()
    }

    fn num_observations(&self) -> usize {
        self.grand.num_observations()
    }

    fn estimate(&self) -> f64 {
        self.grand.estimate()
    }

    fn variance(&self) -> f64 {
        self.grand.variance()
    }

    fn half_width(&self) -> f64 {
        self.grand.half_width()
    }

    fn confidence_level(&self) -> f64 {
        self.grand.confidence_level()
    }

    fn relative_precision(&self) -> f64 {
        self.grand.relative_precision()
    }

    fn enabled(&self) -> bool {
        self.enabled.get()
    }

    fn enable(&self, value: bool) {
        self.enabled.set(value);
    }
}

impl Analyzable for ReplicationStatistic {
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
        self.replication_done()
    }

    /// fresh per-replication state; the grand mean and the replication
    /// count decision persist across replications
    fn initialize_for_experiment(&self) {
        self.inner.reset();
        self.transient.borrow_mut().reset();
        self.trans_detected.set(false);
        self.trans_len.set(0);
        self.size_detector.borrow_mut().reset();
        self.size_detected.set(false);
        self.size.set(0);
        self.pickup_transient();
        self.pickup_size();
    }

    fn finalize_for_experiment(&self) {
        // a disabled statistic is frozen; folding its empty inner estimate
        // into the grand mean would poison it
        if self.enabled.get() {
            self.push_replicate_mean(self.inner.estimate());
        }
    }

    fn refresh(&self) {
        self.pickup_transient();
        self.pickup_size();
    }
}

impl std::fmt::Display for ReplicationStatistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Report(self))
    }
}
