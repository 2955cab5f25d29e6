use super::statistic::StatCategory;
use super::statistic::Statistic;
use crate::dist::normal_quantile;
use std::cell::Cell;
use std::cell::RefCell;

/// p-quantile estimator over the retained sample. the point estimate is the
/// interpolated order statistic; the confidence interval is the
/// distribution-free one from the binomial normal approximation of
/// order-statistic indices.
pub struct QuantileEstimator {
    p: f64,
    level: f64,
    samples: RefCell<Vec<f64>>,
    sorted: Cell<bool>,
    enabled: Cell<bool>,
}

impl QuantileEstimator {
    pub fn new(p: f64, level: f64) -> crate::Result<Self> {
        if !(0.0..1.0).contains(&p) || p == 0.0 {
            return Err(crate::SimError::InvalidArgument(format!(
                "quantile probability {} is out of (0, 1)",
                p
            )));
        }
        Ok(Self {
            p,
            level,
            samples: RefCell::new(Vec::new()),
            sorted: Cell::new(true),
            enabled: Cell::new(true),
        })
    }

    pub fn probability(&self) -> f64 {
        self.p
    }

    fn ensure_sorted(&self) {
        if !self.sorted.get() {
            self.samples.borrow_mut().sort_by(f64::total_cmp);
            self.sorted.set(true);
        }
    }

    /// indices of the order statistics bounding the interval
    fn interval_indices(&self, n: usize) -> (usize, usize) {
        let z = normal_quantile((1.0 + self.level) / 2.0);
        let center = n as f64 * self.p;
        let spread = z * (n as f64 * self.p * (1.0 - self.p)).sqrt();
        let lo = (center - spread).floor().max(0.0) as usize;
        let hi = ((center + spread).ceil() as usize).min(n - 1);
        (lo.min(n - 1), hi)
    }
}

impl Statistic for QuantileEstimator {
    fn collect(&self, value: f64, _weight: f64) {
        self.samples.borrow_mut().push(value);
        self.sorted.set(false);
    }

    fn reset(&self) {
        self.samples.borrow_mut().clear();
        self.sorted.set(true);
    }

    fn category(&self) -> StatCategory {
        StatCategory::Quantile
    }

    fn name(&self) -> String {
        format!("{} Quantile", self.p)
    }

    fn num_observations(&self) -> usize {
        self.samples.borrow().len()
    }

    fn estimate(&self) -> f64 {
        self.ensure_sorted();
        let samples = self.samples.borrow();
        let n = samples.len();
        match n {
            0 => f64::NAN,
            1 => samples[0],
            _ => {
                let h = (n - 1) as f64 * self.p;
                let lo = h.floor() as usize;
                let hi = (lo + 1).min(n - 1);
                samples[lo] + (h - lo as f64) * (samples[hi] - samples[lo])
            }
        }
    }

    /// variance of the retained sample, reported for reference alongside
    /// the order-statistic interval
    fn variance(&self) -> f64 {
        let samples = self.samples.borrow();
        let n = samples.len();
        if n < 2 {
            return f64::INFINITY;
        }
        let mean = samples.iter().sum::<f64>() / n as f64;
        samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    }

    fn half_width(&self) -> f64 {
        self.ensure_sorted();
        let samples = self.samples.borrow();
        let n = samples.len();
        if n < 2 {
            return f64::INFINITY;
        }
        let (lo, hi) = self.interval_indices(n);
        (samples[hi] - samples[lo]) / 2.0
    }

    fn confidence_level(&self) -> f64 {
        self.level
    }

    fn relative_precision(&self) -> f64 {
        match (self.estimate(), self.num_observations()) {
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
