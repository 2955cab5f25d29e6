use crate::dist::normal_quantile;
use crate::stats::Statistic;
use crate::stats::WeightedMeanEstimator;

/// decides the batch size m such that means of consecutive batches are
/// approximately uncorrelated. batch means computed while deciding are
/// handed back for replay into the owning statistic.
pub trait BatchSizeDetector {
    /// feed one steady-state observation; returns whether the size is known
    fn detect(&mut self, value: f64, weight: f64) -> bool;
    fn detected(&self) -> bool;
    fn aborted(&self) -> bool;
    fn estimated_size(&self) -> usize;
    /// batch means computed during detection, at the accepted size
    fn computed_means(&self) -> Vec<f64>;
    fn reset(&mut self);
}

/// a fixed, externally chosen batch size
pub struct FixedBatchSize {
    size: usize,
}

impl FixedBatchSize {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }
}

impl BatchSizeDetector for FixedBatchSize {
    fn detect(&mut self, _value: f64, _weight: f64) -> bool {
        true
    }

    fn detected(&self) -> bool {
        true
    }

    fn aborted(&self) -> bool {
        false
    }

    fn estimated_size(&self) -> usize {
        self.size
    }

    fn computed_means(&self) -> Vec<f64> {
        Vec::new()
    }

    fn reset(&mut self) {}
}

fn autocovariance(x: &[f64], k: usize) -> f64 {
    let n = x.len();
    let mean = x.iter().sum::<f64>() / n as f64;
    let sum = (k..n).map(|i| (x[i] - mean) * (x[i - k] - mean)).sum::<f64>();
    sum / (n - k) as f64
}

fn autocorrelation(x: &[f64], k: usize) -> f64 {
    autocovariance(x, k) / autocovariance(x, 0)
}

/// jackknife autocorrelation estimator at lag k: twice the full-sequence
/// estimate minus the mean of the half-sequence estimates
pub(crate) fn jackknife_autocorrelation(x: &[f64], k: usize) -> f64 {
    let n = x.len() / 2;
    2.0 * autocorrelation(x, k) - (autocorrelation(&x[..n], k) + autocorrelation(&x[n..], k)) / 2.0
}

/// sequential batch-size determination (Pawlikowski 1990): grow a reference
/// sequence of size-m0 batch means, consolidate it into k_b0 analyzed means
/// of the trial size s*m0, and accept the trial size once the analyzed
/// means test uncorrelated twice in a row.
pub struct PawlikowskiBatchSize {
    m0: usize,
    k_b0: usize,
    beta: f64,
    n_max: usize,
    batch_count: usize,
    total: usize,
    trial: usize,
    m_star: usize,
    acceptable: bool,
    detected: bool,
    aborted: bool,
    batch_mean: WeightedMeanEstimator,
    reference: Vec<f64>,
    analyzed: Vec<f64>,
}

impl PawlikowskiBatchSize {
    pub fn new(n_max: usize, m0: usize, k_b0: usize, beta: f64) -> crate::Result<Self> {
        if !(0.0 < beta && beta < 1.0) {
            return Err(crate::SimError::InvalidArgument(format!(
                "autocorrelation significance level {} is out of (0, 1)",
                beta
            )));
        }
        if m0 == 0 || k_b0 < 10 {
            return Err(crate::SimError::InvalidArgument(
                "batch size detection needs m0 > 0 and k_b0 >= 10".to_string(),
            ));
        }
        Ok(Self {
            m0,
            k_b0,
            beta,
            n_max,
            batch_count: 0,
            total: 0,
            trial: 1,
            m_star: m0,
            acceptable: false,
            detected: false,
            aborted: false,
            batch_mean: WeightedMeanEstimator::default(),
            reference: Vec::new(),
            analyzed: Vec::new(),
        })
    }

    pub fn with_cap(n_max: usize) -> Self {
        Self::new(n_max, crate::DEFAULT_M0, crate::DEFAULT_K_B0, crate::DEFAULT_BETA)
            .expect("default batch size parameters are valid")
    }

    /// average groups of `trial` consecutive reference batches into the
    /// analyzed sequence of length k_b0
    fn consolidate(&mut self) {
        self.analyzed.clear();
        let mut i = 0;
        while self.analyzed.len() < self.k_b0 {
            let sum = self.reference[i..i + self.trial].iter().sum::<f64>();
            self.analyzed.push(sum / self.trial as f64);
            i += self.trial;
        }
    }

    /// test the first L = k_b0/10 lags of the analyzed sequence for
    /// statistically negligible autocorrelation, each at level beta/L
    fn uncorrelated(&self) -> bool {
        let k_b0 = self.analyzed.len();
        let lags = k_b0 / 10;
        let beta_k = self.beta / lags as f64;
        let z = normal_quantile(1.0 - beta_k / 2.0);
        let r = (0..lags)
            .map(|k| jackknife_autocorrelation(&self.analyzed, k + 1))
            .collect::<Vec<_>>();
        for k in 0..lags {
            let sigma_sq = match k {
                0 => 1.0 / k_b0 as f64,
                _ => (1.0 + 2.0 * r[..k].iter().map(|v| v * v).sum::<f64>()) / k_b0 as f64,
            };
            if r[k].abs() >= z * sigma_sq.sqrt() {
                return false;
            }
        }
        true
    }
}

impl BatchSizeDetector for PawlikowskiBatchSize {
    fn detect(&mut self, value: f64, weight: f64) -> bool {
        if self.detected {
            return true;
        }
        if self.n_max != crate::OBSERVATIONS_INFINITY && self.total >= self.n_max {
            log::warn!(
                "batch size not detected within the maximum of {} observations",
                self.n_max
            );
            self.aborted = true;
            return false;
        }
        self.total += 1;
        self.batch_mean.collect(value, weight);
        self.batch_count += 1;
        if self.batch_count <= self.m0 * self.k_b0 {
            if self.batch_count % self.m0 == 0 {
                self.reference.push(self.batch_mean.estimate());
                self.batch_mean.reset();
            }
        } else {
            log::debug!("testing batch size {}", self.trial * self.m0);
            self.batch_count = 0;
            self.consolidate();
            let passed = self.uncorrelated();
            let accepted = passed && self.acceptable;
            if passed {
                self.acceptable = true;
            } else {
                self.acceptable = false;
            }
            if accepted {
                log::debug!("batch size {} accepted", self.trial * self.m0);
                self.batch_mean.reset();
                self.m_star = self.trial * self.m0;
                self.detected = true;
                self.reference = self.analyzed.clone();
            } else {
                self.trial += 1;
            }
        }
        self.detected
    }

    fn detected(&self) -> bool {
        self.detected
    }

    fn aborted(&self) -> bool {
        self.aborted
    }

    fn estimated_size(&self) -> usize {
        self.m_star
    }

    fn computed_means(&self) -> Vec<f64> {
        self.reference.clone()
    }

    fn reset(&mut self) {
        self.batch_count = 0;
        self.total = 0;
        self.trial = 1;
        self.m_star = self.m0;
        self.acceptable = false;
        self.detected = false;
        self.aborted = false;
        self.batch_mean.reset();
        self.reference.clear();
        self.analyzed.clear();
    }
}
