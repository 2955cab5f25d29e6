use crate::dist::normal_quantile;
use crate::dist::student_t_quantile;

/// decides how many independent replications the experiment needs, given
/// the grand mean and standard deviation over the replication means seen
/// so far.
pub trait NumReplicationsDetector {
    /// feed the current replication count and grand-mean summary; returns
    /// whether the required count is known
    fn detect(&mut self, performed: usize, estimate: f64, stddev: f64) -> bool;
    fn detected(&self) -> bool;
    fn aborted(&self) -> bool;
    fn estimated_number(&self) -> usize;
    fn reset(&mut self);
}

/// always exactly n replications
pub struct FixedCount {
    n: usize,
}

impl FixedCount {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl NumReplicationsDetector for FixedCount {
    fn detect(&mut self, _performed: usize, _estimate: f64, _stddev: f64) -> bool {
        true
    }

    fn detected(&self) -> bool {
        true
    }

    fn aborted(&self) -> bool {
        false
    }

    fn estimated_number(&self) -> usize {
        self.n
    }

    fn reset(&mut self) {}
}

/// confidence-interval driven replication count (Banks et al. 2005):
/// start from the normal-quantile estimate R0 = ceil((z s / eps)^2) with
/// eps the target relative precision times the estimate, then grow R until
/// the Student-t fixed point stabilizes or the cap is hit.
pub struct Banks2005 {
    level: f64,
    precision: f64,
    r_min: usize,
    r_max: usize,
    r: usize,
    detected: bool,
    aborted: bool,
    first_call: bool,
}

impl Banks2005 {
    pub fn new(level: f64, precision: f64, r_min: usize, r_max: usize) -> crate::Result<Self> {
        if !(0.0 < level && level < 1.0) {
            return Err(crate::SimError::InvalidArgument(format!(
                "confidence level {} is out of (0, 1)",
                level
            )));
        }
        if r_min < 2 {
            return Err(crate::SimError::InvalidArgument(
                "minimum number of replications must be at least 2".to_string(),
            ));
        }
        if r_min > r_max {
            return Err(crate::SimError::InvalidArgument(format!(
                "minimum number of replications {} exceeds maximum {}",
                r_min, r_max
            )));
        }
        Ok(Self {
            level,
            precision,
            r_min,
            r_max,
            r: 0,
            detected: false,
            aborted: false,
            first_call: true,
        })
    }
}

impl NumReplicationsDetector for Banks2005 {
    fn detect(&mut self, performed: usize, estimate: f64, stddev: f64) -> bool {
        if performed < self.r_min {
            self.detected = false;
            return false;
        }
        if performed >= self.r_max {
            self.aborted = true;
            return false;
        }
        if stddev < 0.0 || stddev.is_infinite() || stddev.is_nan() {
            log::warn!("standard deviation {} is unusable for replication sizing", stddev);
            self.detected = false;
            return false;
        }
        let half_alpha = (1.0 - self.level) / 2.0;
        let eps = self.precision * estimate;
        if self.first_call {
            self.first_call = false;
            let z = normal_quantile(half_alpha);
            self.r = ((z * stddev / eps).powi(2)).ceil() as usize;
            if self.r < self.r_min {
                self.r = self.r_min;
            }
        }
        loop {
            let t = student_t_quantile(half_alpha, (self.r - 1) as f64);
            let wanted = (t * stddev / eps).powi(2);
            if (self.r as f64) < wanted && self.r < self.r_max {
                self.r += 1;
            } else {
                break;
            }
        }
        self.detected = self.r < self.r_max;
        log::debug!(
            "replication sizing: detected {} (r {}, r_max {})",
            self.detected,
            self.r,
            self.r_max
        );
        self.detected
    }

    fn detected(&self) -> bool {
        self.detected
    }

    fn aborted(&self) -> bool {
        self.aborted
    }

    fn estimated_number(&self) -> usize {
        self.r
    }

    fn reset(&mut self) {
        self.detected = false;
        self.aborted = false;
        self.first_call = true;
        self.r = 0;
    }
}
