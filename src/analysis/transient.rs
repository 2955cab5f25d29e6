use super::Sample;
use super::spectral;
use super::spectral::SlopeProtection;

/// sequential warm-up detection: fed raw observations one at a time until
/// it declares the transient phase over (or gives up). the samples it held
/// while testing are steady-state observations and are handed back for
/// replay into the owning statistic.
pub trait TransientDetector {
    /// feed one observation; returns whether the transient phase is over
    fn detect(&mut self, value: f64, weight: f64) -> bool;
    fn detected(&self) -> bool;
    fn aborted(&self) -> bool;
    /// estimated transient length in observations
    fn estimated_length(&self) -> usize;
    /// retained steady-state observations to replay downstream
    fn steady_state_observations(&self) -> Vec<Sample>;
    fn reset(&mut self);
}

/// no warm-up: the very first observation is already steady state
#[derive(Default)]
pub struct NullTransientDetector {
    last: Option<Sample>,
}

impl TransientDetector for NullTransientDetector {
    fn detect(&mut self, value: f64, weight: f64) -> bool {
        self.last = Some((value, weight));
        true
    }

    fn detected(&self) -> bool {
        true
    }

    fn aborted(&self) -> bool {
        false
    }

    fn estimated_length(&self) -> usize {
        0
    }

    fn steady_state_observations(&self) -> Vec<Sample> {
        self.last.into_iter().collect()
    }

    fn reset(&mut self) {
        self.last = None;
    }
}

/// Schruben's sequential stationarity test with Heidelberger-Welch spectral
/// variance (Pawlikowski 1990).
///
/// phase one is the R5 heuristic: buffer observations until the sequence
/// crosses its running mean `MIN_MEAN_CROSSINGS` times, giving the initial
/// transient estimate n0* and the test window length. phase two slides a
/// window of the most recent n_t observations, estimating the variance on
/// the last n_v of them spectrally and accepting stationarity when the
/// standardized area under the mean deviation falls below the t-threshold.
pub struct SpectralTransientDetector {
    n0_max: usize,
    max_heuristic: usize,
    gamma: f64,
    gamma_v: f64,
    alpha_t: f64,
    n_v: usize,
    n_ap: usize,
    degree: usize,
    safety_factor: f64,
    eps: f64,
    slope: SlopeProtection,
    num_obs: usize,
    aborted: bool,
    detected: bool,
    sum: f64,
    n0_star: usize,
    n0: usize,
    obs: Vec<f64>,
    weights: Vec<f64>,
    buffered: usize,
    n_t: usize,
    step: usize,
    safe_num_obs: usize,
}

impl SpectralTransientDetector {
    pub fn new(
        n0_max: usize,
        gamma: f64,
        gamma_v: f64,
        n_v: usize,
        alpha_t: f64,
        safety_factor: f64,
        n_ap: usize,
        degree: usize,
        eps: f64,
    ) -> crate::Result<Self> {
        if !(0.0 < alpha_t && alpha_t < 1.0) {
            return Err(crate::SimError::InvalidArgument(format!(
                "significance level {} is out of (0, 1)",
                alpha_t
            )));
        }
        if gamma <= 0.0 {
            return Err(crate::SimError::InvalidArgument(format!(
                "exchange coefficient {} must be positive",
                gamma
            )));
        }
        if gamma_v > 2.0 {
            return Err(crate::SimError::InvalidArgument(format!(
                "variance safety coefficient {} exceeds 2",
                gamma_v
            )));
        }
        if n_ap > n_v / 4 {
            return Err(crate::SimError::InvalidArgument(format!(
                "{} periodogram points exceed n_v/4 = {}",
                n_ap,
                n_v / 4
            )));
        }
        if degree == 0 {
            return Err(crate::SimError::InvalidArgument(
                "polynomial degree must be positive".to_string(),
            ));
        }
        if spectral::lookup_constants(n_ap, degree).is_none() {
            return Err(crate::SimError::InvalidArgument(format!(
                "no spectral constants for {} periodogram points at degree {}",
                n_ap, degree
            )));
        }
        Ok(Self {
            n0_max,
            max_heuristic: n0_max / 2,
            gamma,
            gamma_v,
            alpha_t,
            n_v,
            n_ap,
            degree,
            safety_factor,
            eps,
            slope: SlopeProtection::Off,
            num_obs: 0,
            aborted: false,
            detected: false,
            sum: 0.0,
            n0_star: 0,
            n0: 0,
            obs: Vec::with_capacity(n_v),
            weights: Vec::with_capacity(n_v),
            buffered: 0,
            n_t: 0,
            step: 0,
            safe_num_obs: 0,
        })
    }

    /// detector with the Pawlikowski 1990 default parameters and the given
    /// transient length cap
    pub fn with_cap(n0_max: usize) -> Self {
        Self::new(
            n0_max,
            crate::DEFAULT_GAMMA,
            crate::DEFAULT_GAMMA_V,
            crate::DEFAULT_N_V,
            crate::DEFAULT_ALPHA_T,
            crate::DEFAULT_SAFETY_FACTOR,
            crate::DEFAULT_N_AP,
            crate::DEFAULT_DELTA,
            crate::DEFAULT_EPS,
        )
        .expect("default transient parameters are valid")
    }

    pub fn slope_protection(mut self, slope: SlopeProtection) -> Self {
        self.slope = slope;
        self
    }

    fn buffer(&mut self, value: f64, weight: f64) {
        if self.buffered == self.obs.len() {
            self.obs.push(value);
            self.weights.push(weight);
        } else {
            self.obs[self.buffered] = value;
            self.weights[self.buffered] = weight;
        }
        self.buffered += 1;
    }

    /// rule R5: count crossings of the running mean; enough of them give
    /// the initial estimate of the transient length
    fn heuristic_phase(&mut self) {
        if self.max_heuristic != crate::OBSERVATIONS_INFINITY && self.buffered > self.max_heuristic
        {
            log::warn!(
                "failed to leave the heuristic phase after {} observations",
                self.buffered
            );
            self.aborted = true;
            return;
        }
        let mean = self.sum / self.num_obs as f64;
        let mut crossings = 0;
        for i in 1..self.num_obs {
            let prev = self.obs[i - 1];
            let cur = self.obs[i];
            let crossed = (prev < mean && mean < cur)
                || (prev > mean && mean > cur)
                || ((prev - mean).abs() <= self.eps && (cur - mean).abs() <= self.eps);
            if crossed {
                crossings += 1;
                if crossings == crate::MIN_MEAN_CROSSINGS {
                    break;
                }
            }
        }
        if crossings == crate::MIN_MEAN_CROSSINGS {
            self.n0_star = self.num_obs;
            self.n0 = self.num_obs;
            self.step = (self.gamma * self.n0_star as f64) as usize;
            self.n_t = self
                .step
                .max((self.gamma_v * self.n_v as f64) as usize)
                .max(self.n_v);
            self.obs.resize(self.n_t, 0.0);
            self.weights.resize(self.n_t, 0.0);
            self.buffered = 0;
            if self.safety_factor > 1.0 {
                self.safe_num_obs = (self.safety_factor * self.n0_star as f64) as usize;
            }
            log::debug!(
                "initial transient estimate {} (test window {})",
                self.n0_star,
                self.n_t
            );
        }
    }

    /// the Schruben test over the full window; on rejection the window
    /// shifts forward by the step and the transient estimate grows
    fn schruben_phase(&mut self) {
        if self.buffered != self.n_t {
            return;
        }
        let window = &self.obs[self.buffered - self.n_v..self.buffered];
        let verdict = spectral::spectral_variance(window, self.n_ap, self.degree, self.slope);
        let accepted = match verdict {
            Some((var, kappa)) => {
                let t = spectral::schruben_statistic(&self.obs[..self.n_t], self.n_v, var).abs();
                t <= spectral::schruben_threshold(self.alpha_t, kappa)
            }
            // a degenerate variance estimate cannot support the test;
            // treat the round as a rejection so the window keeps moving
            None => false,
        };
        if accepted {
            log::debug!("initial transient no longer than {} observations", self.n0);
            self.detected = true;
            self.obs.truncate(self.buffered);
            self.weights.truncate(self.buffered);
        } else {
            self.obs.copy_within(self.step..self.buffered, 0);
            self.weights.copy_within(self.step..self.buffered, 0);
            self.buffered -= self.step;
            self.n0 += self.step;
        }
    }
}

impl TransientDetector for SpectralTransientDetector {
    fn detect(&mut self, value: f64, weight: f64) -> bool {
        if self.aborted {
            return false;
        }
        if self.detected {
            return true;
        }
        if self.n0_max != crate::OBSERVATIONS_INFINITY && self.n0 + self.n_t > self.n0_max {
            log::warn!(
                "transient not detected within the maximum phase length {}",
                self.n0_max
            );
            self.aborted = true;
            return false;
        }
        self.num_obs += 1;
        self.buffer(value, weight);
        if self.n0_star == 0 {
            self.sum += value;
            self.heuristic_phase();
            return false;
        }
        self.schruben_phase();
        if !self.detected {
            if self.safe_num_obs > 0 && self.num_obs >= self.safe_num_obs {
                log::debug!(
                    "assuming transient detected after {} observations (safety bound)",
                    self.safe_num_obs
                );
                self.detected = true;
                self.n0 = self.safe_num_obs;
                self.obs.truncate(self.buffered);
                self.weights.truncate(self.buffered);
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

    fn estimated_length(&self) -> usize {
        self.n0
    }

    fn steady_state_observations(&self) -> Vec<Sample> {
        self.obs[..self.buffered]
            .iter()
            .copied()
            .zip(self.weights[..self.buffered].iter().copied())
            .collect()
    }

    fn reset(&mut self) {
        self.num_obs = 0;
        self.aborted = false;
        self.detected = false;
        self.sum = 0.0;
        self.n0_star = 0;
        self.n0 = 0;
        self.buffered = 0;
        self.n_t = 0;
        self.step = 0;
        self.safe_num_obs = 0;
        self.obs.clear();
        self.weights.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn parameters_are_validated() {
        assert!(SpectralTransientDetector::new(1000, 0.5, 2.0, 100, 1.5, 1.0, 25, 2, 1e-5).is_err());
        assert!(SpectralTransientDetector::new(1000, 0.0, 2.0, 100, 0.05, 1.0, 25, 2, 1e-5).is_err());
        assert!(SpectralTransientDetector::new(1000, 0.5, 3.0, 100, 0.05, 1.0, 25, 2, 1e-5).is_err());
        assert!(SpectralTransientDetector::new(1000, 0.5, 2.0, 100, 0.05, 1.0, 26, 2, 1e-5).is_err());
        assert!(SpectralTransientDetector::new(1000, 0.5, 2.0, 100, 0.05, 1.0, 25, 0, 1e-5).is_err());
        assert!(SpectralTransientDetector::new(1000, 0.5, 2.0, 100, 0.05, 1.0, 25, 2, 1e-5).is_ok());
    }

    #[test]
    fn null_detector_replays_its_single_sample() {
        let mut det = NullTransientDetector::default();
        assert!(det.detect(4.0, 2.0));
        assert!(det.steady_state_observations() == vec![(4.0, 2.0)]);
        det.reset();
        assert!(det.steady_state_observations().is_empty());
    }

    #[test]
    fn stationary_noise_is_detected_quickly() {
        let mut rng = SmallRng::seed_from_u64(11);
        let mut det = SpectralTransientDetector::with_cap(50_000);
        let mut n = 0;
        while !det.detect(rng.random::<f64>(), 1.0) {
            n += 1;
            assert!(!det.aborted(), "aborted after {} observations", n);
            assert!(n < 20_000, "no detection after {} observations", n);
        }
        assert!(det.detected());
        assert!(!det.steady_state_observations().is_empty());
    }

    #[test]
    fn decaying_transient_is_eventually_passed() {
        let mut rng = SmallRng::seed_from_u64(3);
        let mut det = SpectralTransientDetector::with_cap(200_000);
        let mut i = 0usize;
        loop {
            // exponential decay toward a noisy steady state
            let bias = 10.0 * (-(i as f64) / 200.0).exp();
            let x = bias + rng.random::<f64>();
            i += 1;
            if det.detect(x, 1.0) {
                break;
            }
            assert!(!det.aborted(), "aborted after {} observations", i);
            assert!(i < 100_000);
        }
        assert!(det.estimated_length() > 0);
    }

    #[test]
    fn impossible_test_level_aborts_at_the_cap() {
        // alpha_t near 1 makes the t-threshold tiny, and a steady drift
        // keeps the path genuinely non-stationary, so the cap must trip
        let mut rng = SmallRng::seed_from_u64(5);
        let mut det =
            SpectralTransientDetector::new(5_000, 0.5, 2.0, 100, 0.999, 1.0, 25, 2, 1e-5)
                .unwrap();
        let mut n = 0usize;
        while !det.detect(rng.random::<f64>() + 0.01 * n as f64, 1.0) {
            n += 1;
            if det.aborted() {
                break;
            }
            assert!(n < 50_000);
        }
        assert!(det.aborted());
        assert!(!det.detected());
    }
}
