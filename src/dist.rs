//! narrow capability interfaces over the probability ecosystem.
//!
//! the simulator consumes randomness through `Draw` (sample a real) and the
//! two quantile helpers below; concrete distributions come from `rand_distr`
//! and quantiles from `statrs`, so nothing else in the crate touches either
//! crate directly.

use rand::rngs::SmallRng;
use statrs::distribution::ContinuousCDF;
use statrs::distribution::Normal;
use statrs::distribution::StudentsT;

/// anything that can draw a real number from a random generator
pub trait Draw {
    fn draw(&self, rng: &mut SmallRng) -> f64;
}

impl<D> Draw for D
where
    D: rand_distr::Distribution<f64>,
{
    fn draw(&self, rng: &mut SmallRng) -> f64 {
        self.sample(rng)
    }
}

/// boxed sampling capability used by classes and service strategies
pub type Dist = Box<dyn Draw>;

/// degenerate distribution concentrated at a single point
#[derive(Debug, Clone, Copy)]
pub struct Fixed(pub f64);

impl rand_distr::Distribution<f64> for Fixed {
    fn sample<R: rand::Rng + ?Sized>(&self, _: &mut R) -> f64 {
        self.0
    }
}

/// exponential interarrival / service times with the given rate
pub fn exponential(rate: f64) -> crate::Result<Dist> {
    rand_distr::Exp::new(rate)
        .map(|d| Box::new(d) as Dist)
        .map_err(|e| crate::SimError::InvalidArgument(format!("exponential rate {}: {}", rate, e)))
}

/// uniform draws over [low, high)
pub fn uniform(low: f64, high: f64) -> crate::Result<Dist> {
    rand_distr::Uniform::new(low, high)
        .map(|d| Box::new(d) as Dist)
        .map_err(|e| {
            crate::SimError::InvalidArgument(format!("uniform [{}, {}): {}", low, high, e))
        })
}

/// constant draws
pub fn constant(value: f64) -> Dist {
    Box::new(Fixed(value))
}

/// p-quantile of the standard normal distribution
pub fn normal_quantile(p: f64) -> f64 {
    Normal::new(0.0, 1.0)
        .map(|d| d.inverse_cdf(p))
        .unwrap_or(f64::NAN)
}

/// p-quantile of Student's t distribution with the given degrees of freedom.
/// degenerate degrees of freedom yield an infinite quantile, which callers
/// treat as "no confidence yet".
pub fn student_t_quantile(p: f64, degrees: f64) -> f64 {
    if degrees < 1.0 {
        return f64::INFINITY;
    }
    StudentsT::new(0.0, 1.0, degrees)
        .map(|d| d.inverse_cdf(p))
        .unwrap_or(f64::INFINITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn exponential_mean_matches_rate() {
        let mut rng = SmallRng::seed_from_u64(7);
        let d = exponential(2.0).unwrap();
        let n = 20_000;
        let mean = (0..n).map(|_| d.draw(&mut rng)).sum::<f64>() / n as f64;
        assert!((mean - 0.5).abs() < 0.02, "mean {}", mean);
    }

    #[test]
    fn uniform_stays_in_range() {
        let mut rng = SmallRng::seed_from_u64(7);
        let d = uniform(60.0, 600.0).unwrap();
        for _ in 0..1000 {
            let x = d.draw(&mut rng);
            assert!((60.0..600.0).contains(&x));
        }
    }

    #[test]
    fn constant_always_draws_itself() {
        let mut rng = SmallRng::seed_from_u64(7);
        assert!(constant(4.2).draw(&mut rng) == 4.2);
    }

    #[test]
    fn normal_quantile_is_symmetric() {
        let z = normal_quantile(0.975);
        assert!((z - 1.959964).abs() < 1e-4);
        assert!((normal_quantile(0.025) + z).abs() < 1e-10);
    }

    #[test]
    fn student_t_approaches_normal() {
        let t = student_t_quantile(0.975, 4.0);
        assert!((t - 2.776445).abs() < 1e-4);
        assert!(student_t_quantile(0.975, 1e6) - normal_quantile(0.975) < 1e-3);
        assert!(student_t_quantile(0.975, 0.0).is_infinite());
    }
}
