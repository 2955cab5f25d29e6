use super::Sample;
use std::cell::Cell;
use std::rc::Rc;

/// decides how long a single replication should run. observations consumed
/// while deciding are recorded and handed back for replay into the owning
/// statistic once the size is known.
pub trait ReplicationSizeDetector {
    /// feed one steady-state observation; returns whether the size is known
    fn detect(&mut self, value: f64, weight: f64) -> bool;
    fn detected(&self) -> bool;
    fn aborted(&self) -> bool {
        false
    }
    /// replication length in observations (or a best effort for
    /// duration-driven detectors)
    fn estimated_size(&self) -> usize;
    fn consumed_observations(&self) -> Vec<Sample>;
    fn reset(&mut self);
}

/// every replication collects a fixed number of observations
pub struct FixedSampleSize {
    size: usize,
    seen: Vec<Sample>,
}

impl FixedSampleSize {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            seen: Vec::new(),
        }
    }
}

impl ReplicationSizeDetector for FixedSampleSize {
    fn detect(&mut self, value: f64, weight: f64) -> bool {
        self.seen.push((value, weight));
        true
    }

    fn detected(&self) -> bool {
        true
    }

    fn estimated_size(&self) -> usize {
        self.size
    }

    fn consumed_observations(&self) -> Vec<Sample> {
        self.seen.clone()
    }

    fn reset(&mut self) {
        self.seen.clear();
    }
}

/// every replication runs a fixed span of simulated time; the detector
/// watches the shared clock handle the engine exposes
pub struct FixedDuration {
    duration: f64,
    clock: Rc<Cell<f64>>,
    seen: Vec<Sample>,
}

impl FixedDuration {
    pub fn new(duration: f64, clock: Rc<Cell<f64>>) -> Self {
        Self {
            duration,
            clock,
            seen: Vec::new(),
        }
    }
}

impl ReplicationSizeDetector for FixedDuration {
    fn detect(&mut self, value: f64, weight: f64) -> bool {
        self.seen.push((value, weight));
        self.detected()
    }

    fn detected(&self) -> bool {
        self.clock.get() >= self.duration
    }

    fn estimated_size(&self) -> usize {
        self.seen.len()
    }

    fn consumed_observations(&self) -> Vec<Sample> {
        self.seen.clone()
    }

    fn reset(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_sample_size_replays_what_it_consumed() {
        let mut det = FixedSampleSize::new(100);
        assert!(det.detect(1.0, 1.0));
        assert!(det.detect(2.0, 1.0));
        assert!(det.estimated_size() == 100);
        assert!(det.consumed_observations() == vec![(1.0, 1.0), (2.0, 1.0)]);
        det.reset();
        assert!(det.consumed_observations().is_empty());
        assert!(det.detected());
    }

    #[test]
    fn fixed_duration_waits_for_the_clock() {
        let clock = Rc::new(Cell::new(0.0));
        let mut det = FixedDuration::new(10.0, Rc::clone(&clock));
        assert!(!det.detect(1.0, 1.0));
        clock.set(5.0);
        assert!(!det.detect(2.0, 1.0));
        clock.set(10.0);
        assert!(det.detect(3.0, 1.0));
        assert!(det.estimated_size() == 3);
    }
}
