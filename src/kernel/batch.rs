use super::engine::Engine;
use crate::analysis::BatchMeansStatistic;
use crate::analysis::BatchSizeDetector;
use crate::analysis::TransientDetector;
use crate::stats::Analyzable;
use crate::stats::Statistic;
use std::rc::Rc;

/// batch-means engine: a single monolithic run whose steady-state
/// observations are grouped into approximately independent batches.
pub struct BatchMeans {
    core: Rc<Engine>,
}

impl BatchMeans {
    pub fn new() -> Self {
        Self {
            core: Engine::new(),
        }
    }

    pub fn engine(&self) -> &Rc<Engine> {
        &self.core
    }

    /// analyzable statistic with pass-through detectors: no warm-up
    /// handling and every observation its own batch
    pub fn make_analyzable_with_defaults(
        &self,
        stat: Box<dyn Statistic>,
        precision: f64,
    ) -> Rc<BatchMeansStatistic> {
        self.make_analyzable(
            stat,
            Box::new(crate::analysis::NullTransientDetector::default()),
            Box::new(crate::analysis::FixedBatchSize::new(1)),
            precision,
            crate::OBSERVATIONS_INFINITY,
        )
    }

    /// build a batch-means analyzable statistic from a plain statistic and
    /// the two detectors, register it for monitoring, and return it
    pub fn make_analyzable(
        &self,
        stat: Box<dyn Statistic>,
        transient: Box<dyn TransientDetector>,
        size: Box<dyn BatchSizeDetector>,
        precision: f64,
        max_observations: usize,
    ) -> Rc<BatchMeansStatistic> {
        let stat = Rc::new(BatchMeansStatistic::new(
            stat,
            transient,
            size,
            precision,
            max_observations,
        ));
        let erased: Rc<dyn Analyzable> = stat.clone();
        self.core.monitor(&erased);
        stat
    }

    /// run until every monitored statistic converges or the event list
    /// drains
    pub fn run(&self) {
        let eng = &self.core;
        log::debug!("begin simulation");
        eng.prepare_simulation();
        eng.initialize_system();
        while !eng.end_of_simulation() && !eng.event_list_empty() {
            eng.fire_next_event();
            eng.monitor_statistics();
        }
        if eng.end_of_simulation() {
            eng.clear_event_list();
        }
        eng.finalize_system();
        eng.finalize_simulation();
        log::debug!("end simulation");
    }

    /// fire a single event and poll termination; useful for stepping
    pub fn advance(&self) {
        let eng = &self.core;
        if !eng.end_of_simulation() && !eng.event_list_empty() {
            eng.fire_next_event();
            eng.monitor_statistics();
        }
    }
}

impl Default for BatchMeans {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchMeans {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<batch means: clock {}, done: {}>",
            self.core.simulated_time(),
            self.core.end_of_simulation()
        )
    }
}
