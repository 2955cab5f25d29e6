use super::engine::Engine;
use super::event::Event;
use super::event::Payload;
use super::source::EventSource;
use crate::analysis::NumReplicationsDetector;
use crate::analysis::ReplicationSizeDetector;
use crate::analysis::ReplicationStatistic;
use crate::analysis::TransientDetector;
use crate::stats::Analyzable;
use crate::stats::Statistic;
use std::cell::Cell;
use std::rc::Rc;

/// independent-replications engine: repeats the simulated experiment with
/// a fresh clock until every monitored statistic reaches its target
/// precision over the replication means.
pub struct Replications {
    core: Rc<Engine>,
    min_duration: Cell<f64>,
    min_replications: Cell<usize>,
    end_of_repl: Cell<bool>,
    count: Cell<usize>,
    begin_of_repl: Rc<EventSource>,
    maybe_end_of_repl: Rc<EventSource>,
    end_of_repl_source: Rc<EventSource>,
}

impl Replications {
    pub fn new(min_duration: f64, min_replications: usize) -> Self {
        let core = Engine::new();
        let begin_of_repl = EventSource::new("Begin of Replication");
        let maybe_end_of_repl = EventSource::new("Maybe End of Replication");
        let end_of_repl_source = EventSource::new("End of Replication");
        core.register_internal(&begin_of_repl);
        core.register_internal(&end_of_repl_source);
        Self {
            core,
            min_duration: Cell::new(min_duration),
            min_replications: Cell::new(min_replications),
            end_of_repl: Cell::new(false),
            count: Cell::new(0),
            begin_of_repl,
            maybe_end_of_repl,
            end_of_repl_source,
        }
    }

    pub fn engine(&self) -> &Rc<Engine> {
        &self.core
    }

    pub fn min_replication_duration(&self) -> f64 {
        self.min_duration.get()
    }

    pub fn set_min_replication_duration(&self, time: f64) {
        self.min_duration.set(time);
    }

    pub fn min_num_replications(&self) -> usize {
        self.min_replications.get()
    }

    pub fn set_min_num_replications(&self, n: usize) {
        self.min_replications.set(n);
    }

    pub fn num_replications(&self) -> usize {
        self.count.get()
    }

    pub fn begin_of_replication_source(&self) -> &Rc<EventSource> {
        &self.begin_of_repl
    }

    pub fn end_of_replication_source(&self) -> &Rc<EventSource> {
        &self.end_of_repl_source
    }

    /// end the current replication (and the simulation) at the current time
    pub fn stop_now(&self) {
        self.end_of_repl.set(true);
        self.core.stop_now();
    }

    /// analyzable statistic with pass-through detectors: no warm-up
    /// handling, replications last the minimum duration, and the
    /// Banks 2005 rule sizes the replication count toward the target
    /// precision
    pub fn make_analyzable_with_defaults(
        &self,
        stat: Box<dyn Statistic>,
        precision: f64,
    ) -> crate::Result<Rc<ReplicationStatistic>> {
        let level = stat.confidence_level();
        let replications = crate::analysis::Banks2005::new(level, precision, 2, usize::MAX)?;
        Ok(self.make_analyzable(
            stat,
            Box::new(crate::analysis::NullTransientDetector::default()),
            Box::new(crate::analysis::FixedSampleSize::new(0)),
            Box::new(replications),
            precision,
            crate::OBSERVATIONS_INFINITY,
        ))
    }

    /// build a per-replication analyzable statistic from a plain statistic
    /// and the three detectors, register it for monitoring, and return it
    pub fn make_analyzable(
        &self,
        stat: Box<dyn Statistic>,
        transient: Box<dyn TransientDetector>,
        size: Box<dyn ReplicationSizeDetector>,
        replications: Box<dyn NumReplicationsDetector>,
        precision: f64,
        max_observations: usize,
    ) -> Rc<ReplicationStatistic> {
        let stat = Rc::new(ReplicationStatistic::new(
            stat,
            transient,
            size,
            replications,
            precision,
            max_observations,
        ));
        let erased: Rc<dyn Analyzable> = stat.clone();
        self.core.monitor(&erased);
        stat
    }

    /// run replications until global termination
    pub fn run(&self) {
        let eng = &self.core;
        log::debug!("begin simulation");
        eng.prepare_simulation();
        self.end_of_repl.set(false);
        self.count.set(0);
        while !eng.end_of_simulation() {
            self.count.set(self.count.get() + 1);
            log::debug!(
                "begin replication #{} (clock {}, min duration {})",
                self.count.get(),
                eng.simulated_time(),
                self.min_duration.get()
            );
            self.prepare_replication();
            while !self.end_of_repl.get() && !eng.event_list_empty() {
                if let Some(event) = eng.fire_next_event() {
                    self.react(&event);
                }
                self.monitor_in_replication();
                if eng.end_of_simulation() {
                    self.end_of_repl.set(true);
                }
                if self.end_of_repl.get() {
                    // consume events co-timed with the end before leaving
                    if eng.next_fires_now() {
                        self.end_of_repl.set(false);
                        eng.set_end_of_simulation(false);
                    }
                    // replications shorter than the minimum keep going
                    if eng.simulated_time() < self.min_duration.get() {
                        self.end_of_repl.set(false);
                        eng.set_end_of_simulation(false);
                    }
                }
            }
            if !self.end_of_repl.get() && eng.event_list_empty() {
                log::warn!("replication not ended but event list is empty: forcing end of replication");
            }
            self.finalize_replication();
            eng.monitor_statistics();
            if eng.end_of_simulation() {
                // honor the minimum replication count before terminating
                if self.count.get() < self.min_replications.get() {
                    eng.set_end_of_simulation(false);
                }
            } else if self.count.get() >= self.min_replications.get() && !eng.has_monitored() {
                // with nothing monitored there is no precision to wait for
                eng.set_end_of_simulation(true);
            }
            log::debug!(
                "end replication #{} (clock {})",
                self.count.get(),
                eng.simulated_time()
            );
        }
        self.core.finalize_simulation();
        log::debug!("end simulation");
    }

    fn prepare_replication(&self) {
        let eng = &self.core;
        self.end_of_repl.set(false);
        eng.reset();
        eng.fire_immediate(&self.begin_of_repl, Payload::Index(self.count.get()));
        eng.schedule_event(
            &self.maybe_end_of_repl,
            eng.simulated_time() + self.min_duration.get(),
            Payload::Index(self.count.get()),
        );
        for stat in eng.monitored_stats() {
            stat.initialize_for_experiment();
        }
        eng.initialize_system();
    }

    fn finalize_replication(&self) {
        let eng = &self.core;
        eng.finalize_system();
        for stat in eng.monitored_stats() {
            stat.finalize_for_experiment();
        }
        self.end_of_repl.set(true);
        eng.fire_immediate(&self.end_of_repl_source, Payload::Index(self.count.get()));
    }

    /// engine-side reaction to replication lifecycle events popped from the
    /// list (user slots on the same sources have already run)
    fn react(&self, event: &Event) {
        if event.is_from(&self.maybe_end_of_repl) {
            // with no monitored statistics the minimum duration is the
            // replication length; otherwise the statistics drive it
            if !self.core.has_monitored() {
                self.core.schedule_event(
                    &self.end_of_repl_source,
                    self.core.simulated_time(),
                    Payload::Index(self.count.get()),
                );
            }
        } else if event.is_from(&self.end_of_repl_source) {
            for stat in self.core.monitored_stats() {
                stat.finalize_for_experiment();
            }
            self.end_of_repl.set(true);
        }
    }

    /// the replication ends only when every enabled monitored statistic has
    /// a complete observation chunk; each statistic may need a different
    /// sample size, hence the logical AND
    fn monitor_in_replication(&self) {
        let stats = self.core.monitored_stats();
        if stats.is_empty() {
            return;
        }
        let mut done = true;
        for stat in stats {
            stat.refresh();
            if stat.enabled() && !stat.observation_complete() {
                done = false;
                break;
            }
        }
        if done {
            self.end_of_repl.set(true);
        }
    }
}

impl std::fmt::Display for Replications {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<independent replications: {} replications, clock {}, done: {}>",
            self.count.get(),
            self.core.simulated_time(),
            self.core.end_of_simulation()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Banks2005;
    use crate::analysis::FixedSampleSize;
    use crate::analysis::NullTransientDetector;
    use crate::stats::MeanEstimator;
    use std::cell::RefCell;

    #[test]
    fn unmonitored_run_performs_the_minimum_replications() {
        let sim = Replications::new(10.0, 3);
        let ticks = Rc::new(Cell::new(0usize));
        let src = EventSource::new("tick");
        let seen = Rc::clone(&ticks);
        let tick = Rc::clone(&src);
        src.connect(move |_, ctx| {
            seen.set(seen.get() + 1);
            ctx.schedule(&tick, ctx.time() + 1.0, Payload::None);
        });
        let boot = Rc::clone(&src);
        sim.engine()
            .system_init_source()
            .connect(move |_, ctx| {
                ctx.schedule(&boot, ctx.time(), Payload::None);
            });
        sim.run();
        assert!(sim.num_replications() == 3);
        // each replication runs [0, 10] in unit steps
        assert!(ticks.get() >= 30);
    }

    #[test]
    fn replication_clock_resets_to_zero() {
        let sim = Replications::new(5.0, 2);
        let starts = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&starts);
        sim.begin_of_replication_source()
            .connect(move |evt, ctx| {
                seen.borrow_mut().push((evt.index().unwrap_or(0), ctx.time()));
            });
        sim.run();
        assert!(*starts.borrow() == vec![(1, 0.0), (2, 0.0)]);
    }

    #[test]
    fn statistic_completion_counts_replications() {
        let sim = Replications::new(0.0, 3);
        let stat = sim.make_analyzable(
            Box::new(MeanEstimator::default()),
            Box::new(NullTransientDetector::default()),
            Box::new(FixedSampleSize::new(5)),
            Box::new(Banks2005::new(0.95, 0.4, 2, 100).unwrap()),
            0.4,
            crate::OBSERVATIONS_INFINITY,
        );
        let src = EventSource::new("obs");
        let sink = Rc::clone(&stat);
        let again = Rc::clone(&src);
        src.connect(move |_, ctx| {
            sink.collect(ctx.time() + 10.0, 1.0);
            ctx.schedule(&again, ctx.time() + 1.0, Payload::None);
        });
        let boot = Rc::clone(&src);
        sim.engine()
            .system_init_source()
            .connect(move |_, ctx| {
                ctx.schedule(&boot, ctx.time(), Payload::None);
            });
        sim.run();
        assert!(stat.num_observations() == sim.num_replications());
        assert!(sim.num_replications() >= 3);
    }
}
