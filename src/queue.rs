//! a self-contained multi-server queue driven directly by the kernel, for
//! single-station studies that do not need the full network machinery.

use crate::dist::Dist;
use crate::kernel::Context;
use crate::kernel::Engine;
use crate::kernel::EventSource;
use crate::kernel::Payload;
use crate::stats::Statistic;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::rc::Rc;
use std::rc::Weak;

/// per-queue performance measures a statistic can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueMetric {
    ResponseTime,
    WaitingTime,
    QueueLength,
    Utilization,
    Throughput,
}

/// an open FCFS queue with c identical servers, exogenous interarrivals,
/// and an optional buffer capacity. departure events carry the job's
/// arrival stamp, which is all the state a job needs.
pub struct OpenQueue {
    engine: Rc<Engine>,
    rng: RefCell<SmallRng>,
    interarrival: Dist,
    service: Dist,
    servers: usize,
    capacity: Option<usize>,
    arrival_source: Rc<EventSource>,
    departure_source: Rc<EventSource>,
    waiting: RefCell<VecDeque<f64>>,
    busy: Cell<usize>,
    busy_integral: Cell<f64>,
    last_event: Cell<f64>,
    arrivals: Cell<usize>,
    departures: Cell<usize>,
    discards: Cell<usize>,
    stats: RefCell<HashMap<QueueMetric, Vec<Rc<dyn Statistic>>>>,
}

impl OpenQueue {
    pub fn new(
        engine: &Rc<Engine>,
        interarrival: Dist,
        service: Dist,
        servers: usize,
        capacity: Option<usize>,
        seed: u64,
    ) -> Rc<Self> {
        let queue = Rc::new(Self {
            engine: Rc::clone(engine),
            rng: RefCell::new(SmallRng::seed_from_u64(seed)),
            interarrival,
            service,
            servers: servers.max(1),
            capacity,
            arrival_source: EventSource::new("Queue Arrival"),
            departure_source: EventSource::new("Queue Departure"),
            waiting: RefCell::new(VecDeque::new()),
            busy: Cell::new(0),
            busy_integral: Cell::new(0.0),
            last_event: Cell::new(0.0),
            arrivals: Cell::new(0),
            departures: Cell::new(0),
            discards: Cell::new(0),
            stats: RefCell::new(HashMap::new()),
        });
        let weak = Rc::downgrade(&queue);
        queue.arrival_source.connect(move |_, ctx| {
            if let Some(q) = weak.upgrade() {
                q.on_arrival(ctx);
            }
        });
        let weak = Rc::downgrade(&queue);
        queue.departure_source.connect(move |event, ctx| {
            if let Some(q) = weak.upgrade() {
                q.on_departure(event.payload(), ctx);
            }
        });
        let weak: Weak<Self> = Rc::downgrade(&queue);
        engine.system_init_source().connect(move |_, ctx| {
            if let Some(q) = weak.upgrade() {
                q.restart(ctx);
            }
        });
        let weak = Rc::downgrade(&queue);
        engine.system_finit_source().connect(move |_, ctx| {
            if let Some(q) = weak.upgrade() {
                q.finalize(ctx);
            }
        });
        queue
    }

    pub fn reseed(&self, seed: u64) {
        *self.rng.borrow_mut() = SmallRng::seed_from_u64(seed);
    }

    pub fn attach(&self, metric: QueueMetric, stat: Rc<dyn Statistic>) {
        self.stats.borrow_mut().entry(metric).or_default().push(stat);
    }

    pub fn num_arrivals(&self) -> usize {
        self.arrivals.get()
    }

    pub fn num_departures(&self) -> usize {
        self.departures.get()
    }

    pub fn num_discards(&self) -> usize {
        self.discards.get()
    }

    pub fn queue_length(&self) -> usize {
        self.waiting.borrow().len()
    }

    pub fn num_busy_servers(&self) -> usize {
        self.busy.get()
    }

    /// server-time-weighted utilization up to now
    pub fn utilization(&self, now: f64) -> f64 {
        match now {
            t if t > 0.0 => self.busy_integral.get() / (self.servers as f64 * t),
            _ => 0.0,
        }
    }

    fn accumulate(&self, metric: QueueMetric, value: f64, weight: f64) {
        if let Some(list) = self.stats.borrow().get(&metric) {
            for stat in list {
                stat.collect(value, weight);
            }
        }
    }

    fn draw(&self, dist: &Dist) -> f64 {
        dist.draw(&mut self.rng.borrow_mut())
    }

    /// advance the time-weighted integrals to now
    fn track(&self, now: f64) {
        let elapsed = now - self.last_event.get();
        if elapsed > 0.0 {
            self.busy_integral
                .set(self.busy_integral.get() + self.busy.get() as f64 * elapsed);
            self.accumulate(
                QueueMetric::QueueLength,
                self.waiting.borrow().len() as f64,
                elapsed,
            );
        }
        self.last_event.set(now);
    }

    /// per-experiment reset and the first exogenous arrival
    fn restart(&self, ctx: &Context) {
        self.waiting.borrow_mut().clear();
        self.busy.set(0);
        self.busy_integral.set(0.0);
        self.last_event.set(ctx.time());
        self.arrivals.set(0);
        self.departures.set(0);
        self.discards.set(0);
        let gap = self.draw(&self.interarrival);
        ctx.schedule(&self.arrival_source, ctx.time() + gap, Payload::None);
    }

    fn on_arrival(&self, ctx: &Context) {
        let now = ctx.time();
        self.track(now);
        self.arrivals.set(self.arrivals.get() + 1);
        if self.busy.get() < self.servers {
            self.busy.set(self.busy.get() + 1);
            self.accumulate(QueueMetric::WaitingTime, 0.0, 1.0);
            let service = self.draw(&self.service);
            ctx.schedule(&self.departure_source, now + service, Payload::Real(now));
        } else if self
            .capacity
            .map_or(true, |cap| self.waiting.borrow().len() < cap)
        {
            self.waiting.borrow_mut().push_back(now);
        } else {
            self.discards.set(self.discards.get() + 1);
        }
        let gap = self.draw(&self.interarrival);
        ctx.schedule(&self.arrival_source, now + gap, Payload::None);
    }

    fn on_departure(&self, payload: &Payload, ctx: &Context) {
        let now = ctx.time();
        self.track(now);
        self.departures.set(self.departures.get() + 1);
        if let Payload::Real(arrived) = payload {
            self.accumulate(QueueMetric::ResponseTime, now - arrived, 1.0);
        }
        let next = self.waiting.borrow_mut().pop_front();
        match next {
            Some(arrived) => {
                self.accumulate(QueueMetric::WaitingTime, now - arrived, 1.0);
                let service = self.draw(&self.service);
                ctx.schedule(&self.departure_source, now + service, Payload::Real(arrived));
            }
            None => self.busy.set(self.busy.get() - 1),
        }
    }

    fn finalize(&self, ctx: &Context) {
        let now = ctx.time();
        self.track(now);
        if now > 0.0 {
            self.accumulate(QueueMetric::Utilization, self.utilization(now), 1.0);
            self.accumulate(
                QueueMetric::Throughput,
                self.departures.get() as f64 / now,
                1.0,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Banks2005;
    use crate::analysis::FixedSampleSize;
    use crate::analysis::NullTransientDetector;
    use crate::dist;
    use crate::kernel::Replications;
    use crate::stats::MeanEstimator;
    use crate::stats::QuantileEstimator;

    /// expected M/M/c mean response time via the Erlang C formula
    fn mmc_response_time(lambda: f64, mu: f64, c: usize) -> f64 {
        let a = lambda / mu;
        let rho = a / c as f64;
        let mut sum = 0.0;
        let mut term = 1.0;
        for k in 0..c {
            if k > 0 {
                term *= a / k as f64;
            }
            sum += term;
        }
        let top = term * a / c as f64 / (1.0 - rho);
        let wait_probability = top / (sum + top);
        1.0 / mu + wait_probability / (c as f64 * mu - lambda)
    }

    /// M/M/5 bank: arrival rate 1, mean service 4, five tellers. five
    /// replications of 1000 observations each; the mean response time must
    /// land near the Erlang C value, with the 99th percentile estimated
    /// from the same samples.
    #[test]
    fn bank_with_five_tellers_matches_erlang_c() {
        let sim = Replications::new(1.0, 5);
        let queue = OpenQueue::new(
            sim.engine(),
            dist::exponential(1.0).unwrap(),
            dist::exponential(0.25).unwrap(),
            5,
            None,
            5489,
        );
        let mean = sim.make_analyzable(
            Box::new(MeanEstimator::default()),
            Box::new(NullTransientDetector::default()),
            Box::new(FixedSampleSize::new(1000)),
            Box::new(Banks2005::new(0.95, 0.04, 2, 1000).unwrap()),
            0.04,
            crate::OBSERVATIONS_INFINITY,
        );
        queue.attach(QueueMetric::ResponseTime, mean.clone());
        let q99 = sim.make_analyzable(
            Box::new(QuantileEstimator::new(0.99, 0.95).unwrap()),
            Box::new(NullTransientDetector::default()),
            Box::new(FixedSampleSize::new(1000)),
            Box::new(Banks2005::new(0.95, 0.04, 2, 1000).unwrap()),
            0.04,
            crate::OBSERVATIONS_INFINITY,
        );
        queue.attach(QueueMetric::ResponseTime, q99.clone());
        let reseed = Rc::clone(&queue);
        sim.begin_of_replication_source().connect(move |event, _| {
            reseed.reseed(5489 + event.index().unwrap_or(0) as u64);
        });
        sim.run();
        assert!(sim.num_replications() >= 5);
        assert!(mean.num_observations() == sim.num_replications());
        let expected = mmc_response_time(1.0, 0.25, 5);
        let error = (mean.estimate() - expected).abs();
        let slack = mean.half_width().max(0.15 * expected);
        assert!(
            error < slack,
            "estimate {} vs analytic {} (half-width {})",
            mean.estimate(),
            expected,
            mean.half_width()
        );
        // the tail quantile sits well above the mean for an M/M/c
        assert!(q99.estimate() > mean.estimate());
    }

    #[test]
    fn bounded_queue_discards_overflow() {
        let sim = Replications::new(50.0, 2);
        let queue = OpenQueue::new(
            sim.engine(),
            dist::exponential(2.0).unwrap(),
            dist::exponential(0.5).unwrap(),
            1,
            Some(2),
            7,
        );
        sim.run();
        // heavily overloaded single server with a two-slot buffer
        assert!(queue.num_discards() > 0);
        assert!(queue.queue_length() <= 2);
    }

    #[test]
    fn conservation_holds_at_the_end_of_a_replication() {
        let sim = Replications::new(100.0, 1);
        let queue = OpenQueue::new(
            sim.engine(),
            dist::exponential(1.0).unwrap(),
            dist::exponential(1.25).unwrap(),
            1,
            None,
            99,
        );
        sim.run();
        let in_system = queue.num_busy_servers() + queue.queue_length();
        assert!(
            queue.num_arrivals() == queue.num_departures() + queue.num_discards() + in_system
        );
    }

    #[test]
    fn light_load_utilization_matches_rho() {
        let sim = Replications::new(2000.0, 2);
        let queue = OpenQueue::new(
            sim.engine(),
            dist::exponential(1.0).unwrap(),
            dist::exponential(2.0).unwrap(),
            1,
            None,
            1234,
        );
        // utilization is observed once per replication at finalization, so
        // the replication length is clock-driven
        let util = sim.make_analyzable(
            Box::new(MeanEstimator::default()),
            Box::new(NullTransientDetector::default()),
            Box::new(crate::analysis::FixedDuration::new(
                2000.0,
                sim.engine().clock_handle(),
            )),
            Box::new(crate::analysis::FixedCount::new(2)),
            0.5,
            crate::OBSERVATIONS_INFINITY,
        );
        queue.attach(QueueMetric::Utilization, util.clone());
        sim.run();
        // rho = lambda / mu = 0.5
        let estimate = util.estimate();
        assert!((estimate - 0.5).abs() < 0.08, "utilization {}", estimate);
    }
}
