use super::ClassId;
use super::CustomerId;
use super::NodeId;
use super::class::CustomerClass;
use super::customer::Customer;
use super::customer::CustomerStatus;
use super::node::Node;
use super::node::NodeMetric;
use super::node::SourceRole;
use super::routing::Routing;
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
use std::rc::Rc;
use std::rc::Weak;

/// network-level performance measures a statistic can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetMetric {
    ResponseTime,
    Throughput,
    Arrivals,
    Departures,
    Discards,
}

/// a compositional queueing network: an arena of nodes and customer
/// classes wired onto a kernel engine. the network owns every customer and
/// dispatches node event sources; all cross-references are arena ids, so
/// the only cycles are weak ones inside the dispatch slots.
pub struct Network {
    weak: Weak<Network>,
    engine: Rc<Engine>,
    rng: RefCell<SmallRng>,
    nodes: RefCell<Vec<Rc<dyn Node>>>,
    classes: RefCell<Vec<Rc<CustomerClass>>>,
    alive: RefCell<HashMap<CustomerId, Rc<Customer>>>,
    next_customer: Cell<CustomerId>,
    arrivals: Cell<usize>,
    departures: Cell<usize>,
    discards: Cell<usize>,
    stats: RefCell<HashMap<NetMetric, Vec<Rc<dyn Statistic>>>>,
    departure_source: Rc<EventSource>,
    discard_source: Rc<EventSource>,
}

impl Network {
    /// build a network on the engine and hook its lifecycle into the
    /// system-initialization / system-finalization events
    pub fn new(engine: &Rc<Engine>, seed: u64) -> Rc<Self> {
        let net = Rc::new_cyclic(|weak: &Weak<Network>| {
            let hook = weak.clone();
            engine.system_init_source().connect(move |_, ctx| {
                if let Some(net) = hook.upgrade() {
                    net.initialize_experiment(ctx);
                }
            });
            let hook = weak.clone();
            engine.system_finit_source().connect(move |_, ctx| {
                if let Some(net) = hook.upgrade() {
                    net.finalize_experiment(ctx);
                }
            });
            Network {
                weak: weak.clone(),
                engine: Rc::clone(engine),
                rng: RefCell::new(SmallRng::seed_from_u64(seed)),
                nodes: RefCell::new(Vec::new()),
                classes: RefCell::new(Vec::new()),
                alive: RefCell::new(HashMap::new()),
                next_customer: Cell::new(0),
                arrivals: Cell::new(0),
                departures: Cell::new(0),
                discards: Cell::new(0),
                stats: RefCell::new(HashMap::new()),
                departure_source: EventSource::new("Network Departure"),
                discard_source: EventSource::new("Network Discard"),
            }
        });
        net
    }

    pub fn engine(&self) -> &Rc<Engine> {
        &self.engine
    }

    /// notification source fired whenever a customer leaves the network
    pub fn departure_source(&self) -> &Rc<EventSource> {
        &self.departure_source
    }

    /// notification source fired whenever a customer is discarded
    pub fn discard_source(&self) -> &Rc<EventSource> {
        &self.discard_source
    }

    pub fn reseed(&self, seed: u64) {
        *self.rng.borrow_mut() = SmallRng::seed_from_u64(seed);
    }

    /// wire a node into the arena; its event sources dispatch back into the
    /// node through this network
    pub fn add_node(&self, node: Rc<dyn Node>) -> NodeId {
        let id = self.nodes.borrow().len();
        node.core().set_id(id);
        let weak = self.weak.clone();
        node.core().arrival_source().connect(move |event, ctx| {
            if let (Some(net), Some(customer)) = (weak.upgrade(), event.customer()) {
                net.dispatch_arrival(id, &Rc::clone(customer), ctx);
            }
        });
        let weak = self.weak.clone();
        node.core().departure_source().connect(move |event, ctx| {
            if let (Some(net), Some(customer)) = (weak.upgrade(), event.customer()) {
                net.dispatch_departure(id, &Rc::clone(customer), ctx);
            }
        });
        for (role, source) in node.extra_sources() {
            let weak = self.weak.clone();
            source.connect(move |event, ctx| {
                let Some(net) = weak.upgrade() else {
                    return;
                };
                let node = net.node_rc(id);
                match role {
                    SourceRole::Service => {
                        if let Some(customer) = event.customer() {
                            let customer = Rc::clone(customer);
                            node.process_service(&net, &customer, ctx);
                            node.core().set_last_event_time(ctx.time());
                        }
                    }
                    SourceRole::Discard => {
                        if let Some(customer) = event.customer() {
                            let customer = Rc::clone(customer);
                            node.process_discard(&net, &customer, ctx);
                            node.core().set_last_event_time(ctx.time());
                        }
                    }
                    SourceRole::Quantum => {
                        node.process_quantum(&net, event, ctx);
                        node.core().set_last_event_time(ctx.time());
                    }
                }
            });
        }
        self.nodes.borrow_mut().push(node);
        id
    }

    pub fn add_class(&self, class: CustomerClass) -> ClassId {
        let id = self.classes.borrow().len();
        class.set_id(id);
        self.classes.borrow_mut().push(Rc::new(class));
        id
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn num_classes(&self) -> usize {
        self.classes.borrow().len()
    }

    pub fn node(&self, id: NodeId) -> crate::Result<Rc<dyn Node>> {
        self.nodes
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| crate::SimError::Logic(format!("no node with id {}", id)))
    }

    fn node_rc(&self, id: NodeId) -> Rc<dyn Node> {
        Rc::clone(&self.nodes.borrow()[id])
    }

    pub fn class(&self, id: ClassId) -> crate::Result<Rc<CustomerClass>> {
        self.classes
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| crate::SimError::Logic(format!("no class with id {}", id)))
    }

    pub(crate) fn class_is_open(&self, id: ClassId) -> bool {
        self.classes
            .borrow()
            .get(id)
            .map(|c| c.is_open())
            .unwrap_or(false)
    }

    pub(crate) fn sample_interarrival(&self, class: ClassId) -> Option<f64> {
        let class = self.classes.borrow().get(class).cloned()?;
        class.sample_interarrival(&mut self.rng.borrow_mut())
    }

    pub(crate) fn draw(&self, dist: &Dist) -> f64 {
        dist.draw(&mut self.rng.borrow_mut())
    }

    pub(crate) fn route(
        &self,
        routing: &dyn Routing,
        customer: &Customer,
    ) -> crate::Result<(NodeId, ClassId)> {
        routing.route(customer, &mut self.rng.borrow_mut())
    }

    /// birth a customer of the class at the given node
    pub fn make_customer(&self, class: ClassId, node: NodeId) -> Rc<Customer> {
        let id = self.next_customer.get();
        self.next_customer.set(id + 1);
        let customer = Rc::new(Customer::new(id, class, node));
        self.alive.borrow_mut().insert(id, Rc::clone(&customer));
        self.arrivals.set(self.arrivals.get() + 1);
        customer
    }

    /// schedule the customer's arrival at a node after the given delay
    pub fn send(&self, customer: &Rc<Customer>, node: NodeId, delay: f64) {
        let target = match self.node(node) {
            Ok(target) => target,
            Err(e) => {
                log::error!("cannot send {}: {}", customer, e);
                return;
            }
        };
        let now = self.engine.simulated_time();
        self.engine.schedule_event(
            target.core().arrival_source(),
            now + delay,
            Payload::Customer(Rc::clone(customer)),
        );
    }

    /// a sink absorbed the customer: count it, record the network response
    /// time, notify subscribers, and drop the arena reference
    pub(crate) fn note_departure(&self, customer: &Rc<Customer>) {
        self.departures.set(self.departures.get() + 1);
        let response = customer.departure_time() - customer.arrival_time();
        self.accumulate(NetMetric::ResponseTime, response, 1.0);
        let now = self.engine.simulated_time();
        self.engine.schedule_event(
            &self.departure_source,
            now,
            Payload::Customer(Rc::clone(customer)),
        );
        self.alive.borrow_mut().remove(&customer.id());
    }

    /// a station refused the customer: count it, notify subscribers, and
    /// drop the arena reference
    pub(crate) fn note_discard(&self, customer: &Rc<Customer>) {
        self.discards.set(self.discards.get() + 1);
        let now = self.engine.simulated_time();
        self.engine.schedule_event(
            &self.discard_source,
            now,
            Payload::Customer(Rc::clone(customer)),
        );
        self.alive.borrow_mut().remove(&customer.id());
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

    pub fn num_in_system(&self) -> usize {
        self.alive.borrow().len()
    }

    pub fn attach(&self, metric: NetMetric, stat: Rc<dyn Statistic>) {
        self.stats.borrow_mut().entry(metric).or_default().push(stat);
    }

    pub fn statistics(&self, metric: NetMetric) -> crate::Result<Vec<Rc<dyn Statistic>>> {
        let stats = self.stats.borrow();
        match stats.get(&metric) {
            Some(list) if !list.is_empty() => Ok(list.clone()),
            _ => Err(crate::SimError::Logic(format!(
                "no statistic attached to {:?} on the network",
                metric
            ))),
        }
    }

    pub(crate) fn accumulate(&self, metric: NetMetric, value: f64, weight: f64) {
        if let Some(list) = self.stats.borrow().get(&metric) {
            for stat in list {
                stat.collect(value, weight);
            }
        }
    }

    fn dispatch_arrival(&self, id: NodeId, customer: &Rc<Customer>, ctx: &Context) {
        let Some(net) = self.weak.upgrade() else {
            return;
        };
        let now = ctx.time();
        let node = self.node_rc(id);
        if customer.status() == CustomerStatus::Born {
            customer.set_arrival_time(now);
        }
        customer.change_node(id);
        customer.set_status(CustomerStatus::NodeArrived);
        customer.record_node_arrival(id, now);
        node.core().count_arrival();
        node.process_arrival(&net, customer, ctx);
        node.core().set_last_event_time(now);
    }

    fn dispatch_departure(&self, id: NodeId, customer: &Rc<Customer>, ctx: &Context) {
        let Some(net) = self.weak.upgrade() else {
            return;
        };
        let now = ctx.time();
        let node = self.node_rc(id);
        node.core().count_departure();
        customer.set_status(CustomerStatus::NodeExited);
        customer.record_node_departure(id, now);
        if let Some(arrived) = customer.last_node_arrival(id) {
            node.core()
                .accumulate(NodeMetric::ResponseTime, now - arrived, 1.0);
        }
        node.process_departure(&net, customer, ctx);
        node.core().set_last_event_time(now);
    }

    /// per-experiment reset: counters, customers, nodes, and the fixed
    /// populations of closed classes
    fn initialize_experiment(&self, _ctx: &Context) {
        let Some(net) = self.weak.upgrade() else {
            return;
        };
        self.arrivals.set(0);
        self.departures.set(0);
        self.discards.set(0);
        self.alive.borrow_mut().clear();
        let nodes = self.nodes.borrow().clone();
        for node in &nodes {
            node.initialize_experiment(&net);
        }
        let classes = self.classes.borrow().clone();
        for class in classes {
            if !class.is_open() {
                for _ in 0..class.population() {
                    let customer = self.make_customer(class.id(), class.reference_node());
                    self.send(&customer, class.reference_node(), 0.0);
                }
            }
        }
    }

    /// finalize global measures that only make sense over the whole run
    fn finalize_experiment(&self, _ctx: &Context) {
        let Some(net) = self.weak.upgrade() else {
            return;
        };
        let now = self.engine.simulated_time();
        if now > 0.0 {
            self.accumulate(
                NetMetric::Throughput,
                self.departures.get() as f64 / now,
                1.0,
            );
        }
        self.accumulate(NetMetric::Arrivals, self.arrivals.get() as f64, 1.0);
        self.accumulate(NetMetric::Departures, self.departures.get() as f64, 1.0);
        self.accumulate(NetMetric::Discards, self.discards.get() as f64, 1.0);
        let nodes = self.nodes.borrow().clone();
        for node in &nodes {
            node.finalize_experiment(&net);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FixedCount;
    use crate::analysis::FixedDuration;
    use crate::analysis::NullTransientDetector;
    use crate::dist;
    use crate::kernel::Replications;
    use crate::qnet::Fcfs;
    use crate::qnet::Fifo;
    use crate::qnet::Node;
    use crate::qnet::NodeMetric;
    use crate::qnet::ProcessorSharing;
    use crate::qnet::RoundRobin;
    use crate::qnet::SinkNode;
    use crate::qnet::SourceNode;
    use crate::qnet::Station;
    use crate::qnet::class::CustomerClass;
    use crate::qnet::routing::Deterministic;
    use crate::qnet::routing::Probabilistic;
    use crate::stats::MeanEstimator;
    use crate::stats::Statistic;

    /// single class M/M/1 with deterministic routing source -> bank ->
    /// sink: lambda 5, mean service 0.06, so the bank runs at rho = 0.3
    #[test]
    fn mm1_bank_utilization_approaches_rho() {
        let sim = Replications::new(1000.0, 5);
        let net = Network::new(sim.engine(), 0);
        // node ids are assigned in insertion order: 0, 1, 2
        let source = Rc::new(SourceNode::new(
            "Source",
            Deterministic::new().add_route(0, 0, 1, 0),
        ));
        let bank = Rc::new(Station::new(
            "Bank",
            Fifo::unbounded(),
            Fcfs::new(1, vec![(0, dist::exponential(1.0 / 0.06).unwrap())]),
            Deterministic::new().add_route(1, 0, 2, 0),
        ));
        let sink = Rc::new(SinkNode::new("Sink"));
        net.add_node(source.clone());
        net.add_node(bank.clone());
        net.add_node(sink.clone());
        let class = net.add_class(CustomerClass::open(
            "requests",
            dist::exponential(5.0).unwrap(),
            0,
        ));
        source.add_class(class);
        let util = sim.make_analyzable(
            Box::new(MeanEstimator::default()),
            Box::new(NullTransientDetector::default()),
            Box::new(FixedDuration::new(1000.0, sim.engine().clock_handle())),
            Box::new(FixedCount::new(5)),
            0.2,
            crate::OBSERVATIONS_INFINITY,
        );
        bank.core().attach(NodeMetric::Utilization, util.clone());
        let reseed = Rc::clone(&net);
        sim.begin_of_replication_source().connect(move |event, _| {
            reseed.reseed(42 + event.index().unwrap_or(0) as u64);
        });
        sim.run();
        assert!(sim.num_replications() >= 5);
        let estimate = util.estimate();
        assert!((estimate - 0.3).abs() < 0.05, "utilization {}", estimate);
        assert!(net.num_departures() <= net.num_arrivals());
    }

    /// open tandem of three processor-sharing stages: the network response
    /// time must track the sum of the per-stage response times
    #[test]
    fn tandem_response_time_is_additive() {
        let sim = Replications::new(100.0, 5);
        let net = Network::new(sim.engine(), 0);
        let source = Rc::new(SourceNode::new(
            "Source",
            Deterministic::new().add_route(0, 0, 1, 0),
        ));
        let web = Rc::new(Station::new(
            "WebServer",
            Fifo::unbounded(),
            ProcessorSharing::new(1, vec![(0, dist::exponential(1.0 / 0.03).unwrap())]),
            Deterministic::new().add_route(1, 0, 2, 0),
        ));
        let app = Rc::new(Station::new(
            "AppServer",
            Fifo::unbounded(),
            ProcessorSharing::new(1, vec![(0, dist::exponential(1.0 / 0.06).unwrap())]),
            Deterministic::new().add_route(2, 0, 3, 0),
        ));
        let db = Rc::new(Station::new(
            "DBServer",
            Fifo::unbounded(),
            ProcessorSharing::new(1, vec![(0, dist::exponential(1.0 / 0.03).unwrap())]),
            Deterministic::new().add_route(3, 0, 4, 0),
        ));
        let sink = Rc::new(SinkNode::new("Sink"));
        net.add_node(source.clone());
        net.add_node(web.clone());
        net.add_node(app.clone());
        net.add_node(db.clone());
        net.add_node(sink.clone());
        let class = net.add_class(CustomerClass::open(
            "requests",
            dist::exponential(5.3).unwrap(),
            0,
        ));
        source.add_class(class);
        let total: Rc<dyn Statistic> = Rc::new(MeanEstimator::default());
        net.attach(NetMetric::ResponseTime, Rc::clone(&total));
        let stages = [&web, &app, &db]
            .iter()
            .map(|station| {
                let stat: Rc<dyn Statistic> = Rc::new(MeanEstimator::default());
                station
                    .core()
                    .attach(NodeMetric::ResponseTime, Rc::clone(&stat));
                stat
            })
            .collect::<Vec<_>>();
        sim.run();
        assert!(sim.num_replications() == 5);
        let stage_sum = stages.iter().map(|s| s.estimate()).sum::<f64>();
        let whole = total.estimate();
        assert!(whole > 0.0 && stage_sum > 0.0);
        // customers still in flight at the replication boundary account
        // for the small mismatch
        let gap = (whole - stage_sum).abs() / whole;
        assert!(gap < 0.15, "network {} vs stage sum {}", whole, stage_sum);
    }

    /// two closed-class customers sharing one round-robin server with a
    /// deterministic demand interleave exactly: with demand 1 and quantum
    /// 1/4 they finish at 1.75 and 2.0
    #[test]
    fn round_robin_interleaves_two_customers() {
        let sim = Replications::new(5.0, 1);
        let net = Network::new(sim.engine(), 0);
        let cpu = Rc::new(Station::new(
            "CPU",
            Fifo::unbounded(),
            RoundRobin::new(0.25, 1, vec![(0, dist::constant(1.0))]),
            Deterministic::new().add_route(0, 0, 1, 0),
        ));
        let sink = Rc::new(SinkNode::new("Sink"));
        net.add_node(cpu.clone());
        net.add_node(sink.clone());
        net.add_class(CustomerClass::closed("jobs", 2, 0));
        let responses: Rc<dyn Statistic> = Rc::new(MeanEstimator::default());
        net.attach(NetMetric::ResponseTime, Rc::clone(&responses));
        sim.run();
        assert!(net.num_departures() == 2);
        // completions at 1.75 and 2.0 average to 1.875
        assert!(
            (responses.estimate() - 1.875).abs() < 1e-9,
            "mean response {}",
            responses.estimate()
        );
    }

    /// a bounded station under overload discards, and the flow balance
    /// arrivals = departures + discards + in-system always closes
    #[test]
    fn flow_balance_closes_with_discards() {
        let sim = Replications::new(200.0, 1);
        let net = Network::new(sim.engine(), 0);
        let source = Rc::new(SourceNode::new(
            "Source",
            Deterministic::new().add_route(0, 0, 1, 0),
        ));
        let station = Rc::new(Station::new(
            "Bounded",
            Fifo::bounded(2),
            Fcfs::new(1, vec![(0, dist::exponential(0.5).unwrap())]),
            Probabilistic::new()
                .add_route(1, 0, 2, 0, 0.9)
                .add_route(1, 0, 1, 0, 0.1),
        ));
        let sink = Rc::new(SinkNode::new("Sink"));
        net.add_node(source.clone());
        net.add_node(station.clone());
        net.add_node(sink.clone());
        let class = net.add_class(CustomerClass::open(
            "load",
            dist::exponential(2.0).unwrap(),
            0,
        ));
        source.add_class(class);
        sim.run();
        assert!(net.num_discards() > 0);
        assert!(net.num_departures() <= net.num_arrivals());
        assert!(
            net.num_arrivals()
                == net.num_departures() + net.num_discards() + net.num_in_system()
        );
        assert!(station.num_discards() == net.num_discards());
    }
}
