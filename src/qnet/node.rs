use super::NodeId;
use super::customer::Customer;
use super::network::Network;
use crate::kernel::Context;
use crate::kernel::Event;
use crate::kernel::EventSource;
use crate::stats::Statistic;
use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCategory {
    Source,
    Sink,
    Delay,
    Station,
}

/// per-node performance measures a statistic can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeMetric {
    ResponseTime,
    WaitingTime,
    QueueLength,
    Utilization,
    Throughput,
    BusyTime,
    Arrivals,
    Departures,
    Discards,
}

/// extra event sources a node wants wired into the network dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    Service,
    Discard,
    Quantum,
}

/// state every node shares: identity, the arrival/departure event sources,
/// counters, and attached statistics
pub struct NodeCore {
    id: Cell<NodeId>,
    name: String,
    arrival: Rc<EventSource>,
    departure: Rc<EventSource>,
    arrivals: Cell<usize>,
    departures: Cell<usize>,
    last_event_time: Cell<f64>,
    stats: RefCell<HashMap<NodeMetric, Vec<Rc<dyn Statistic>>>>,
}

impl NodeCore {
    pub fn new(name: &str) -> Self {
        Self {
            id: Cell::new(0),
            name: name.to_string(),
            arrival: EventSource::new(&format!("{} Arrival", name)),
            departure: EventSource::new(&format!("{} Departure", name)),
            arrivals: Cell::new(0),
            departures: Cell::new(0),
            last_event_time: Cell::new(0.0),
            stats: RefCell::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id.get()
    }

    pub(crate) fn set_id(&self, id: NodeId) {
        self.id.set(id);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arrival_source(&self) -> &Rc<EventSource> {
        &self.arrival
    }

    pub fn departure_source(&self) -> &Rc<EventSource> {
        &self.departure
    }

    pub fn num_arrivals(&self) -> usize {
        self.arrivals.get()
    }

    pub fn num_departures(&self) -> usize {
        self.departures.get()
    }

    pub(crate) fn count_arrival(&self) {
        self.arrivals.set(self.arrivals.get() + 1);
    }

    pub(crate) fn count_departure(&self) {
        self.departures.set(self.departures.get() + 1);
    }

    pub fn last_event_time(&self) -> f64 {
        self.last_event_time.get()
    }

    pub(crate) fn set_last_event_time(&self, time: f64) {
        self.last_event_time.set(time);
    }

    /// attach a statistic to a per-node measure
    pub fn attach(&self, metric: NodeMetric, stat: Rc<dyn Statistic>) {
        self.stats.borrow_mut().entry(metric).or_default().push(stat);
    }

    /// statistics attached to a measure; asking for a measure nothing was
    /// attached to is a logic error
    pub fn statistics(&self, metric: NodeMetric) -> crate::Result<Vec<Rc<dyn Statistic>>> {
        let stats = self.stats.borrow();
        match stats.get(&metric) {
            Some(list) if !list.is_empty() => Ok(list.clone()),
            _ => Err(crate::SimError::Logic(format!(
                "no statistic attached to {:?} on node '{}'",
                metric, self.name
            ))),
        }
    }

    pub(crate) fn accumulate(&self, metric: NodeMetric, value: f64, weight: f64) {
        if let Some(list) = self.stats.borrow().get(&metric) {
            for stat in list {
                stat.collect(value, weight);
            }
        }
    }

    pub(crate) fn reset_counters(&self) {
        self.arrivals.set(0);
        self.departures.set(0);
        self.last_event_time.set(0.0);
    }
}

/// a station of the network. arrival/departure bookkeeping common to all
/// nodes lives in the network dispatch; these hooks carry the per-variant
/// behavior.
pub trait Node {
    fn core(&self) -> &NodeCore;
    fn category(&self) -> NodeCategory;
    fn process_arrival(&self, net: &Rc<Network>, customer: &Rc<Customer>, ctx: &Context);
    fn process_departure(&self, net: &Rc<Network>, customer: &Rc<Customer>, ctx: &Context);
    fn process_service(&self, _net: &Rc<Network>, _customer: &Rc<Customer>, _ctx: &Context) {}
    fn process_discard(&self, _net: &Rc<Network>, _customer: &Rc<Customer>, _ctx: &Context) {}
    fn process_quantum(&self, _net: &Rc<Network>, _event: &Event, _ctx: &Context) {}
    /// cumulative busy time up to now
    fn busy_time(&self, now: f64) -> f64;
    fn num_discards(&self) -> usize {
        0
    }
    /// event sources beyond arrival/departure the network must dispatch
    fn extra_sources(&self) -> Vec<(SourceRole, Rc<EventSource>)> {
        Vec::new()
    }
    fn initialize_experiment(&self, net: &Rc<Network>);
    fn finalize_experiment(&self, net: &Rc<Network>);

    fn id(&self) -> NodeId {
        self.core().id()
    }

    fn name(&self) -> String {
        self.core().name().to_string()
    }

    /// busy time over elapsed time
    fn utilization(&self, now: f64) -> f64 {
        match now {
            t if t > 0.0 => self.busy_time(t) / t,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::MeanEstimator;

    #[test]
    fn asking_for_an_unattached_measure_is_a_logic_error() {
        let core = NodeCore::new("teller");
        assert!(core.statistics(NodeMetric::ResponseTime).is_err());
        core.attach(NodeMetric::ResponseTime, Rc::new(MeanEstimator::default()));
        assert!(core.statistics(NodeMetric::ResponseTime).is_ok());
        assert!(core.statistics(NodeMetric::Utilization).is_err());
    }

    #[test]
    fn accumulation_reaches_every_attached_statistic() {
        let core = NodeCore::new("teller");
        let a = Rc::new(MeanEstimator::default());
        let b = Rc::new(MeanEstimator::default());
        core.attach(NodeMetric::ResponseTime, a.clone());
        core.attach(NodeMetric::ResponseTime, b.clone());
        core.accumulate(NodeMetric::ResponseTime, 2.0, 1.0);
        assert!(a.num_observations() == 1);
        assert!(b.num_observations() == 1);
    }
}
