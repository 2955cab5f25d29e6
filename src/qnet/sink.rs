use super::customer::Customer;
use super::customer::CustomerStatus;
use super::network::Network;
use super::node::Node;
use super::node::NodeCategory;
use super::node::NodeCore;
use super::node::NodeMetric;
use crate::kernel::Context;
use std::rc::Rc;

/// the boundary node absorbing customers out of the network: it stamps the
/// network-level response time and terminates the customer
pub struct SinkNode {
    core: NodeCore,
}

impl SinkNode {
    pub fn new(name: &str) -> Self {
        Self {
            core: NodeCore::new(name),
        }
    }
}

impl Node for SinkNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Sink
    }

    fn process_arrival(&self, net: &Rc<Network>, customer: &Rc<Customer>, _ctx: &Context) {
        let now = net.engine().simulated_time();
        customer.set_departure_time(now);
        customer.set_status(CustomerStatus::Died);
        net.note_departure(customer);
    }

    fn process_departure(&self, _net: &Rc<Network>, customer: &Rc<Customer>, _ctx: &Context) {
        log::warn!("sink '{}' cannot emit departures ({})", self.core.name(), customer);
    }

    fn busy_time(&self, _now: f64) -> f64 {
        0.0
    }

    fn initialize_experiment(&self, _net: &Rc<Network>) {
        self.core.reset_counters();
    }

    fn finalize_experiment(&self, _net: &Rc<Network>) {
        self.core
            .accumulate(NodeMetric::Arrivals, self.core.num_arrivals() as f64, 1.0);
    }
}
