use super::ClassId;
use super::CustomerId;
use super::customer::Customer;
use super::network::Network;
use super::runtime::RuntimeInfo;
use super::station::Station;
use crate::dist::Dist;
use crate::float;
use crate::kernel::Event;
use crate::kernel::Payload;
use crate::kernel::Quantum;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::rc::Rc;

/// what a service strategy may do while scheduling: read the clock, draw
/// service demands, and (re)schedule completion and quantum events through
/// its station
pub struct ServiceCx<'a> {
    pub(crate) net: &'a Rc<Network>,
    pub(crate) station: &'a Station,
}

impl ServiceCx<'_> {
    pub fn now(&self) -> f64 {
        self.net.engine().simulated_time()
    }

    pub fn draw(&self, dist: &Dist) -> f64 {
        self.net.draw(dist)
    }

    pub fn schedule_completion(&self, customer: &Rc<Customer>, delay: f64) {
        self.station.schedule_service(self.net, customer, delay);
    }

    /// move a pending completion; schedules a fresh one when none exists
    pub fn reschedule_completion(&self, customer: &Rc<Customer>, delay: f64) {
        self.station.reschedule_service(self.net, customer, delay);
    }

    pub fn schedule_quantum(&self, state: Quantum, delay: f64) -> Option<Rc<Event>> {
        self.station.schedule_quantum(self.net, state, delay)
    }

    pub fn reschedule_event(&self, event: &Rc<Event>, time: f64) {
        self.net.engine().reschedule_event(event, time);
    }
}

/// bookkeeping shared by all service strategies: the runtime-info map, the
/// capacity multiplier, and busy-time integration
pub struct ServiceBase {
    multiplier: f64,
    infos: HashMap<CustomerId, RuntimeInfo>,
    busy_time: f64,
    last_update: f64,
}

impl ServiceBase {
    pub fn new() -> Self {
        Self {
            multiplier: 1.0,
            infos: HashMap::new(),
            busy_time: 0.0,
            last_update: 0.0,
        }
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn set_multiplier(&mut self, multiplier: f64) {
        self.multiplier = multiplier;
    }

    pub fn num_admitted(&self) -> usize {
        self.infos.len()
    }

    pub fn info(&self, id: CustomerId) -> Option<&RuntimeInfo> {
        self.infos.get(&id)
    }

    pub fn info_mut(&mut self, id: CustomerId) -> Option<&mut RuntimeInfo> {
        self.infos.get_mut(&id)
    }

    pub fn infos(&self) -> impl Iterator<Item = &RuntimeInfo> {
        self.infos.values()
    }

    pub fn admit(&mut self, info: RuntimeInfo) {
        self.infos.insert(info.customer().id(), info);
    }

    /// drop a customer's bookkeeping, handing its share profile and accrued
    /// runtime over to the customer record
    pub fn evict(&mut self, id: CustomerId) -> Option<RuntimeInfo> {
        self.infos.remove(&id).map(|mut info| {
            info.flush_profile();
            let customer = info.customer();
            customer.set_runtime(customer.runtime() + info.completed_work());
            info
        })
    }

    pub fn raw_busy_time(&self) -> f64 {
        self.busy_time
    }

    pub fn last_update(&self) -> f64 {
        self.last_update
    }

    /// advance every admitted customer's accrued work to now and extend the
    /// busy-time integral by the union of their active spans
    pub fn update_state(&mut self, now: f64) {
        if now <= self.last_update {
            return;
        }
        let mut begin = now;
        for info in self.infos.values_mut() {
            if info.start_time() == now {
                continue;
            }
            let from = info.start_time().max(self.last_update);
            if from < begin {
                begin = from;
            }
            info.accumulate(now);
        }
        if begin < now {
            self.busy_time += now - begin;
        }
        self.last_update = now;
    }

    pub fn reset(&mut self) {
        self.infos.clear();
        self.busy_time = 0.0;
        self.last_update = 0.0;
    }
}

impl Default for ServiceBase {
    fn default() -> Self {
        Self::new()
    }
}

/// per-station scheduler deciding who is in service at what rate. the
/// station calls `serve` when it pulls a customer off its buffer, `remove`
/// when a completion fires, and `update_service` when the share of
/// capacity changes.
pub trait ServiceStrategy {
    fn base(&self) -> &ServiceBase;
    fn base_mut(&mut self) -> &mut ServiceBase;
    fn can_serve(&self) -> bool;
    /// admit the customer and schedule its completion
    fn serve(&mut self, cx: &ServiceCx, customer: &Rc<Customer>);
    fn remove(&mut self, cx: &ServiceCx, customer: &Rc<Customer>);
    fn remove_all(&mut self);
    /// re-plan in-progress customers after a capacity change
    fn update_service(&mut self, cx: &ServiceCx);
    fn quantum_expired(&mut self, _cx: &ServiceCx, _event: &Event) {}
    fn num_servers(&self) -> usize;
    fn num_busy(&self) -> usize;
    fn reset(&mut self);

    fn capacity_multiplier(&self) -> f64 {
        self.base().multiplier()
    }

    fn set_capacity_multiplier(&mut self, cx: &ServiceCx, multiplier: f64) {
        self.base_mut().update_state(cx.now());
        self.base_mut().set_multiplier(multiplier);
        self.update_service(cx);
    }

    fn info(&self, id: CustomerId) -> Option<&RuntimeInfo> {
        self.base().info(id)
    }

    /// busy time integrated up to now, including the open interval since
    /// the last state update
    fn busy_time(&self, now: f64) -> f64 {
        let base = self.base();
        let open = match self.num_busy() {
            0 => 0.0,
            _ => (now - base.last_update()).max(0.0),
        };
        base.raw_busy_time() + open
    }
}

/// draw a non-negative service demand for a class
fn sample_demand(cx: &ServiceCx, distrs: &HashMap<ClassId, Dist>, class: ClassId) -> f64 {
    match distrs.get(&class) {
        Some(dist) => loop {
            let demand = cx.draw(dist);
            if demand >= 0.0 {
                break demand;
            }
        },
        None => {
            log::error!("no service distribution for class {}", class);
            0.0
        }
    }
}

/// load-independent FCFS service over c parallel servers: each admitted
/// customer runs alone on a server at rate `capacity_multiplier`
pub struct Fcfs {
    base: ServiceBase,
    servers: usize,
    occupied: HashMap<usize, CustomerId>,
    distrs: HashMap<ClassId, Dist>,
    old_multiplier: f64,
}

impl Fcfs {
    pub fn new(servers: usize, distrs: Vec<(ClassId, Dist)>) -> Self {
        Self {
            base: ServiceBase::new(),
            servers: servers.max(1),
            occupied: HashMap::new(),
            distrs: distrs.into_iter().collect(),
            old_multiplier: 1.0,
        }
    }
}

impl ServiceStrategy for Fcfs {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ServiceBase {
        &mut self.base
    }

    fn can_serve(&self) -> bool {
        self.occupied.len() < self.servers
    }

    fn serve(&mut self, cx: &ServiceCx, customer: &Rc<Customer>) {
        let now = cx.now();
        self.base.update_state(now);
        let demand = sample_demand(cx, &self.distrs, customer.current_class());
        let server = (0..self.servers)
            .find(|s| !self.occupied.contains_key(s))
            .unwrap_or(0);
        let mut info = RuntimeInfo::new(Rc::clone(customer), now, demand);
        info.set_server(server);
        info.set_capacity_multiplier(self.base.multiplier());
        let delay = info.residual_time();
        self.occupied.insert(server, customer.id());
        self.base.admit(info);
        cx.schedule_completion(customer, delay);
    }

    fn remove(&mut self, cx: &ServiceCx, customer: &Rc<Customer>) {
        self.base.update_state(cx.now());
        if let Some(info) = self.base.evict(customer.id()) {
            self.occupied.remove(&info.server());
        }
    }

    fn remove_all(&mut self) {
        self.occupied.clear();
        self.base.reset();
    }

    fn update_service(&mut self, cx: &ServiceCx) {
        let multiplier = self.base.multiplier();
        if float::approximately_equal(self.old_multiplier, multiplier) {
            return;
        }
        let running = self.occupied.values().copied().collect::<Vec<_>>();
        for id in running {
            if let Some(info) = self.base.info_mut(id) {
                info.set_capacity_multiplier(multiplier);
                let customer = Rc::clone(info.customer());
                let delay = info.residual_time();
                cx.reschedule_completion(&customer, delay);
            }
        }
        self.old_multiplier = multiplier;
    }

    fn num_servers(&self) -> usize {
        self.servers
    }

    fn num_busy(&self) -> usize {
        self.occupied.len()
    }

    fn reset(&mut self) {
        self.occupied.clear();
        self.old_multiplier = self.base.multiplier();
        self.base.reset();
    }
}

/// egalitarian processor sharing: every customer on a server holds an
/// equal fraction of its capacity, re-planned on each admission and
/// removal
pub struct ProcessorSharing {
    base: ServiceBase,
    servers: usize,
    assignment: Vec<BTreeSet<CustomerId>>,
    distrs: HashMap<ClassId, Dist>,
}

impl ProcessorSharing {
    pub fn new(servers: usize, distrs: Vec<(ClassId, Dist)>) -> Self {
        let servers = servers.max(1);
        Self {
            base: ServiceBase::new(),
            servers,
            assignment: vec![BTreeSet::new(); servers],
            distrs: distrs.into_iter().collect(),
        }
    }

    fn least_loaded(&self) -> usize {
        (0..self.servers)
            .min_by_key(|&s| self.assignment[s].len())
            .unwrap_or(0)
    }

    /// equalize shares on a server and re-plan every completion on it
    fn rebalance(&mut self, cx: &ServiceCx, server: usize) {
        let ids = self.assignment[server].iter().copied().collect::<Vec<_>>();
        if ids.is_empty() {
            return;
        }
        let share = 1.0 / ids.len() as f64;
        let multiplier = self.base.multiplier();
        for id in ids {
            if let Some(info) = self.base.info_mut(id) {
                info.set_share(share);
                info.set_capacity_multiplier(multiplier);
                let customer = Rc::clone(info.customer());
                let delay = info.residual_time();
                cx.reschedule_completion(&customer, delay);
            }
        }
    }
}

impl ServiceStrategy for ProcessorSharing {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ServiceBase {
        &mut self.base
    }

    fn can_serve(&self) -> bool {
        true
    }

    fn serve(&mut self, cx: &ServiceCx, customer: &Rc<Customer>) {
        let now = cx.now();
        self.base.update_state(now);
        let demand = sample_demand(cx, &self.distrs, customer.current_class());
        let server = self.least_loaded();
        let mut info = RuntimeInfo::new(Rc::clone(customer), now, demand);
        info.set_server(server);
        info.set_capacity_multiplier(self.base.multiplier());
        self.base.admit(info);
        self.assignment[server].insert(customer.id());
        self.rebalance(cx, server);
    }

    fn remove(&mut self, cx: &ServiceCx, customer: &Rc<Customer>) {
        self.base.update_state(cx.now());
        if let Some(info) = self.base.evict(customer.id()) {
            let server = info.server();
            self.assignment[server].remove(&customer.id());
            self.rebalance(cx, server);
        }
    }

    fn remove_all(&mut self) {
        for set in &mut self.assignment {
            set.clear();
        }
        self.base.reset();
    }

    fn update_service(&mut self, cx: &ServiceCx) {
        for server in 0..self.servers {
            self.rebalance(cx, server);
        }
    }

    fn num_servers(&self) -> usize {
        self.servers
    }

    fn num_busy(&self) -> usize {
        self.assignment.iter().filter(|set| !set.is_empty()).count()
    }

    fn reset(&mut self) {
        for set in &mut self.assignment {
            set.clear();
        }
        self.base.reset();
    }
}

/// round-robin with an explicit quantum: each server rotates CPU ownership
/// through a FIFO of admitted customers; work is accounted per quantum via
/// the expiry events, so runtime infos carry a zero share
pub struct RoundRobin {
    base: ServiceBase,
    servers: usize,
    quantum: f64,
    queues: Vec<VecDeque<CustomerId>>,
    expiries: HashMap<usize, Rc<Event>>,
    distrs: HashMap<ClassId, Dist>,
    old_multiplier: f64,
}

impl RoundRobin {
    pub fn new(quantum: f64, servers: usize, distrs: Vec<(ClassId, Dist)>) -> Self {
        let servers = servers.max(1);
        Self {
            base: ServiceBase::new(),
            servers,
            quantum,
            queues: vec![VecDeque::new(); servers],
            expiries: HashMap::new(),
            distrs: distrs.into_iter().collect(),
            old_multiplier: 1.0,
        }
    }

    pub fn quantum(&self) -> f64 {
        self.quantum
    }

    fn least_loaded(&self) -> usize {
        (0..self.servers)
            .min_by_key(|&s| self.queues[s].len())
            .unwrap_or(0)
    }

    /// give the head of the server's rotation the CPU for one quantum,
    /// capped at its residual runtime
    fn start_quantum(&mut self, cx: &ServiceCx, server: usize) {
        let now = cx.now();
        let multiplier = self.base.multiplier();
        let Some(&head) = self.queues[server].front() else {
            return;
        };
        let Some(info) = self.base.info(head) else {
            return;
        };
        let residual_time = info.residual_work() / multiplier;
        let (work, early, delay) = match float::definitely_greater(self.quantum, residual_time) {
            true => (info.residual_work(), true, residual_time),
            false => (self.quantum * multiplier, false, self.quantum),
        };
        let state = Quantum {
            server,
            work,
            early,
            update_time: now,
            max_fire_time: now + self.quantum,
        };
        if let Some(event) = cx.schedule_quantum(state, delay) {
            self.expiries.insert(server, event);
        }
    }
}

impl ServiceStrategy for RoundRobin {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ServiceBase {
        &mut self.base
    }

    fn can_serve(&self) -> bool {
        true
    }

    fn serve(&mut self, cx: &ServiceCx, customer: &Rc<Customer>) {
        let now = cx.now();
        self.base.update_state(now);
        let demand = sample_demand(cx, &self.distrs, customer.current_class());
        let server = self.least_loaded();
        let mut info = RuntimeInfo::new(Rc::clone(customer), now, demand);
        info.set_server(server);
        info.set_capacity_multiplier(self.base.multiplier());
        // work is delivered through quantum accounting, not elapsed time
        info.set_share(0.0);
        self.base.admit(info);
        self.queues[server].push_back(customer.id());
        if self.queues[server].len() == 1 {
            self.start_quantum(cx, server);
        }
    }

    fn remove(&mut self, cx: &ServiceCx, customer: &Rc<Customer>) {
        self.base.update_state(cx.now());
        if let Some(info) = self.base.evict(customer.id()) {
            self.queues[info.server()].retain(|&id| id != customer.id());
        }
    }

    fn remove_all(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
        self.expiries.clear();
        self.base.reset();
    }

    fn update_service(&mut self, cx: &ServiceCx) {
        let multiplier = self.base.multiplier();
        if float::approximately_equal(self.old_multiplier, multiplier) {
            return;
        }
        let now = cx.now();
        let expiries = self.expiries.clone();
        for (server, event) in expiries {
            let Payload::Quantum(cell) = event.payload() else {
                continue;
            };
            let Some(&head) = self.queues[server].front() else {
                continue;
            };
            let new_fire_time;
            {
                let mut state = cell.borrow_mut();
                let time_to_fire = event.fire_time() - now;
                let done = (state.work - time_to_fire * self.old_multiplier).max(0.0);
                let Some(info) = self.base.info_mut(head) else {
                    continue;
                };
                info.accumulate_work(done, now);
                info.set_capacity_multiplier(multiplier);
                let new_residual_time = info.residual_work() / multiplier;
                let max_residual_time = state.max_fire_time - now;
                state.update_time = now;
                if float::definitely_less(new_residual_time, max_residual_time) {
                    state.early = true;
                    state.work = info.residual_work();
                    new_fire_time = now + new_residual_time;
                } else {
                    state.early = false;
                    state.work = max_residual_time * multiplier;
                    new_fire_time = state.max_fire_time;
                }
                debug_assert!(float::definitely_greater_equal(
                    state.max_fire_time,
                    new_fire_time
                ));
            }
            if !float::approximately_equal(new_fire_time, event.fire_time()) {
                cx.reschedule_event(&event, new_fire_time);
            }
        }
        self.old_multiplier = multiplier;
    }

    /// rotate the expired quantum's owner: bank its work, requeue it if
    /// unfinished, hand the CPU to the new head, and complete it otherwise
    fn quantum_expired(&mut self, cx: &ServiceCx, event: &Event) {
        let state = match event.payload() {
            Payload::Quantum(cell) => *cell.borrow(),
            _ => return,
        };
        let now = cx.now();
        let server = state.server;
        let Some(owner) = self.queues[server].pop_front() else {
            log::warn!("quantum expired on server {} with an empty rotation", server);
            return;
        };
        let residual = match self.base.info_mut(owner) {
            Some(info) => {
                info.accumulate_work(state.work, now);
                info.residual_work()
            }
            None => return,
        };
        if float::definitely_greater(residual, 0.0) {
            self.queues[server].push_back(owner);
        }
        if self.queues[server].is_empty() {
            self.expiries.remove(&server);
        } else {
            self.start_quantum(cx, server);
        }
        if float::approximately_equal(residual, 0.0) {
            if let Some(info) = self.base.info(owner) {
                let customer = Rc::clone(info.customer());
                cx.reschedule_completion(&customer, 0.0);
            }
        }
    }

    fn num_servers(&self) -> usize {
        self.servers
    }

    fn num_busy(&self) -> usize {
        self.queues.iter().filter(|queue| !queue.is_empty()).count()
    }

    fn reset(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
        self.expiries.clear();
        self.old_multiplier = self.base.multiplier();
        self.base.reset();
    }
}

/// infinite-server (pure delay) service: every customer runs immediately
/// at full rate
pub struct InfiniteServer {
    base: ServiceBase,
    distrs: HashMap<ClassId, Dist>,
}

impl InfiniteServer {
    pub fn new(distrs: Vec<(ClassId, Dist)>) -> Self {
        Self {
            base: ServiceBase::new(),
            distrs: distrs.into_iter().collect(),
        }
    }
}

impl ServiceStrategy for InfiniteServer {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ServiceBase {
        &mut self.base
    }

    fn can_serve(&self) -> bool {
        true
    }

    fn serve(&mut self, cx: &ServiceCx, customer: &Rc<Customer>) {
        let now = cx.now();
        self.base.update_state(now);
        let demand = sample_demand(cx, &self.distrs, customer.current_class());
        let mut info = RuntimeInfo::new(Rc::clone(customer), now, demand);
        info.set_capacity_multiplier(self.base.multiplier());
        let delay = info.residual_time();
        self.base.admit(info);
        cx.schedule_completion(customer, delay);
    }

    fn remove(&mut self, cx: &ServiceCx, customer: &Rc<Customer>) {
        self.base.update_state(cx.now());
        self.base.evict(customer.id());
    }

    fn remove_all(&mut self) {
        self.base.reset();
    }

    fn update_service(&mut self, cx: &ServiceCx) {
        let multiplier = self.base.multiplier();
        let ids = self.base.infos().map(|i| i.customer().id()).collect::<Vec<_>>();
        for id in ids {
            if let Some(info) = self.base.info_mut(id) {
                info.set_capacity_multiplier(multiplier);
                let customer = Rc::clone(info.customer());
                let delay = info.residual_time();
                cx.reschedule_completion(&customer, delay);
            }
        }
    }

    fn num_servers(&self) -> usize {
        usize::MAX
    }

    fn num_busy(&self) -> usize {
        self.base.num_admitted()
    }

    fn reset(&mut self) {
        self.base.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admitted(base: &mut ServiceBase, id: u64, start: f64, demand: f64) {
        let customer = Rc::new(Customer::new(id, 0, 0));
        let info = RuntimeInfo::new(customer, start, demand);
        base.admit(info);
    }

    #[test]
    fn busy_time_integrates_the_union_of_active_spans() {
        let mut base = ServiceBase::new();
        admitted(&mut base, 1, 0.0, 100.0);
        base.update_state(4.0);
        assert!((base.raw_busy_time() - 4.0).abs() < 1e-12);
        admitted(&mut base, 2, 4.0, 100.0);
        base.update_state(10.0);
        // two overlapping customers still cover a single 6-unit span
        assert!((base.raw_busy_time() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn idle_gaps_do_not_count_as_busy() {
        let mut base = ServiceBase::new();
        base.update_state(5.0);
        assert!(base.raw_busy_time() == 0.0);
        admitted(&mut base, 1, 5.0, 2.0);
        base.update_state(7.0);
        assert!((base.raw_busy_time() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn eviction_accrues_the_customer_runtime() {
        let mut base = ServiceBase::new();
        let customer = Rc::new(Customer::new(9, 0, 0));
        let info = RuntimeInfo::new(Rc::clone(&customer), 0.0, 3.0);
        base.admit(info);
        base.update_state(3.0);
        base.evict(9);
        assert!((customer.runtime() - 3.0).abs() < 1e-12);
    }
}
