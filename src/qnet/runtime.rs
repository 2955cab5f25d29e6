use super::customer::Customer;
use super::profile::UtilizationProfile;
use crate::float;
use std::rc::Rc;

/// per-customer service bookkeeping while admitted to a service strategy.
/// work is measured in demand units; the effective completion rate is
/// `share * multiplier`, where share is the fraction of one server the
/// customer currently holds. invariant: completed work never exceeds the
/// service demand.
pub struct RuntimeInfo {
    customer: Rc<Customer>,
    start_time: f64,
    demand: f64,
    completed: f64,
    last_update: f64,
    share: f64,
    multiplier: f64,
    server: usize,
    profile: UtilizationProfile,
}

impl RuntimeInfo {
    pub fn new(customer: Rc<Customer>, start_time: f64, demand: f64) -> Self {
        Self {
            customer,
            start_time,
            demand,
            completed: 0.0,
            last_update: start_time,
            share: 1.0,
            multiplier: 1.0,
            server: 0,
            profile: UtilizationProfile::new(),
        }
    }

    pub fn customer(&self) -> &Rc<Customer> {
        &self.customer
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn service_demand(&self) -> f64 {
        self.demand
    }

    /// wall-clock runtime at full share under the current multiplier
    pub fn runtime(&self) -> f64 {
        self.demand / self.multiplier
    }

    pub fn completed_work(&self) -> f64 {
        self.completed
    }

    pub fn residual_work(&self) -> f64 {
        debug_assert!(float::definitely_less_equal(self.completed, self.demand));
        let residual = self.demand - self.completed;
        if float::definitely_greater(residual, 0.0) {
            residual
        } else {
            0.0
        }
    }

    /// current effective completion rate in demand units per unit time
    pub fn rate(&self) -> f64 {
        self.share * self.multiplier
    }

    /// wall-clock time to completion at the current rate
    pub fn residual_time(&self) -> f64 {
        self.residual_work() / self.rate()
    }

    pub fn share(&self) -> f64 {
        self.share
    }

    pub fn set_share(&mut self, share: f64) {
        self.share = share;
    }

    pub fn capacity_multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn set_capacity_multiplier(&mut self, multiplier: f64) {
        self.multiplier = multiplier;
    }

    pub fn server(&self) -> usize {
        self.server
    }

    pub fn set_server(&mut self, server: usize) {
        self.server = server;
    }

    /// accrue the work delivered since the last update at the current rate
    pub fn accumulate(&mut self, now: f64) {
        if now > self.last_update {
            let work = (now - self.last_update) * self.rate();
            debug_assert!(float::definitely_less_equal(self.completed + work, self.demand));
            self.profile.push(self.last_update, now, self.share);
            self.completed += work;
        }
        self.last_update = now;
    }

    /// directly accrue a known amount of work (round-robin quanta)
    pub fn accumulate_work(&mut self, work: f64, now: f64) {
        debug_assert!(float::definitely_less_equal(self.completed + work, self.demand));
        if self.multiplier > 0.0 && work > 0.0 {
            let span = work / self.multiplier;
            self.profile.push(now - span, now, 1.0);
        }
        self.completed += work;
        self.last_update = now;
    }

    /// hand the accumulated share profile over to the customer record
    pub fn flush_profile(&mut self) {
        if !self.profile.is_empty() {
            let profile = std::mem::take(&mut self.profile);
            self.customer
                .record_profile(self.customer.current_node(), profile);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(demand: f64) -> RuntimeInfo {
        RuntimeInfo::new(Rc::new(Customer::new(1, 0, 0)), 0.0, demand)
    }

    #[test]
    fn full_share_accrues_wall_clock_work() {
        let mut rt = info(10.0);
        rt.accumulate(4.0);
        assert!((rt.completed_work() - 4.0).abs() < 1e-12);
        assert!((rt.residual_work() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn partial_share_slows_the_accrual() {
        let mut rt = info(10.0);
        rt.set_share(0.5);
        rt.accumulate(4.0);
        assert!((rt.completed_work() - 2.0).abs() < 1e-12);
        assert!((rt.residual_time() - 16.0).abs() < 1e-12);
    }

    #[test]
    fn completed_work_never_exceeds_demand() {
        let mut rt = info(10.0);
        rt.accumulate(10.0);
        assert!(rt.residual_work() == 0.0);
        // idempotent at the completion instant
        rt.accumulate(10.0);
        assert!(rt.completed_work() <= rt.service_demand() + 1e-9);
    }

    #[test]
    fn direct_work_accrual_tracks_quanta() {
        let mut rt = info(10.0);
        rt.accumulate_work(3.0, 3.0);
        rt.accumulate_work(3.0, 6.0);
        assert!((rt.residual_work() - 4.0).abs() < 1e-12);
    }
}
