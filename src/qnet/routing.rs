use super::ClassId;
use super::NodeId;
use super::customer::Customer;
use rand::Rng;
use rand::rngs::SmallRng;
use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;

/// where a departing customer goes next, as (node, class)
pub trait Routing {
    fn route(&self, customer: &Customer, rng: &mut SmallRng) -> crate::Result<(NodeId, ClassId)>;
}

/// one fixed target per (source node, source class)
#[derive(Default)]
pub struct Deterministic {
    routes: HashMap<(NodeId, ClassId), (NodeId, ClassId)>,
}

impl Deterministic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(
        mut self,
        from_node: NodeId,
        from_class: ClassId,
        to_node: NodeId,
        to_class: ClassId,
    ) -> Self {
        self.routes
            .insert((from_node, from_class), (to_node, to_class));
        self
    }
}

impl Routing for Deterministic {
    fn route(&self, customer: &Customer, _rng: &mut SmallRng) -> crate::Result<(NodeId, ClassId)> {
        let key = (customer.current_node(), customer.current_class());
        self.routes.get(&key).copied().ok_or_else(|| {
            crate::SimError::Logic(format!(
                "no route from node {} for class {}",
                key.0, key.1
            ))
        })
    }
}

/// a discrete distribution over targets per (source node, source class).
/// cumulative tables are rebuilt lazily after any route insertion.
#[derive(Default)]
pub struct Probabilistic {
    routes: HashMap<(NodeId, ClassId), Vec<((NodeId, ClassId), f64)>>,
    tables: RefCell<HashMap<(NodeId, ClassId), Vec<((NodeId, ClassId), f64)>>>,
    dirty: Cell<bool>,
}

impl Probabilistic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(
        mut self,
        from_node: NodeId,
        from_class: ClassId,
        to_node: NodeId,
        to_class: ClassId,
        probability: f64,
    ) -> Self {
        self.routes
            .entry((from_node, from_class))
            .or_default()
            .push(((to_node, to_class), probability));
        self.dirty.set(true);
        self
    }

    fn rebuild(&self) {
        let mut tables = self.tables.borrow_mut();
        tables.clear();
        for (key, targets) in &self.routes {
            let total = targets.iter().map(|(_, p)| p).sum::<f64>();
            let mut acc = 0.0;
            let cumulative = targets
                .iter()
                .map(|&(dst, p)| {
                    acc += p / total;
                    (dst, acc)
                })
                .collect();
            tables.insert(*key, cumulative);
        }
        self.dirty.set(false);
    }
}

impl Routing for Probabilistic {
    fn route(&self, customer: &Customer, rng: &mut SmallRng) -> crate::Result<(NodeId, ClassId)> {
        if self.dirty.get() {
            self.rebuild();
        }
        let key = (customer.current_node(), customer.current_class());
        let tables = self.tables.borrow();
        let table = tables.get(&key).ok_or_else(|| {
            crate::SimError::Logic(format!(
                "no routing distribution from node {} for class {}",
                key.0, key.1
            ))
        })?;
        let u = rng.random::<f64>();
        let pick = table
            .iter()
            .find(|&&(_, cumulative)| u <= cumulative)
            .or(table.last())
            .map(|&(dst, _)| dst)
            .ok_or_else(|| {
                crate::SimError::Logic(format!(
                    "empty routing distribution from node {} for class {}",
                    key.0, key.1
                ))
            })?;
        Ok(pick)
    }
}
