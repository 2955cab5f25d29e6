use super::ClassId;
use super::NodeId;
use crate::dist::Dist;
use rand::rngs::SmallRng;
use std::cell::Cell;

/// how a class feeds the network: open classes arrive from outside with
/// some interarrival law, closed classes circulate a fixed population
pub enum ClassKind {
    Open { interarrival: Dist },
    Closed { population: usize },
}

/// a customer class: the traffic type a customer carries while routing.
/// `reference_node` is where open-class customers enter and closed-class
/// populations materialize.
pub struct CustomerClass {
    id: Cell<ClassId>,
    name: String,
    kind: ClassKind,
    reference_node: NodeId,
}

impl CustomerClass {
    pub fn open(name: &str, interarrival: Dist, reference_node: NodeId) -> Self {
        Self {
            id: Cell::new(0),
            name: name.to_string(),
            kind: ClassKind::Open { interarrival },
            reference_node,
        }
    }

    pub fn closed(name: &str, population: usize, reference_node: NodeId) -> Self {
        Self {
            id: Cell::new(0),
            name: name.to_string(),
            kind: ClassKind::Closed { population },
            reference_node,
        }
    }

    pub fn id(&self) -> ClassId {
        self.id.get()
    }

    pub(crate) fn set_id(&self, id: ClassId) {
        self.id.set(id);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reference_node(&self) -> NodeId {
        self.reference_node
    }

    pub fn is_open(&self) -> bool {
        matches!(self.kind, ClassKind::Open { .. })
    }

    pub fn population(&self) -> usize {
        match &self.kind {
            ClassKind::Closed { population } => *population,
            ClassKind::Open { .. } => 0,
        }
    }

    /// next exogenous interarrival span; nothing for closed classes
    pub fn sample_interarrival(&self, rng: &mut SmallRng) -> Option<f64> {
        match &self.kind {
            ClassKind::Open { interarrival } => Some(interarrival.draw(rng)),
            ClassKind::Closed { .. } => None,
        }
    }
}

impl std::fmt::Display for CustomerClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<class {} ({}) {}>",
            self.id.get(),
            self.name,
            if self.is_open() { "open" } else { "closed" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist;
    use rand::SeedableRng;

    #[test]
    fn open_classes_sample_closed_ones_do_not() {
        let mut rng = SmallRng::seed_from_u64(1);
        let open = CustomerClass::open("web", dist::constant(2.5), 0);
        let closed = CustomerClass::closed("batch", 10, 1);
        assert!(open.sample_interarrival(&mut rng) == Some(2.5));
        assert!(closed.sample_interarrival(&mut rng).is_none());
        assert!(closed.population() == 10);
        assert!(open.population() == 0);
    }
}
