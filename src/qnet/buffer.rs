use super::customer::Customer;
use std::collections::VecDeque;
use std::rc::Rc;

/// the waiting line in front of a station's servers. capacity `None` means
/// unlimited.
pub trait Buffer {
    fn can_push(&self, customer: &Customer) -> bool;
    fn push(&mut self, customer: Rc<Customer>);
    fn pop(&mut self) -> Option<Rc<Customer>>;
    fn peek(&self) -> Option<&Rc<Customer>>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn capacity(&self) -> Option<usize>;
    fn reset(&mut self);
}

/// first-come-first-served waiting line
pub struct Fifo {
    capacity: Option<usize>,
    items: VecDeque<Rc<Customer>>,
}

impl Fifo {
    pub fn unbounded() -> Self {
        Self {
            capacity: None,
            items: VecDeque::new(),
        }
    }

    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            items: VecDeque::new(),
        }
    }
}

impl Buffer for Fifo {
    fn can_push(&self, _customer: &Customer) -> bool {
        self.capacity.map_or(true, |cap| self.items.len() < cap)
    }

    fn push(&mut self, customer: Rc<Customer>) {
        self.items.push_back(customer);
    }

    fn pop(&mut self) -> Option<Rc<Customer>> {
        self.items.pop_front()
    }

    fn peek(&self) -> Option<&Rc<Customer>> {
        self.items.front()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn reset(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(id: u64) -> Rc<Customer> {
        Rc::new(Customer::new(id, 0, 0))
    }

    #[test]
    fn fifo_preserves_arrival_order() {
        let mut q = Fifo::unbounded();
        q.push(customer(1));
        q.push(customer(2));
        q.push(customer(3));
        let order = std::iter::from_fn(|| q.pop()).map(|c| c.id()).collect::<Vec<_>>();
        assert!(order == vec![1, 2, 3]);
    }

    #[test]
    fn bounded_fifo_refuses_past_capacity() {
        let mut q = Fifo::bounded(2);
        q.push(customer(1));
        q.push(customer(2));
        assert!(!q.can_push(&customer(3)));
        q.pop();
        assert!(q.can_push(&customer(3)));
    }
}
