use rand::Rng;

/// Fixed-capacity uniform reservoir sample (Algorithm R), used by the
/// tx-rate estimator to cap the number of representative transactions it
/// retains while still sampling uniformly from an unbounded stream of
/// mempool entrants.
pub struct Reservoir<T> {
    capacity: usize,
    seen: u64,
    items: Vec<T>,
}

impl<T> Reservoir<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: 0,
            items: Vec::with_capacity(capacity),
        }
    }

    /// Offers one more item from the stream to the reservoir.
    pub fn push(&mut self, item: T, rng: &mut impl Rng) {
        if self.capacity == 0 {
            self.seen += 1;
            return;
        }
        if self.items.len() < self.capacity {
            self.items.push(item);
        } else {
            let j = rng.gen_range(0..=self.seen);
            if (j as usize) < self.capacity {
                self.items[j as usize] = item;
            }
        }
        self.seen += 1;
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_seen(&self) -> u64 {
        self.seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn reservoir_caps_size() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0);
        let mut r = Reservoir::new(10);
        for i in 0..1000u32 {
            r.push(i, &mut rng);
        }
        assert_eq!(r.len(), 10);
        assert_eq!(r.total_seen(), 1000);
    }

    #[test]
    fn reservoir_keeps_everything_below_capacity() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
        let mut r = Reservoir::new(100);
        for i in 0..10u32 {
            r.push(i, &mut rng);
        }
        let mut items = r.into_items();
        items.sort();
        assert_eq!(items, (0..10).collect::<Vec<_>>());
    }
}
