use rand::Rng;

/// Bounded reservoir shuffle over any iterator.
///
/// Holds at most `capacity` items. Each call yields a uniformly chosen buffered item and
/// refills its slot from the source, so items can only move forward by about `capacity`
/// positions. A capacity of 0 or 1 passes the source through unchanged.
pub struct ShuffleBuffer<I: Iterator, R> {
    source: I,
    buffer: Vec<I::Item>,
    capacity: usize,
    rng: R,
}

impl<I: Iterator, R: Rng> ShuffleBuffer<I, R> {
    pub fn new(source: I, capacity: usize, rng: R) -> Self {
        Self {
            source,
            buffer: Vec::new(),
            capacity,
            rng,
        }
    }
}

impl<I: Iterator, R: Rng> Iterator for ShuffleBuffer<I, R> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.len() < self.capacity {
            match self.source.next() {
                Some(item) => self.buffer.push(item),
                None => break,
            }
        }
        if self.buffer.is_empty() {
            return self.source.next();
        }
        let slot = self.rng.gen_range(0..self.buffer.len());
        match self.source.next() {
            Some(item) => Some(std::mem::replace(&mut self.buffer[slot], item)),
            None => Some(self.buffer.swap_remove(slot)),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lo, hi) = self.source.size_hint();
        let held = self.buffer.len();
        (
            lo.saturating_add(held),
            hi.and_then(|h| h.checked_add(held)),
        )
    }
}
