//! Priority Stream (C1): a bounded max-heap over a streamed producer, used by
//! the search engine to avoid materializing the full result set in memory.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Entry<T> {
    score: f64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.seq == other.seq
    }
}
impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // Reversed so the `BinaryHeap` (a max-heap) surfaces the lowest-scored,
    // earliest-inserted entry at the top -- the one we want to evict first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Fixed-capacity (`2*k`) top-K heap. `add` is O(log n); `min_score` is O(1);
/// `drain` sorts the remaining entries once and returns the top `k`.
pub struct PriorityStream<T> {
    heap: BinaryHeap<Entry<T>>,
    capacity: usize,
    k: usize,
    next_seq: u64,
}

impl<T> PriorityStream<T> {
    pub fn new(k: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            capacity: (k * 2).max(1),
            k,
            next_seq: 0,
        }
    }

    /// Rejects items scoring below the current minimum once the stream is at
    /// capacity, leaving the heap untouched.
    pub fn add(&mut self, item: T, score: f64) {
        if self.heap.len() >= self.capacity {
            if let Some(min) = self.min_score() {
                if score < min {
                    return;
                }
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { score, seq, item });

        if self.heap.len() > self.capacity {
            self.heap.pop();
        }
    }

    pub fn min_score(&self) -> Option<f64> {
        self.heap.peek().map(|e| e.score)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Top `k` items, sorted by descending score with ties broken by
    /// insertion order.
    pub fn drain(self) -> Vec<T> {
        let mut entries: Vec<Entry<T>> = self.heap.into_vec();
        entries.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        entries.truncate(self.k);
        entries.into_iter().map(|e| e.item).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_top_k_descending() {
        let mut stream = PriorityStream::new(3);
        for (i, score) in [0.1, 0.9, 0.5, 0.7, 0.3, 0.95].into_iter().enumerate() {
            stream.add(i, score);
        }
        let top = stream.drain();
        assert_eq!(top.len(), 3);
        assert_eq!(top, vec![5, 1, 3]);
    }

    #[test]
    fn ties_broken_by_insertion_order() {
        let mut stream = PriorityStream::new(2);
        stream.add("a", 0.5);
        stream.add("b", 0.5);
        stream.add("c", 0.5);
        assert_eq!(stream.drain(), vec!["a", "b"]);
    }

    #[test]
    fn rejects_below_minimum_without_mutating_heap_once_full() {
        let mut stream = PriorityStream::new(1);
        stream.add("keep-a", 0.9);
        stream.add("keep-b", 0.8);
        let before = stream.len();
        stream.add("too-low", 0.1);
        assert_eq!(stream.len(), before);
        assert_eq!(stream.drain(), vec!["keep-a"]);
    }

    #[test]
    fn bounded_memory_under_heavy_load() {
        let mut stream = PriorityStream::new(10);
        for i in 0..100_000u64 {
            stream.add(i, (i % 1000) as f64 / 1000.0);
            assert!(stream.len() <= 20);
        }
        let top = stream.drain();
        assert_eq!(top.len(), 10);
    }
}
