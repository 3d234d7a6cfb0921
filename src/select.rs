use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use crate::Scalar;

/// A point offered to a [`BoundedTopK`] during a search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    /// Identity of the point, i.e. its row in the input point set.
    pub identity: usize,
    /// Distance from the point to the query.
    pub distance: Scalar,
}

impl Candidate {
    /// Creates a new candidate.
    pub fn new(identity: usize, distance: Scalar) -> Self {
        Self { identity, distance }
    }
}

// Max-heap key. Among equal distances the earliest insertion sits on top and is evicted first.
#[derive(Debug)]
struct Entry {
    key: (OrderedFloat<Scalar>, Reverse<u64>),
    candidate: Candidate,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Keeps the `k` candidates with the smallest distance among all candidates offered so far.
///
/// Backed by a max-heap on distance, so [`offer`](BoundedTopK::offer) is `O(log k)`. When the
/// selector is full and several held candidates share the largest distance, the one that was
/// inserted first is evicted first.
#[derive(Debug)]
pub struct BoundedTopK {
    capacity: usize,
    inserted: u64,
    heap: BinaryHeap<Entry>,
}

impl BoundedTopK {
    /// Creates an empty selector holding at most `capacity` candidates.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inserted: 0,
            heap: BinaryHeap::with_capacity(capacity),
        }
    }

    /// Offers a candidate. Returns `true` if the candidate is now held.
    ///
    /// A full selector only accepts a candidate strictly closer than its current worst.
    pub fn offer(&mut self, candidate: Candidate) -> bool {
        if self.capacity == 0 {
            return false;
        }

        if self.heap.len() == self.capacity {
            match self.heap.peek() {
                Some(worst) if candidate.distance < worst.candidate.distance => {
                    self.heap.pop();
                }
                _ => return false,
            }
        }

        let entry = Entry {
            key: (OrderedFloat(candidate.distance), Reverse(self.inserted)),
            candidate,
        };
        self.inserted += 1;
        self.heap.push(entry);
        true
    }

    /// Largest distance currently held, or infinity while fewer than `k` candidates are held.
    pub fn worst_distance(&self) -> Scalar {
        if !self.is_full() {
            return Scalar::INFINITY;
        }

        self.heap
            .peek()
            .map(|entry| entry.candidate.distance)
            .unwrap_or(Scalar::INFINITY)
    }

    /// Returns `true` once `k` candidates are held.
    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// Maximum number of candidates this selector holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of candidates currently held.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` if no candidate is held.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Consumes the selector and returns the held candidates, nearest first.
    ///
    /// Candidates at equal distance are ordered by ascending identity.
    pub fn into_sorted_vec(self) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self
            .heap
            .into_vec()
            .into_iter()
            .map(|entry| entry.candidate)
            .collect();

        candidates.sort_by(|a, b| {
            OrderedFloat(a.distance)
                .cmp(&OrderedFloat(b.distance))
                .then(a.identity.cmp(&b.identity))
        });
        candidates
    }
}
