//! Capacity-limited collections with pluggable eviction.
//!
//! The batch report keeps the *earliest* samples ([`FirstN`]), the live view
//! keeps the *latest* alerts ([`Fifo`]), and gap tracking keeps the *largest*
//! anomalies ([`ReplaceSmallest`]). Size never exceeds capacity under any
//! policy.

use std::collections::VecDeque;
use std::marker::PhantomData;

/// Decides what happens when an item arrives at a full collection.
pub trait EvictionPolicy<T> {
    /// Inserts `item` into `items` (already at `capacity`). Returns whether
    /// the item was retained.
    fn admit_full(items: &mut VecDeque<T>, item: T) -> bool;
}

/// Rejects new items once full; earlier items are never replaced.
#[derive(Debug, Clone, Copy)]
pub struct FirstN;

/// Evicts the oldest item to make room for the newest.
#[derive(Debug, Clone, Copy)]
pub struct Fifo;

/// Replaces the lowest-ranked item when the newcomer ranks higher.
#[derive(Debug, Clone, Copy)]
pub struct ReplaceSmallest;

/// Ordering key used by [`ReplaceSmallest`].
pub trait Ranked {
    fn rank(&self) -> f64;
}

impl<T> EvictionPolicy<T> for FirstN {
    fn admit_full(_items: &mut VecDeque<T>, _item: T) -> bool {
        false
    }
}

impl<T> EvictionPolicy<T> for Fifo {
    fn admit_full(items: &mut VecDeque<T>, item: T) -> bool {
        items.pop_front();
        items.push_back(item);
        true
    }
}

impl<T: Ranked> EvictionPolicy<T> for ReplaceSmallest {
    fn admit_full(items: &mut VecDeque<T>, item: T) -> bool {
        let smallest = items
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.rank().total_cmp(&b.rank()))
            .map(|(idx, existing)| (idx, existing.rank()));

        match smallest {
            Some((idx, rank)) if item.rank() > rank => {
                items[idx] = item;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoundedCollection<T, P> {
    items: VecDeque<T>,
    capacity: usize,
    rejected: u64,
    _policy: PhantomData<P>,
}

/// Forensic sample list: keeps the first N matches.
pub type SampleBuffer<T> = BoundedCollection<T, FirstN>;
/// Situational ring buffer: keeps the most recent N.
pub type RingBuffer<T> = BoundedCollection<T, Fifo>;
/// Keeps the N highest-ranked items.
pub type TopRanked<T> = BoundedCollection<T, ReplaceSmallest>;

impl<T, P: EvictionPolicy<T>> BoundedCollection<T, P> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            rejected: 0,
            _policy: PhantomData,
        }
    }

    /// Offers an item. Returns whether it is now held by the collection.
    pub fn push(&mut self, item: T) -> bool {
        if self.capacity == 0 {
            self.rejected += 1;
            return false;
        }
        if self.items.len() < self.capacity {
            self.items.push_back(item);
            return true;
        }
        let admitted = P::admit_full(&mut self.items, item);
        // Under Fifo/ReplaceSmallest something is displaced either way
        self.rejected += 1;
        admitted
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }
}

impl<T, P> BoundedCollection<T, P> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items dropped or displaced since creation.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.iter().cloned().collect()
    }
}
