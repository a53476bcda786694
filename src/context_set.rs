//! The context primitives that everything else in this crate is built on: a fixed-capacity set
//! of phone indices, a tuple of such sets describing the left/right phonetic context of a unit,
//! and a named binary partition of the phone universe used to split a context.
//!
//! Phone universes in practice are a few dozen to a few hundred symbols, so a context set is
//! represented as a small bitset rather than a `HashSet<u32>` - this keeps split evaluation,
//! which runs per (model, position, question) for every open hypothesis, allocation free.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Maximum number of phone symbols supported by a [`ContextSet`].
pub const MAX_NUM_PHONES: usize = 256;

const BITS_PER_WORD: usize = 64;

/// A set of phone indices over a universe of at most [`MAX_NUM_PHONES`] phones.
///
/// Capacity is fixed at construction. Two sets are only comparable (equality, subset, union,
/// intersect) when their capacities match; mismatched capacities are a programming error and
/// panic rather than silently truncating.
#[derive(Clone, Debug)]
pub struct ContextSet {
    capacity: usize,
    words: Vec<u64>,
}

impl ContextSet {
    /// Creates an empty set over a universe of `capacity` phones.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity <= MAX_NUM_PHONES, "phone universe too large");
        let num_words = capacity.div_ceil(BITS_PER_WORD).max(1);
        Self {
            capacity,
            words: vec![0; num_words],
        }
    }

    /// Creates a set containing every phone of the universe.
    pub fn full(capacity: usize) -> Self {
        let mut s = Self::new(capacity);
        s.invert();
        s
    }

    /// Creates a singleton set.
    pub fn singleton(capacity: usize, phone: usize) -> Self {
        let mut s = Self::new(capacity);
        s.add(phone);
        s
    }

    /// The size of the phone universe this set was constructed over.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn check_same_capacity(&self, other: &ContextSet) {
        assert_eq!(
            self.capacity, other.capacity,
            "context sets have different universes"
        );
    }

    /// Adds a phone to the set.
    pub fn add(&mut self, phone: usize) {
        assert!(phone < self.capacity, "phone index out of range");
        self.words[phone / BITS_PER_WORD] |= 1u64 << (phone % BITS_PER_WORD);
    }

    /// Removes a phone from the set.
    pub fn remove(&mut self, phone: usize) {
        assert!(phone < self.capacity, "phone index out of range");
        self.words[phone / BITS_PER_WORD] &= !(1u64 << (phone % BITS_PER_WORD));
    }

    /// Tests whether `phone` is a member of the set.
    pub fn has_element(&self, phone: usize) -> bool {
        if phone >= self.capacity {
            return false;
        }
        self.words[phone / BITS_PER_WORD] & (1u64 << (phone % BITS_PER_WORD)) != 0
    }

    /// Replaces the set with its union with `other`.
    pub fn union_with(&mut self, other: &ContextSet) {
        self.check_same_capacity(other);
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= b;
        }
    }

    /// Returns the union of `self` and `other` as a new set.
    pub fn union(&self, other: &ContextSet) -> ContextSet {
        let mut r = self.clone();
        r.union_with(other);
        r
    }

    /// Replaces the set with its intersection with `other`.
    pub fn intersect_with(&mut self, other: &ContextSet) {
        self.check_same_capacity(other);
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a &= b;
        }
    }

    /// Returns the intersection of `self` and `other` as a new set.
    pub fn intersect(&self, other: &ContextSet) -> ContextSet {
        let mut r = self.clone();
        r.intersect_with(other);
        r
    }

    /// Complements the set within its universe.
    pub fn invert(&mut self) {
        for w in self.words.iter_mut() {
            *w = !*w;
        }
        self.mask_trailing_bits();
    }

    /// Returns the complement of the set within its universe.
    pub fn inverted(&self) -> ContextSet {
        let mut r = self.clone();
        r.invert();
        r
    }

    fn mask_trailing_bits(&mut self) {
        let used_bits = self.capacity % BITS_PER_WORD;
        if used_bits != 0 {
            let mask = (1u64 << used_bits) - 1;
            if let Some(last) = self.words.last_mut() {
                *last &= mask;
            }
        }
    }

    /// True if the set contains no phones.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of phones in the set (Brian Kernighan popcount).
    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// `self ⊆ other`, tested as `self & !other == ∅`.
    pub fn is_subset(&self, other: &ContextSet) -> bool {
        self.check_same_capacity(other);
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & !b == 0)
    }

    /// Iterates over the members of the set in ascending order.
    pub fn iter(&self) -> ContextSetIter<'_> {
        ContextSetIter {
            set: self,
            next: 0,
        }
    }
}

impl PartialEq for ContextSet {
    fn eq(&self, other: &Self) -> bool {
        self.capacity == other.capacity && self.words == other.words
    }
}
impl Eq for ContextSet {}

impl Hash for ContextSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.capacity.hash(state);
        self.words.hash(state);
    }
}

impl fmt::Display for ContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, p) in self.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, "}}")
    }
}

/// Ascending iterator over the members of a [`ContextSet`].
pub struct ContextSetIter<'a> {
    set: &'a ContextSet,
    next: usize,
}

impl<'a> Iterator for ContextSetIter<'a> {
    type Item = usize;
    fn next(&mut self) -> Option<usize> {
        while self.next < self.set.capacity {
            let p = self.next;
            self.next += 1;
            if self.set.has_element(p) {
                return Some(p);
            }
        }
        None
    }
}

/// The left and right context of a unit, which may itself represent several phones.
///
/// Position 0 is the center phone set, negative positions are left context (absolute value
/// increasing away from the center), positive positions are right context. For a pentaphone
/// `(A B)_C_(D E)`: position -1 = B, position -2 = A, position 0 = C, position 1 = D, position 2
/// = E.
#[derive(Clone, Debug)]
pub struct PhoneContext {
    num_left: usize,
    slots: Vec<ContextSet>,
}

impl PhoneContext {
    /// Creates a context with every slot initialized to the empty set.
    pub fn new(num_phones: usize, num_left: usize, num_right: usize) -> Self {
        Self {
            num_left,
            slots: vec![ContextSet::new(num_phones); num_left + num_right + 1],
        }
    }

    /// Number of left-context positions.
    pub fn num_left_contexts(&self) -> usize {
        self.num_left
    }

    /// Number of right-context positions.
    pub fn num_right_contexts(&self) -> usize {
        self.slots.len() - self.num_left - 1
    }

    fn slot_index(&self, position: i32) -> usize {
        let idx = if position < 0 {
            (-(position + 1)) as usize
        } else {
            self.num_left + position as usize
        };
        assert!(idx < self.slots.len(), "context position out of range");
        idx
    }

    /// The context set at the given signed position.
    pub fn get(&self, position: i32) -> &ContextSet {
        &self.slots[self.slot_index(position)]
    }

    /// Mutable access to the context set at the given signed position.
    pub fn get_mut(&mut self, position: i32) -> &mut ContextSet {
        let idx = self.slot_index(position);
        &mut self.slots[idx]
    }

    /// Replaces the context set at `position`.
    pub fn set(&mut self, position: i32, value: ContextSet) {
        let idx = self.slot_index(position);
        self.slots[idx] = value;
    }

    /// The center context set (position 0).
    pub fn center(&self) -> &ContextSet {
        self.get(0)
    }

    /// Creates a copy of this context with the set at `position` replaced.
    pub fn with_position(&self, position: i32, value: ContextSet) -> PhoneContext {
        let mut c = self.clone();
        c.set(position, value);
        c
    }
}

impl PartialEq for PhoneContext {
    fn eq(&self, other: &Self) -> bool {
        self.num_left == other.num_left && self.slots == other.slots
    }
}
impl Eq for PhoneContext {}

impl Hash for PhoneContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for s in &self.slots {
            s.hash(state);
        }
    }
}

impl fmt::Display for PhoneContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let right = self.num_right_contexts() as i32;
        let left = self.num_left as i32;
        for p in -left..=right {
            write!(f, "{} ", self.get(p))?;
        }
        Ok(())
    }
}

/// A named binary partition of the phone universe, used to split a [`ContextSet`].
#[derive(Clone)]
pub struct ContextQuestion {
    name: String,
    yes: ContextSet,
    no: ContextSet,
}

impl ContextQuestion {
    /// Creates a question from the "yes" phone set; "no" is its complement.
    pub fn new(name: impl Into<String>, yes: ContextSet) -> Self {
        let no = yes.inverted();
        Self {
            name: name.into(),
            yes,
            no,
        }
    }

    /// The partition's name, as given in the phone-set file.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The "yes" (`b = false`) or "no" (`b = true`) side of the partition.
    pub fn phone_set(&self, no: bool) -> &ContextSet {
        if no {
            &self.no
        } else {
            &self.yes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_membership() {
        let mut s = ContextSet::new(8);
        assert!(s.is_empty());
        s.add(3);
        s.add(7);
        assert!(s.has_element(3));
        assert!(s.has_element(7));
        assert!(!s.has_element(0));
        assert_eq!(s.cardinality(), 2);
    }

    #[test]
    fn union_intersect_invert() {
        let mut a = ContextSet::new(8);
        a.add(1);
        a.add(2);
        let mut b = ContextSet::new(8);
        b.add(2);
        b.add(3);

        let u = a.union(&b);
        assert!(u.has_element(1) && u.has_element(2) && u.has_element(3));

        let i = a.intersect(&b);
        assert_eq!(i.cardinality(), 1);
        assert!(i.has_element(2));

        let inv = a.inverted();
        assert!(!inv.has_element(1));
        assert!(inv.has_element(0));
        assert_eq!(inv.cardinality(), 6);
    }

    #[test]
    fn subset_across_word_boundary() {
        let mut a = ContextSet::new(130);
        a.add(0);
        a.add(65);
        a.add(129);
        let mut b = a.clone();
        b.add(10);
        assert!(a.is_subset(&b));
        assert!(!b.is_subset(&a));
    }

    #[test]
    fn iteration_is_ascending() {
        let mut s = ContextSet::new(16);
        for p in [9, 2, 15, 0] {
            s.add(p);
        }
        let got: Vec<_> = s.iter().collect();
        assert_eq!(got, vec![0, 2, 9, 15]);
    }

    #[test]
    fn equality_requires_same_capacity() {
        let a = ContextSet::new(8);
        let b = ContextSet::new(16);
        assert_ne!(a, b);
    }

    #[test]
    fn phone_context_position_mapping() {
        let mut ctx = PhoneContext::new(10, 2, 1);
        ctx.get_mut(-1).add(3);
        ctx.get_mut(-2).add(4);
        ctx.get_mut(0).add(5);
        ctx.get_mut(1).add(6);
        assert!(ctx.get(-1).has_element(3));
        assert!(ctx.get(-2).has_element(4));
        assert!(ctx.center().has_element(5));
        assert!(ctx.get(1).has_element(6));
        assert_eq!(ctx.num_left_contexts(), 2);
        assert_eq!(ctx.num_right_contexts(), 1);
    }

    #[test]
    fn question_partitions_phone_universe() {
        let mut yes = ContextSet::new(5);
        yes.add(0);
        yes.add(1);
        let q = ContextQuestion::new("vowels", yes);
        assert_eq!(q.phone_set(false).cardinality(), 2);
        assert_eq!(q.phone_set(true).cardinality(), 3);
    }
}
