//! Identity bags and before/after deltas.
//!
//! A [`Multiset`] is an unordered bag of element identities with counts, built from a
//! snapshot of a container's contents. Diffing two bags of the same container produces
//! the minimal list of add/remove records, with all removals ordered before all
//! additions, the order in which history records are appended for a single mutator
//! invocation.

use rustc_hash::FxHashMap;

use crate::object::{ContainerContents, ElementRef};

/// One add or remove produced by a bag diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delta {
    /// The element (or map entry) that changed.
    pub element: ElementRef,
    /// `true` for an addition, `false` for a removal.
    pub is_addition: bool,
}

/// An unordered bag of element identities with positive counts.
#[derive(Debug, Clone, Default)]
pub struct Multiset {
    counts: FxHashMap<ElementRef, u32>,
}

impl Multiset {
    /// Create an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Multiset::default()
    }

    /// Build a bag from a container snapshot.
    ///
    /// Collections contribute one identity per element; maps contribute one identity
    /// pair per entry.
    #[must_use]
    pub fn from_contents(contents: &ContainerContents) -> Self {
        let mut bag = Multiset::new();
        match contents {
            ContainerContents::Collection(elements) => {
                for element in elements {
                    bag.insert(ElementRef::object(*element));
                }
            }
            ContainerContents::Map(entries) => {
                for (key, value) in entries {
                    bag.insert(ElementRef::entry(*key, *value));
                }
            }
        }
        bag
    }

    /// Add one occurrence of an element.
    pub fn insert(&mut self, element: ElementRef) {
        *self.counts.entry(element).or_insert(0) += 1;
    }

    /// Number of occurrences of an element; zero when absent.
    #[must_use]
    pub fn count(&self, element: &ElementRef) -> u32 {
        self.counts.get(element).copied().unwrap_or(0)
    }

    /// Number of distinct elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns true if the bag holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Iterate over `(element, count)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&ElementRef, u32)> {
        self.counts.iter().map(|(e, n)| (e, *n))
    }

    /// Diff two snapshots of the same container.
    ///
    /// One record is produced per element whose count changed: an addition when the
    /// count grew or the element is new, a removal when it shrank or the element is
    /// gone. All removals precede all additions; inside each half, elements whose count
    /// changed follow `after` iteration order, elements that vanished follow `before`
    /// iteration order.
    #[must_use]
    pub fn diff(before: &Multiset, after: &Multiset) -> Vec<Delta> {
        let mut deltas = Vec::new();

        for (element, new_count) in after.iter() {
            let old_count = before.count(element);
            if new_count != old_count {
                deltas.push(Delta {
                    element: *element,
                    is_addition: new_count > old_count,
                });
            }
        }

        for (element, _) in before.iter() {
            if after.count(element) == 0 {
                deltas.push(Delta {
                    element: *element,
                    is_addition: false,
                });
            }
        }

        deltas.sort_by_key(|d| d.is_addition);
        deltas
    }
}
