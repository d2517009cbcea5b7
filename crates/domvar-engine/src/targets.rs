//! Target index: the association between page elements and the variations
//! assigned to them.
//!
//! Elements have no intrinsic identity across observer callbacks, so each
//! assigned element receives a slot number stamped onto it as a marker
//! attribute. Recovery order is: marker attribute, then identity lookup in
//! the tracked-element list (something may strip the marker), then a fresh
//! slot. `cleanup` vacates slots whose elements left the document — the
//! variations applied to an element can remove that very element, and
//! without purging these tables grow without bound over a long session.

use std::collections::BTreeMap;

use crate::dom::{Document, NodeId, NodeSnapshot};
use crate::variation::VariationId;

/// Default marker attribute stamped on assigned elements.
pub const MARKER_ATTRIBUTE: &str = "data-variation-slot";

// ---------------------------------------------------------------------------
// TargetIndex
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TargetIndex {
    marker_attr: String,
    /// Slot -> element. `None` marks a vacated slot.
    tracked: Vec<Option<NodeId>>,
    /// Slot -> ordered variations assigned to that element.
    assignments: Vec<Vec<VariationId>>,
    /// Slot -> pre-mutation snapshot, kept while override mode is active.
    snapshots: BTreeMap<usize, NodeSnapshot>,
}

impl TargetIndex {
    pub fn new(marker_attr: impl Into<String>) -> Self {
        Self {
            marker_attr: marker_attr.into(),
            tracked: Vec::new(),
            assignments: Vec::new(),
            snapshots: BTreeMap::new(),
        }
    }

    pub fn marker_attr(&self) -> &str {
        &self.marker_attr
    }

    /// Slot for `element`, allocating and stamping the marker when the
    /// element is unknown. A marker pointing at a vacated slot re-adopts
    /// it, which covers an element that was detached, purged, and later
    /// re-attached with its marker intact.
    pub fn find_assignment(&mut self, doc: &mut Document, element: NodeId) -> usize {
        if let Some(raw) = doc.attribute(element, &self.marker_attr) {
            if let Ok(slot) = raw.parse::<usize>() {
                if slot < self.tracked.len() {
                    if self.tracked[slot].is_none() {
                        self.tracked[slot] = Some(element);
                    }
                    if self.tracked[slot] == Some(element) {
                        return slot;
                    }
                }
            }
        }

        // Marker missing or stale: fall back to identity lookup.
        if let Some(slot) = self.tracked.iter().position(|entry| *entry == Some(element)) {
            doc.set_attribute(element, &self.marker_attr, &slot.to_string());
            return slot;
        }

        let slot = self.tracked.len();
        self.tracked.push(Some(element));
        self.assignments.push(Vec::new());
        doc.set_attribute(element, &self.marker_attr, &slot.to_string());
        slot
    }

    /// Assign a variation to `element`. Returns the slot and whether the
    /// assignment is new; only new assignments execute immediately.
    pub fn register(
        &mut self,
        doc: &mut Document,
        element: NodeId,
        id: &VariationId,
    ) -> (usize, bool) {
        let slot = self.find_assignment(doc, element);
        let fresh = if self.assignments[slot].contains(id) {
            false
        } else {
            self.assignments[slot].push(id.clone());
            true
        };
        (slot, fresh)
    }

    /// Variations assigned to a slot, in assignment order.
    pub fn assigned(&self, slot: usize) -> &[VariationId] {
        self.assignments
            .get(slot)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn slot_element(&self, slot: usize) -> Option<NodeId> {
        self.tracked.get(slot).copied().flatten()
    }

    pub fn slot_count(&self) -> usize {
        self.tracked.len()
    }

    /// Walk up from `node` to the nearest element the index knows about:
    /// one carrying the marker attribute or present in the tracked list.
    /// Falls back to the nearest element ancestor when nothing is tracked
    /// by the time the root is reached.
    pub fn resolve(&self, doc: &Document, node: NodeId) -> Option<NodeId> {
        let mut fallback = None;
        let mut candidate = Some(node);
        while let Some(current) = candidate {
            if doc.is_element(current) {
                if fallback.is_none() {
                    fallback = Some(current);
                }
                if doc.attribute(current, &self.marker_attr).is_some()
                    || self.tracked.contains(&Some(current))
                {
                    return Some(current);
                }
            }
            candidate = doc.parent(current);
        }
        fallback
    }

    /// Vacate every slot whose element is no longer connected.
    pub fn cleanup(&mut self, doc: &Document) {
        for slot in 0..self.tracked.len() {
            if let Some(element) = self.tracked[slot] {
                if !doc.is_connected(element) {
                    self.tracked[slot] = None;
                    self.assignments[slot].clear();
                    self.snapshots.remove(&slot);
                }
            }
        }
    }

    // -- visual-editor snapshots --

    pub fn snapshot(&self, slot: usize) -> Option<&NodeSnapshot> {
        self.snapshots.get(&slot)
    }

    pub fn has_snapshot(&self, slot: usize) -> bool {
        self.snapshots.contains_key(&slot)
    }

    /// Store the pre-mutation snapshot for a slot if none exists yet; the
    /// earliest snapshot is the one the host reverts to.
    pub fn store_snapshot(&mut self, slot: usize, snapshot: NodeSnapshot) {
        self.snapshots.entry(slot).or_insert(snapshot);
    }

    /// Re-point a slot at the element that replaced its previous target
    /// (custom code may swap the node out entirely). The marker moves to
    /// the new element when the old one carried it; the revert snapshot
    /// stays with the slot.
    pub fn transfer(&mut self, doc: &mut Document, slot: usize, from: NodeId, to: NodeId) {
        if doc.attribute(to, &self.marker_attr).is_none()
            && doc.attribute(from, &self.marker_attr).is_some()
        {
            doc.set_attribute(to, &self.marker_attr, &slot.to_string());
        }
        if slot < self.tracked.len() {
            self.tracked[slot] = Some(to);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
