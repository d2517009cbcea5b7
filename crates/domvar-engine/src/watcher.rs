//! The mutation watcher: keeps variations applied when the page mutates
//! underneath them.
//!
//! The host drains the document's mutation records into `process_mutations`
//! whenever it sees fit (typically once per frame or after each framework
//! render). Each record is normalized to the nearest known element, and
//! every variation already assigned to that element is re-executed.
//! Criteria are not re-checked here: an assignment made under passing
//! criteria stays live until the variation set is replaced.
//!
//! Records generated by the re-executions themselves are discarded at the
//! end of the batch so the watcher never feeds on its own output.

use crate::dom::Document;

impl crate::engine::Engine {
    /// Process one batch of pending mutation records, re-applying every
    /// assigned variation whose element mutated. Returns the number of
    /// effective re-applications.
    pub fn process_mutations(&mut self, doc: &mut Document, now: u64) -> usize {
        let records = doc.take_records();
        if records.is_empty() {
            return 0;
        }
        // In override mode the visual editor owns the document; reacting
        // to its edits would fight the operator.
        if self.ve_override {
            return 0;
        }

        let mut applied = 0;
        let mut seen = Vec::new();
        for record in records {
            let Some(element) = self.targets.resolve(doc, record.target) else {
                continue;
            };
            if seen.contains(&element) || !doc.is_connected(element) {
                continue;
            }
            seen.push(element);

            let slot = self.targets.find_assignment(doc, element);
            let assigned = self.targets.assigned(slot).to_vec();
            for id in assigned {
                if let Some(index) = self.variations.iter().position(|v| v.id == id) {
                    applied += self.execute_on(doc, index, slot, element, now);
                }
            }
        }

        self.targets.cleanup(doc);
        // Marker stamps and re-applications queued records of their own;
        // drop them so the next batch starts clean.
        doc.take_records();
        applied
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
