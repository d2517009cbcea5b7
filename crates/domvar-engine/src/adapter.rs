//! Dynamic-content adapter: a bridge for single-page frameworks that
//! render into a static container after the initial pass.
//!
//! The host points the adapter at a static container and a selector for
//! the dynamically rendered pieces inside it. On each mutation batch the
//! adapter finds newly rendered, not-yet-marked pieces, marks them with a
//! per-adapter class, and runs the host callback once — typically a
//! re-application of the relevant variations. The mark keeps a piece from
//! being handed to the callback twice.

use crate::dom::{Document, MutationRecord, NodeId};
use crate::selector::{Selector, SelectorError};

// ---------------------------------------------------------------------------
// AdapterOptions
// ---------------------------------------------------------------------------

/// Host-supplied wiring for one adapter instance.
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    /// Selector for the stable container the framework renders into.
    pub static_container: String,
    /// Selector for the rendered pieces inside the container.
    pub dynamic_container: String,
    /// Whether mutations anywhere under the container qualify, or only
    /// mutations on the container itself.
    pub watch_subtree: bool,
    /// Whether the callback should also run once at wiring time.
    pub run_callback_now: bool,
}

// ---------------------------------------------------------------------------
// DynamicContentAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct DynamicContentAdapter {
    static_target: Option<NodeId>,
    dynamic_selector: Selector,
    watch_subtree: bool,
    run_now: bool,
    modified_class: String,
}

impl DynamicContentAdapter {
    /// Wire an adapter against the current document. An absent static
    /// container leaves the adapter inactive rather than failing; only a
    /// malformed selector is an error. `seq` distinguishes the marker
    /// class when several adapters watch the same page.
    pub fn new(doc: &Document, options: AdapterOptions, seq: usize) -> Result<Self, SelectorError> {
        let static_selector = Selector::parse(&options.static_container)?;
        let dynamic_selector = Selector::parse(&options.dynamic_container)?;
        let static_target = doc.query_selector(&static_selector);
        Ok(Self {
            static_target,
            dynamic_selector,
            watch_subtree: options.watch_subtree,
            run_now: options.run_callback_now && static_target.is_some(),
            modified_class: format!("content-modified-{seq}"),
        })
    }

    pub fn is_active(&self) -> bool {
        self.static_target.is_some()
    }

    /// Whether the host should invoke its callback immediately after
    /// wiring.
    pub fn run_now(&self) -> bool {
        self.run_now
    }

    pub fn modified_class(&self) -> &str {
        &self.modified_class
    }

    /// Process one mutation batch: when a qualifying record is present,
    /// mark every unmarked dynamic piece and run the callback once. The
    /// callback receives the document so it can re-apply variations;
    /// records it generates are discarded with the marks. Returns the
    /// number of pieces marked.
    pub fn pump(
        &self,
        doc: &mut Document,
        records: &[MutationRecord],
        callback: &mut dyn FnMut(&mut Document),
    ) -> usize {
        let Some(container) = self.static_target else {
            return 0;
        };
        let qualifying = records.iter().any(|record| {
            if self.watch_subtree {
                doc.is_descendant_or_self(record.target, container)
            } else {
                record.target == container
            }
        });
        if !qualifying {
            return 0;
        }

        let fresh: Vec<NodeId> = doc
            .query_selector_all(&self.dynamic_selector)
            .into_iter()
            .filter(|&node| doc.is_descendant_or_self(node, container))
            .filter(|&node| !has_class(doc, node, &self.modified_class))
            .collect();
        if fresh.is_empty() {
            return 0;
        }

        // Neither the marks nor the callback's own work may feed back
        // into the watcher.
        let mark = doc.records_len();
        for &node in &fresh {
            add_class(doc, node, &self.modified_class);
        }
        callback(doc);
        doc.truncate_records(mark);
        fresh.len()
    }
}

fn has_class(doc: &Document, node: NodeId, class: &str) -> bool {
    doc.attribute(node, "class")
        .is_some_and(|value| value.split_whitespace().any(|c| c == class))
}

fn add_class(doc: &mut Document, node: NodeId, class: &str) {
    let updated = match doc.attribute(node, "class") {
        Some(current) if !current.is_empty() => format!("{current} {class}"),
        _ => class.to_string(),
    };
    doc.set_attribute(node, "class", &updated);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
