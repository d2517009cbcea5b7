//! The variation store: wholesale replacement of the active set and the
//! watcher callbacks that observe it.
//!
//! The controller pushes a complete `VariationFeed` each time anything
//! changes; there is no incremental update. Campaigns already marked
//! counted in the incoming feed (session state restored from an earlier
//! page load) fold into the counted map so they are never reported twice.

use crate::engine::{Engine, EngineEvent};
use crate::variation::{Variation, VariationFeed, VariationId};

impl Engine {
    /// Replace the active variation set with the feed's contents and
    /// notify every registered watcher.
    pub fn set_variations(&mut self, feed: VariationFeed) {
        self.ve_override = feed.is_ve_preview;
        self.timestamps = feed.timestamps;
        self.variations = feed.variations;

        for variation in &self.variations {
            if variation.counted {
                self.counted.insert(variation.campaign_id.clone(), true);
            }
        }

        self.events.push(EngineEvent::VariationsReplaced {
            count: self.variations.len(),
            ve_override: self.ve_override,
        });
        self.notify_watchers();
    }

    /// Register a callback invoked with the current variation list
    /// immediately, then again after every replacement.
    pub fn register_watcher(&mut self, mut watcher: impl FnMut(&[Variation]) + 'static) {
        watcher(&self.variations);
        self.watchers.push(Box::new(watcher));
    }

    /// Whether the variation's most recent pass changed at least one
    /// element. Unknown ids report false.
    pub fn check_applied(&self, id: &VariationId) -> bool {
        self.applied_flags.get(id).copied().unwrap_or(false)
    }

    fn notify_watchers(&mut self) {
        // Watchers may call back into the engine's read accessors, so the
        // list is detached for the duration of the walk.
        let mut watchers = std::mem::take(&mut self.watchers);
        for watcher in &mut watchers {
            watcher(&self.variations);
        }
        self.watchers.append(&mut watchers);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
