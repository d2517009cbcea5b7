//! The engine instance: one value per page session holding every mutable
//! table the components share — the active variation list, target index,
//! counted campaigns, applied flags, report channel, and the structured
//! event log.
//!
//! Everything is single-threaded and cooperative. Time enters as virtual
//! milliseconds (`now_ms`) supplied by the host on each call, which keeps
//! the throttle window and the report debounce deterministic. The only
//! "timer" is the report deadline, driven by `poll`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::criteria::PageContext;
use crate::dom::{Document, NodeId, NodeSnapshot};
use crate::report::{ReportCallback, ReportChannel, ReportTransport, REPORT_DEBOUNCE_MS, REPORT_PATH};
use crate::targets::{TargetIndex, MARKER_ATTRIBUTE};
use crate::variation::{CampaignId, Variation, VariationId};

// ---------------------------------------------------------------------------
// EngineConfig — session tuning
// ---------------------------------------------------------------------------

/// Tuning for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attribute stamped on assigned elements, holding their slot index.
    pub marker_attr: String,
    /// Sliding window for the loop guard, in virtual ms.
    pub throttle_window_ms: u64,
    /// Applications allowed within the window before the breaker trips.
    pub max_applications: usize,
    /// Delay before a requested report flush fires, in virtual ms.
    pub report_debounce_ms: u64,
    /// Fixed path the report is posted to.
    pub report_path: String,
    /// Container whose `.applied-<id>` children mirror preview state.
    pub preview_panel_selector: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            marker_attr: MARKER_ATTRIBUTE.to_string(),
            throttle_window_ms: 1_000,
            max_applications: 1_000,
            report_debounce_ms: REPORT_DEBOUNCE_MS,
            report_path: REPORT_PATH.to_string(),
            preview_panel_selector: "#preview-panel".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineEvent — structured, drainable evidence
// ---------------------------------------------------------------------------

/// Structured event emitted by engine operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// The variation set was replaced wholesale by the controller.
    VariationsReplaced { count: usize, ve_override: bool },
    /// One effective application of a variation to a target slot.
    VariationApplied { variation_id: VariationId, slot: usize },
    /// The applied-log hard cap was reached; application aborted.
    LoopBreakerTripped {
        variation_id: VariationId,
        window_len: usize,
    },
    /// A campaign was counted for the first time this session.
    CampaignCounted { campaign_id: CampaignId },
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One variation-application engine, constructed once per page session.
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) variations: Vec<Variation>,
    pub(crate) timestamps: BTreeMap<String, u64>,
    pub(crate) ve_override: bool,
    pub(crate) targets: TargetIndex,
    pub(crate) reporter: ReportChannel,
    /// Campaigns counted this session; the full map is the report payload.
    pub(crate) counted: BTreeMap<CampaignId, bool>,
    /// Last known "produced an effect" flag per variation.
    pub(crate) applied_flags: BTreeMap<VariationId, bool>,
    pub(crate) watchers: Vec<Box<dyn FnMut(&[Variation])>>,
    pub(crate) events: Vec<EngineEvent>,
    pub(crate) initial_pass_done: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let targets = TargetIndex::new(config.marker_attr.clone());
        let reporter = ReportChannel::new(config.report_path.clone(), config.report_debounce_ms);
        Self {
            config,
            variations: Vec::new(),
            timestamps: BTreeMap::new(),
            ve_override: false,
            targets,
            reporter,
            counted: BTreeMap::new(),
            applied_flags: BTreeMap::new(),
            watchers: Vec::new(),
            events: Vec::new(),
            initial_pass_done: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether the visual-editor host currently has exclusive control.
    pub fn ve_override(&self) -> bool {
        self.ve_override
    }

    pub fn variations(&self) -> &[Variation] {
        &self.variations
    }

    /// Session timestamps carried by the last feed.
    pub fn timestamps(&self) -> &BTreeMap<String, u64> {
        &self.timestamps
    }

    /// Campaigns counted so far this session.
    pub fn counted(&self) -> &BTreeMap<CampaignId, bool> {
        &self.counted
    }

    /// Drain accumulated structured events.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    /// Run one bulk application pass the first time the page is ready.
    /// The page-ready collaborator calls this; later calls are no-ops.
    pub fn initial_pass(&mut self, doc: &mut Document, ctx: &PageContext, now: u64) -> usize {
        if self.initial_pass_done {
            return 0;
        }
        self.initial_pass_done = true;
        self.apply_all(doc, ctx, now)
    }

    /// Register the callback handed the parsed report response.
    pub fn set_report_callback(&mut self, callback: ReportCallback) {
        self.reporter.set_callback(callback);
    }

    /// Drive the debounced report flush. Returns true when a flush fired.
    pub fn poll(&mut self, now: u64, transport: &mut dyn ReportTransport) -> bool {
        self.reporter.poll(now, transport)
    }

    /// Deadline of the pending report flush, if one is scheduled.
    pub fn report_deadline(&self) -> Option<u64> {
        self.reporter.deadline()
    }

    /// Pre-mutation snapshot for an applied element, available to the
    /// visual-editor host while override mode is active.
    pub fn revert_snapshot(&self, doc: &Document, element: NodeId) -> Option<&NodeSnapshot> {
        let slot: usize = doc
            .attribute(element, self.targets.marker_attr())?
            .parse()
            .ok()?;
        self.targets.snapshot(slot)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("variations", &self.variations.len())
            .field("ve_override", &self.ve_override)
            .field("counted", &self.counted)
            .field("watchers", &self.watchers.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Selector;
    use crate::variation::VariationFeed;

    #[test]
    fn default_config_matches_session_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.throttle_window_ms, 1_000);
        assert_eq!(config.max_applications, 1_000);
        assert_eq!(config.report_debounce_ms, 100);
        assert_eq!(config.marker_attr, MARKER_ATTRIBUTE);
    }

    #[test]
    fn initial_pass_runs_exactly_once() {
        let mut engine = Engine::default();
        let mut doc = Document::new();
        let div = doc.create_element("div");
        doc.set_attribute(div, "id", "a");
        doc.append_child(doc.body(), div);
        engine.set_variations(VariationFeed::new(vec![Variation::new("v1", "c1")
            .with_selector(Selector::parse("#a").unwrap())
            .with_html("<b>x</b>")]));

        let ctx = PageContext::default();
        assert_eq!(engine.initial_pass(&mut doc, &ctx, 0), 1);
        assert_eq!(engine.initial_pass(&mut doc, &ctx, 1), 0);
    }

    #[test]
    fn drain_events_empties_the_log() {
        let mut engine = Engine::default();
        engine.set_variations(VariationFeed::default());
        assert!(!engine.drain_events().is_empty());
        assert!(engine.drain_events().is_empty());
    }
}
