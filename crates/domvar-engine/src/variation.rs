//! Variation definitions: identity, gating criteria, mutation payloads,
//! and the per-variation runtime state the applicator maintains.
//!
//! Custom mutations are injected capabilities, not compiled code: the
//! controller supplies a function value that is invoked through a narrow
//! catch-all boundary. A failing capability degrades to a no-op for that
//! step only and is never propagated.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::criteria::Criterion;
use crate::dom::{Document, NodeId};
use crate::selector::Selector;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identity of a single variation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariationId(pub String);

impl VariationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for VariationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a campaign: the unit reported exactly once per session,
/// grouping one or more variations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CampaignId(pub String);

impl CampaignId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// EffectError — the catch-all boundary for controller-supplied code
// ---------------------------------------------------------------------------

/// Failure inside controller-supplied code. Always caught at the call
/// site; the failing step no-ops and the engine keeps going.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EffectError {
    #[error("custom code failed: {0}")]
    Custom(String),
}

impl EffectError {
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

// ---------------------------------------------------------------------------
// CustomEffect — injected mutation capability
// ---------------------------------------------------------------------------

/// Controller-supplied mutation, invoked with the resolved target.
#[derive(Clone)]
pub struct CustomEffect(Rc<dyn Fn(&mut Document, NodeId) -> Result<(), EffectError>>);

impl CustomEffect {
    pub fn new(
        effect: impl Fn(&mut Document, NodeId) -> Result<(), EffectError> + 'static,
    ) -> Self {
        Self(Rc::new(effect))
    }

    pub(crate) fn run(&self, doc: &mut Document, target: NodeId) -> Result<(), EffectError> {
        (self.0)(doc, target)
    }
}

impl fmt::Debug for CustomEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomEffect(..)")
    }
}

// ---------------------------------------------------------------------------
// Variation — declarative payload plus runtime state
// ---------------------------------------------------------------------------

/// A declarative content mutation tied to a selector and gating criteria.
///
/// `applied` is the sliding loop-guard window of application timestamps
/// (virtual ms); `counted` records whether this variation is the one that
/// triggered its campaign's report entry. Feeds restored from an earlier
/// page load in the same session may arrive with both pre-populated.
#[derive(Debug, Clone)]
pub struct Variation {
    pub id: VariationId,
    pub campaign_id: CampaignId,
    pub selector: Option<Selector>,
    pub criteria: Vec<Criterion>,
    /// Replacement for the target's entire inner content.
    pub html: Option<String>,
    /// Style properties set directly on the target.
    pub css: BTreeMap<String, String>,
    /// Attributes set on the target.
    pub attributes: BTreeMap<String, String>,
    /// Controller-supplied code, run last.
    pub custom: Option<CustomEffect>,
    /// Whether an effective application may count the campaign.
    pub trigger_counted: bool,
    /// Applied-log window: timestamps of recent applications.
    pub applied: VecDeque<u64>,
    pub counted: bool,
}

impl Variation {
    pub fn new(id: impl Into<String>, campaign_id: impl Into<String>) -> Self {
        Self {
            id: VariationId::new(id),
            campaign_id: CampaignId::new(campaign_id),
            selector: None,
            criteria: Vec::new(),
            html: None,
            css: BTreeMap::new(),
            attributes: BTreeMap::new(),
            custom: None,
            trigger_counted: true,
            applied: VecDeque::new(),
            counted: false,
        }
    }

    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn with_css(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.css.insert(property.into(), value.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_custom(mut self, effect: CustomEffect) -> Self {
        self.custom = Some(effect);
        self
    }

    /// Exclude this variation from campaign counting.
    pub fn without_counting(mut self) -> Self {
        self.trigger_counted = false;
        self
    }
}

// ---------------------------------------------------------------------------
// VariationFeed — the inbound controller structure
// ---------------------------------------------------------------------------

/// Wholesale variation set pushed by the controller. `timestamps` is
/// session state restored from a prior page load; the engine stores it
/// untouched. `is_ve_preview` switches the visual-editor override mode.
#[derive(Debug, Clone, Default)]
pub struct VariationFeed {
    pub variations: Vec<Variation>,
    pub timestamps: BTreeMap<String, u64>,
    pub is_ve_preview: bool,
}

impl VariationFeed {
    pub fn new(variations: Vec<Variation>) -> Self {
        Self {
            variations,
            timestamps: BTreeMap::new(),
            is_ve_preview: false,
        }
    }

    pub fn preview(mut self) -> Self {
        self.is_ve_preview = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
