#![forbid(unsafe_code)]

//! A deterministic engine for applying targeted content variations to a
//! document and keeping them applied as the page mutates.
//!
//! The engine is single-threaded and host-driven: the host owns the
//! [`dom::Document`], supplies virtual time in milliseconds on every call,
//! drains mutation records into [`Engine::process_mutations`], and drives
//! the debounced campaign report through [`Engine::poll`]. Nothing here
//! spawns threads, sleeps, or reads a clock.
//!
//! A typical session: construct an [`Engine`], push a [`VariationFeed`]
//! with [`Engine::set_variations`], run [`Engine::initial_pass`] once the
//! page is ready, then pump mutations and poll the reporter from the host
//! loop.

pub mod adapter;
mod applicator;
pub mod criteria;
pub mod dom;
pub mod engine;
pub mod report;
pub mod selector;
mod store;
pub mod targets;
pub mod variation;
mod watcher;

pub use adapter::{AdapterOptions, DynamicContentAdapter};
pub use criteria::{Criterion, CriterionError, CriterionKind, CustomPredicate, PageContext};
pub use dom::{Document, MutationKind, MutationRecord, NodeId, NodeSnapshot};
pub use engine::{Engine, EngineConfig, EngineEvent};
pub use report::{ReportCallback, ReportTransport, TransportError, REPORT_DEBOUNCE_MS, REPORT_PATH};
pub use selector::{Selector, SelectorError};
pub use targets::{TargetIndex, MARKER_ATTRIBUTE};
pub use variation::{
    CampaignId, CustomEffect, EffectError, Variation, VariationFeed, VariationId,
};
