//! The variation applicator: criteria gate, target resolution, payload
//! execution, loop guard, and the counted-once reporting side effect.
//!
//! Re-entrancy discipline: every per-target registration and execution is
//! bracketed by a record mark, and records generated inside the bracket
//! (marker stamps, payload mutations, preview toggles) are discarded
//! before control returns. This is the primary protection against a
//! variation recursively re-triggering itself through the mutation
//! watcher; the applied-log hard cap is the secondary, time-windowed
//! breaker.

use crate::criteria::{self, PageContext};
use crate::dom::{Document, NodeId};
use crate::engine::{Engine, EngineEvent};
use crate::selector::Selector;
use crate::variation::VariationId;

impl Engine {
    /// Apply every active variation in order. Returns the total number of
    /// elements changed.
    pub fn apply_all(&mut self, doc: &mut Document, ctx: &PageContext, now: u64) -> usize {
        let mut total = 0;
        for index in 0..self.variations.len() {
            total += self.apply_at(doc, ctx, index, now);
        }
        total
    }

    /// Apply a single variation by id. Unknown ids change nothing.
    pub fn apply_variation(
        &mut self,
        doc: &mut Document,
        ctx: &PageContext,
        id: &VariationId,
        now: u64,
    ) -> usize {
        match self.variations.iter().position(|v| &v.id == id) {
            Some(index) => self.apply_at(doc, ctx, index, now),
            None => 0,
        }
    }

    fn apply_at(&mut self, doc: &mut Document, ctx: &PageContext, index: usize, now: u64) -> usize {
        let id = self.variations[index].id.clone();
        // The preview flag reflects the latest pass only.
        self.applied_flags.remove(&id);
        let changed = self.apply_targets(doc, ctx, index, now);
        self.set_preview(doc, &id, changed);
        changed
    }

    fn apply_targets(
        &mut self,
        doc: &mut Document,
        ctx: &PageContext,
        index: usize,
        now: u64,
    ) -> usize {
        let Some(selector) = self.variations[index].selector.clone() else {
            return 0;
        };
        if !criteria::evaluate(&self.variations[index], ctx) {
            return 0;
        }

        let id = self.variations[index].id.clone();
        let mut changed = 0;
        for target in doc.query_selector_all(&selector) {
            let mark = doc.records_len();
            let (slot, fresh) = self.targets.register(doc, target, &id);
            if fresh {
                // First association applies immediately. Re-applying an
                // existing assignment from a bulk pass is a silent no-op;
                // only the mutation watcher re-executes known assignments.
                changed += self.execute_on(doc, index, slot, target, now);
            }
            doc.truncate_records(mark);
        }
        changed
    }

    /// Execute one variation on one target. Returns 1 on an effective
    /// application, 0 when gated by the loop breaker.
    pub(crate) fn execute_on(
        &mut self,
        doc: &mut Document,
        index: usize,
        slot: usize,
        target: NodeId,
        now: u64,
    ) -> usize {
        let id = self.variations[index].id.clone();
        let mark = doc.records_len();

        // Loop guard: prune the window from the front, record this
        // attempt, and trip the breaker at the hard cap.
        let window = self.config.throttle_window_ms;
        let cap = self.config.max_applications;
        let window_len = {
            let log = &mut self.variations[index].applied;
            while log.front().is_some_and(|&ts| ts + window < now) {
                log.pop_front();
            }
            log.push_back(now);
            log.len()
        };
        if window_len >= cap {
            tracing::warn!(
                variation = %id,
                window_len,
                "possible infinite loop detected, aborting application"
            );
            self.events.push(EngineEvent::LoopBreakerTripped {
                variation_id: id,
                window_len,
            });
            return 0;
        }

        if self.ve_override && !self.targets.has_snapshot(slot) {
            let snapshot = doc.clone_snapshot(target);
            self.targets.store_snapshot(slot, snapshot);
        }

        // Payloads in fixed order: html, style, attributes, custom.
        if let Some(html) = self.variations[index].html.clone() {
            doc.set_inner_html(target, &html);
        }
        for (property, value) in self.variations[index].css.clone() {
            doc.set_style_property(target, &property, &value);
        }
        for (name, value) in self.variations[index].attributes.clone() {
            doc.set_attribute(target, &name, &value);
        }
        if let Some(custom) = self.variations[index].custom.clone() {
            if let Err(err) = custom.run(doc, target) {
                // The custom step alone no-ops; earlier payloads stand.
                tracing::debug!(variation = %id, error = %err, "custom mutation failed, step skipped");
            }
        }

        // Discard the records these mutations generated so they cannot
        // re-enter through the watcher.
        doc.truncate_records(mark);

        if self.ve_override {
            // Custom code may have replaced the target outright (outer
            // content edits). Re-resolve by selector and carry the marker
            // and revert snapshot over to the replacement.
            let selector = self.variations[index].selector.clone();
            if let Some(selector) = selector {
                if let Some(new_target) = doc.query_selector(&selector) {
                    if new_target != target {
                        self.targets.transfer(doc, slot, target, new_target);
                        doc.truncate_records(mark);
                    }
                }
            }
        }

        // Counted-once: the first effective application of any variation
        // in a campaign enters that campaign into the report batch.
        let campaign = self.variations[index].campaign_id.clone();
        if !self.variations[index].counted
            && self.variations[index].trigger_counted
            && !self.counted.contains_key(&campaign)
        {
            self.variations[index].counted = true;
            self.counted.insert(campaign.clone(), true);
            self.events.push(EngineEvent::CampaignCounted {
                campaign_id: campaign,
            });
        }
        self.reporter.notify(self.counted.clone(), now);

        self.events.push(EngineEvent::VariationApplied {
            variation_id: self.variations[index].id.clone(),
            slot,
        });
        1
    }

    /// Update the preview flag and mirror it onto the preview panel's
    /// `.applied-<id>` elements.
    fn set_preview(&mut self, doc: &mut Document, id: &VariationId, changed: usize) {
        let visible = *self.applied_flags.entry(id.clone()).or_insert(changed > 0);
        let source = format!("{} .applied-{id}", self.config.preview_panel_selector);
        if let Ok(selector) = Selector::parse(&source) {
            let mark = doc.records_len();
            for element in doc.query_selector_all(&selector) {
                doc.set_style_property(element, "display", if visible { "block" } else { "none" });
            }
            doc.truncate_records(mark);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::Criterion;
    use crate::engine::EngineConfig;
    use crate::variation::{CustomEffect, EffectError, Variation, VariationFeed};

    fn page() -> (Document, NodeId) {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        doc.set_attribute(div, "id", "a");
        doc.append_child(doc.body(), div);
        doc.take_records();
        (doc, div)
    }

    fn html_variation(id: &str, campaign: &str) -> Variation {
        Variation::new(id, campaign)
            .with_selector(Selector::parse("#a").unwrap())
            .with_html("<b>x</b>")
    }

    #[test]
    fn missing_selector_changes_nothing() {
        let (mut doc, _) = page();
        let mut engine = Engine::default();
        engine.set_variations(VariationFeed::new(vec![Variation::new("v1", "c1")
            .with_html("<b>x</b>")]));
        assert_eq!(engine.apply_all(&mut doc, &PageContext::default(), 0), 0);
        assert!(engine.variations()[0].applied.is_empty());
    }

    #[test]
    fn rejected_criteria_mutate_no_state() {
        let (mut doc, div) = page();
        let mut engine = Engine::default();
        engine.set_variations(VariationFeed::new(vec![html_variation("v1", "c1")
            .with_criterion(Criterion::path("^/only-here$").unwrap())]));

        let ctx = PageContext::new("/elsewhere", "", "");
        assert_eq!(engine.apply_all(&mut doc, &ctx, 0), 0);
        assert_eq!(doc.inner_html(div), "");
        assert!(engine.variations()[0].applied.is_empty());
        assert!(engine.counted().is_empty());
    }

    #[test]
    fn html_payload_replaces_inner_content() {
        let (mut doc, div) = page();
        let mut engine = Engine::default();
        engine.set_variations(VariationFeed::new(vec![html_variation("v1", "c1")]));

        let changed = engine.apply_all(&mut doc, &PageContext::default(), 0);
        assert_eq!(changed, 1);
        assert_eq!(doc.inner_html(div), "<b>x</b>");
        assert!(engine.check_applied(&VariationId::new("v1")));
    }

    #[test]
    fn second_bulk_pass_is_idempotent() {
        let (mut doc, _) = page();
        let mut engine = Engine::default();
        engine.set_variations(VariationFeed::new(vec![html_variation("v1", "c1")]));

        assert_eq!(engine.apply_all(&mut doc, &PageContext::default(), 0), 1);
        assert_eq!(engine.apply_all(&mut doc, &PageContext::default(), 10), 0);
        // Only the first pass recorded an application.
        assert_eq!(engine.variations()[0].applied.len(), 1);
    }

    #[test]
    fn css_and_attributes_are_set_directly() {
        let (mut doc, div) = page();
        let mut engine = Engine::default();
        engine.set_variations(VariationFeed::new(vec![Variation::new("v1", "c1")
            .with_selector(Selector::parse("#a").unwrap())
            .with_css("color", "red")
            .with_attribute("role", "banner")]));

        engine.apply_all(&mut doc, &PageContext::default(), 0);
        assert_eq!(doc.style_property(div, "color"), Some("red"));
        assert_eq!(doc.attribute(div, "role"), Some("banner"));
    }

    #[test]
    fn failing_custom_step_keeps_earlier_payloads() {
        let (mut doc, div) = page();
        let mut engine = Engine::default();
        engine.set_variations(VariationFeed::new(vec![Variation::new("v1", "c1")
            .with_selector(Selector::parse("#a").unwrap())
            .with_html("<i>kept</i>")
            .with_custom(CustomEffect::new(|_, _| {
                Err(EffectError::custom("broken"))
            }))]));

        assert_eq!(engine.apply_all(&mut doc, &PageContext::default(), 0), 1);
        assert_eq!(doc.inner_html(div), "<i>kept</i>");
    }

    #[test]
    fn application_leaves_no_pending_records() {
        let (mut doc, _) = page();
        let mut engine = Engine::default();
        engine.set_variations(VariationFeed::new(vec![html_variation("v1", "c1")]));
        engine.apply_all(&mut doc, &PageContext::default(), 0);
        assert_eq!(doc.records_len(), 0);
    }

    #[test]
    fn loop_breaker_trips_at_the_cap() {
        let (mut doc, div) = page();
        let mut engine = Engine::new(EngineConfig {
            max_applications: 3,
            ..EngineConfig::default()
        });
        engine.set_variations(VariationFeed::new(vec![html_variation("v1", "c1")]));
        engine.apply_all(&mut doc, &PageContext::default(), 0);
        engine.drain_events();

        // Re-execute the known assignment through the watcher path.
        doc.set_attribute(div, "poke", "1");
        assert_eq!(engine.process_mutations(&mut doc, 1), 1);
        doc.set_attribute(div, "poke", "2");
        // Third attempt within the window reaches the cap of 3.
        assert_eq!(engine.process_mutations(&mut doc, 2), 0);

        let events = engine.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::LoopBreakerTripped { variation_id, window_len: 3 }
                if variation_id == &VariationId::new("v1")
        )));
    }

    #[test]
    fn breaker_releases_after_a_quiet_window() {
        let (mut doc, div) = page();
        let mut engine = Engine::new(EngineConfig {
            max_applications: 2,
            ..EngineConfig::default()
        });
        engine.set_variations(VariationFeed::new(vec![html_variation("v1", "c1")]));
        engine.apply_all(&mut doc, &PageContext::default(), 0);

        doc.set_attribute(div, "poke", "1");
        assert_eq!(engine.process_mutations(&mut doc, 10), 0);

        // Entries older than the window are pruned; application resumes.
        doc.set_attribute(div, "poke", "2");
        assert_eq!(engine.process_mutations(&mut doc, 2_000), 1);
    }

    #[test]
    fn campaign_counts_once_across_sibling_variations() {
        let (mut doc, _) = page();
        let mut engine = Engine::default();
        engine.set_variations(VariationFeed::new(vec![
            html_variation("v1", "shared"),
            Variation::new("v2", "shared")
                .with_selector(Selector::parse("#a").unwrap())
                .with_css("color", "blue"),
        ]));

        assert_eq!(engine.apply_all(&mut doc, &PageContext::default(), 0), 2);
        assert!(engine.variations()[0].counted);
        assert!(!engine.variations()[1].counted);
        assert_eq!(engine.counted().len(), 1);

        let counted_events = engine
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::CampaignCounted { .. }))
            .count();
        assert_eq!(counted_events, 1);
    }

    #[test]
    fn trigger_counted_false_never_counts() {
        let (mut doc, _) = page();
        let mut engine = Engine::default();
        engine.set_variations(VariationFeed::new(vec![
            html_variation("v1", "c1").without_counting()
        ]));
        assert_eq!(engine.apply_all(&mut doc, &PageContext::default(), 0), 1);
        assert!(engine.counted().is_empty());
    }

    #[test]
    fn effect_schedules_a_report_flush() {
        let (mut doc, _) = page();
        let mut engine = Engine::default();
        engine.set_variations(VariationFeed::new(vec![html_variation("v1", "c1")]));
        engine.apply_all(&mut doc, &PageContext::default(), 5);
        assert_eq!(engine.report_deadline(), Some(105));
    }

    #[test]
    fn preview_panel_mirrors_applied_state() {
        let (mut doc, _) = page();
        let panel = doc.create_element("div");
        doc.set_attribute(panel, "id", "preview-panel");
        doc.append_child(doc.body(), panel);
        let badge = doc.create_element("span");
        doc.set_attribute(badge, "class", "applied-v1");
        doc.append_child(panel, badge);
        doc.take_records();

        let mut engine = Engine::default();
        engine.set_variations(VariationFeed::new(vec![html_variation("v1", "c1")]));
        engine.apply_all(&mut doc, &PageContext::default(), 0);
        assert_eq!(doc.style_property(badge, "display"), Some("block"));

        // A later pass with no new targets leaves the flag off.
        engine.apply_all(&mut doc, &PageContext::default(), 10);
        assert_eq!(doc.style_property(badge, "display"), Some("none"));
        assert!(!engine.check_applied(&VariationId::new("v1")));
    }
}
