use domvar_engine::{
    AdapterOptions, Document, DynamicContentAdapter, Engine, NodeId, PageContext, Selector,
    Variation, VariationFeed, VariationId,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn spa_page() -> (Document, NodeId) {
    let mut doc = Document::new();
    let app = doc.create_element("main");
    doc.set_attribute(app, "id", "app");
    doc.append_child(doc.body(), app);
    doc.take_records();
    (doc, app)
}

fn render_product(doc: &mut Document, parent: NodeId, name: &str) -> NodeId {
    let card = doc.create_element("div");
    doc.set_attribute(card, "class", "product");
    let title = doc.create_text(name);
    doc.append_child(card, title);
    doc.append_child(parent, card);
    card
}

// ---------------------------------------------------------------------------
// Watcher persistence
// ---------------------------------------------------------------------------

#[test]
fn variation_survives_repeated_framework_renders() {
    let (mut doc, app) = spa_page();
    let mut engine = Engine::default();
    engine.set_variations(VariationFeed::new(vec![Variation::new("v1", "c1")
        .with_selector(Selector::parse("#app").unwrap())
        .with_attribute("data-theme", "promo")]));
    engine.apply_all(&mut doc, &PageContext::default(), 0);

    for tick in 1..=3u64 {
        doc.remove_attribute(app, "data-theme");
        assert_eq!(engine.process_mutations(&mut doc, tick * 100), 1);
        assert_eq!(doc.attribute(app, "data-theme"), Some("promo"));
    }
}

#[test]
fn unrelated_mutations_do_not_reapply() {
    let (mut doc, _) = spa_page();
    let mut engine = Engine::default();
    engine.set_variations(VariationFeed::new(vec![Variation::new("v1", "c1")
        .with_selector(Selector::parse("#app").unwrap())
        .with_css("color", "red")]));
    engine.apply_all(&mut doc, &PageContext::default(), 0);

    // Mutate a sibling the variation never targeted.
    let aside = doc.create_element("aside");
    doc.append_child(doc.body(), aside);
    doc.set_attribute(aside, "data-x", "1");

    assert_eq!(engine.process_mutations(&mut doc, 10), 0);
    assert_eq!(engine.variations()[0].applied.len(), 1);
}

// ---------------------------------------------------------------------------
// Dynamic-content adapter wiring
// ---------------------------------------------------------------------------

#[test]
fn adapter_reapplies_variations_to_late_rendered_content() {
    let (mut doc, app) = spa_page();
    let mut engine = Engine::default();
    engine.set_variations(VariationFeed::new(vec![Variation::new("v1", "c1")
        .with_selector(Selector::parse(".product").unwrap())
        .with_css("border", "2px solid gold")]));

    // Initial pass: nothing rendered yet, nothing applied.
    let ctx = PageContext::default();
    assert_eq!(engine.apply_all(&mut doc, &ctx, 0), 0);

    let adapter = DynamicContentAdapter::new(
        &doc,
        AdapterOptions {
            static_container: "#app".to_string(),
            dynamic_container: ".product".to_string(),
            watch_subtree: true,
            run_callback_now: false,
        },
        0,
    )
    .unwrap();
    assert!(adapter.is_active());

    // The framework renders two cards after a fetch completes.
    let first = render_product(&mut doc, app, "alpha");
    let second = render_product(&mut doc, app, "beta");
    let records = doc.take_records();

    let mut applied = 0;
    let marked = adapter.pump(&mut doc, &records, &mut |doc: &mut Document| {
        applied += engine.apply_variation(doc, &ctx, &VariationId::new("v1"), 10);
    });

    assert_eq!(marked, 2);
    assert_eq!(applied, 2);
    assert_eq!(doc.style_property(first, "border"), Some("2px solid gold"));
    assert_eq!(doc.style_property(second, "border"), Some("2px solid gold"));
}

#[test]
fn adapter_marks_only_new_content_on_later_renders() {
    let (mut doc, app) = spa_page();
    let adapter = DynamicContentAdapter::new(
        &doc,
        AdapterOptions {
            static_container: "#app".to_string(),
            dynamic_container: ".product".to_string(),
            watch_subtree: true,
            run_callback_now: false,
        },
        1,
    )
    .unwrap();

    render_product(&mut doc, app, "alpha");
    let records = doc.take_records();
    let mut calls = 0;
    assert_eq!(adapter.pump(&mut doc, &records, &mut |_: &mut Document| calls += 1), 1);

    render_product(&mut doc, app, "beta");
    let records = doc.take_records();
    assert_eq!(adapter.pump(&mut doc, &records, &mut |_: &mut Document| calls += 1), 1);
    assert_eq!(calls, 2);
}
