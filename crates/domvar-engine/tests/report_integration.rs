use std::cell::RefCell;
use std::rc::Rc;

use domvar_engine::{
    Document, Engine, NodeId, PageContext, ReportTransport, Selector, TransportError, Variation,
    VariationFeed, REPORT_PATH,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RecordingTransport {
    posts: Vec<(String, String)>,
    response: Option<String>,
}

impl ReportTransport for RecordingTransport {
    fn post(&mut self, path: &str, body: &str) -> Result<Option<String>, TransportError> {
        self.posts.push((path.to_string(), body.to_string()));
        Ok(self.response.clone())
    }
}

fn page_with(ids: &[&str]) -> (Document, Vec<NodeId>) {
    let mut doc = Document::new();
    let mut nodes = Vec::new();
    for id in ids {
        let div = doc.create_element("div");
        doc.set_attribute(div, "id", id);
        doc.append_child(doc.body(), div);
        nodes.push(div);
    }
    doc.take_records();
    (doc, nodes)
}

fn styled(id: &str, campaign: &str, selector: &str) -> Variation {
    Variation::new(id, campaign)
        .with_selector(Selector::parse(selector).unwrap())
        .with_css("color", "red")
}

// ---------------------------------------------------------------------------
// Debounced flush
// ---------------------------------------------------------------------------

#[test]
fn applications_within_the_debounce_window_flush_once() {
    let (mut doc, _) = page_with(&["a", "b"]);
    let mut engine = Engine::default();
    let mut transport = RecordingTransport::default();
    let ctx = PageContext::default();

    // Two campaigns counted 40 virtual ms apart: one scheduled flush.
    engine.set_variations(VariationFeed::new(vec![styled("v1", "c1", "#a")]));
    engine.apply_all(&mut doc, &ctx, 0);
    engine.set_variations(VariationFeed::new(vec![
        styled("v1", "c1", "#a"),
        styled("v2", "c2", "#b"),
    ]));
    engine.apply_all(&mut doc, &ctx, 40);

    assert_eq!(engine.report_deadline(), Some(100));
    assert!(!engine.poll(99, &mut transport));
    assert!(engine.poll(100, &mut transport));

    assert_eq!(transport.posts.len(), 1);
    assert_eq!(transport.posts[0].0, REPORT_PATH);
    // The flushed body is the latest full counted map.
    assert_eq!(transport.posts[0].1, "{\"c1\":true,\"c2\":true}");

    // Nothing further is pending.
    assert!(!engine.poll(1_000, &mut transport));
    assert_eq!(transport.posts.len(), 1);
}

#[test]
fn reapplication_does_not_grow_the_payload() {
    let (mut doc, nodes) = page_with(&["a"]);
    let mut engine = Engine::default();
    let mut transport = RecordingTransport::default();
    let ctx = PageContext::default();

    engine.set_variations(VariationFeed::new(vec![styled("v1", "c1", "#a")
        .with_html("<b>x</b>")]));
    engine.apply_all(&mut doc, &ctx, 0);
    engine.poll(100, &mut transport);

    // The watcher re-applies; the campaign stays counted exactly once.
    doc.set_inner_html(nodes[0], "rewrite");
    engine.process_mutations(&mut doc, 200);
    engine.poll(300, &mut transport);

    assert_eq!(transport.posts.len(), 2);
    assert_eq!(transport.posts[0].1, transport.posts[1].1);
    assert_eq!(transport.posts[1].1, "{\"c1\":true}");
}

#[test]
fn response_reaches_the_registered_callback() {
    let (mut doc, _) = page_with(&["a"]);
    let mut engine = Engine::default();
    let mut transport = RecordingTransport {
        response: Some("{\"acknowledged\":true}".to_string()),
        ..RecordingTransport::default()
    };

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    engine.set_report_callback(Box::new(move |value| sink.borrow_mut().push(value)));

    engine.set_variations(VariationFeed::new(vec![styled("v1", "c1", "#a")]));
    engine.apply_all(&mut doc, &PageContext::default(), 0);
    engine.poll(100, &mut transport);

    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(
        seen.borrow()[0]["acknowledged"],
        serde_json::Value::Bool(true)
    );
}
