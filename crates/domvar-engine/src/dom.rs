//! In-memory page document: an arena of element and text nodes with the
//! mutation-record queue the rest of the engine observes.
//!
//! The host owns one `Document` per page session and passes it by `&mut`
//! into every engine operation. Every mutating call appends a
//! `MutationRecord` to a pending queue; `take_records` drains a batch in
//! delivery order, and `records_len`/`truncate_records` implement the
//! scoped "mutate, then discard self-generated records" pattern the
//! applicator relies on to stay out of its own observation path.
//!
//! `set_inner_html` runs a small tolerant fragment parser: tags,
//! attributes (quoted or bare values), text, void elements. Malformed
//! markup degrades rather than erroring, matching live-page behavior.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::selector::Selector;

/// Elements serialized without a closing tag when childless.
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

// ---------------------------------------------------------------------------
// NodeId — stable handle into the node arena
// ---------------------------------------------------------------------------

/// Handle to a node in a `Document`. Stable for the life of the session;
/// detached nodes keep their id and may be re-attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// MutationRecord — one observed change
// ---------------------------------------------------------------------------

/// Kind of observed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    /// Children added, removed, or replaced. Target is the parent.
    ChildList,
    /// Attribute or style-property write. Target is the element.
    Attributes,
    /// Text-node content change. Target is the text node.
    CharacterData,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChildList => f.write_str("child_list"),
            Self::Attributes => f.write_str("attributes"),
            Self::CharacterData => f.write_str("character_data"),
        }
    }
}

/// One entry in the pending mutation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub target: NodeId,
    pub kind: MutationKind,
}

// ---------------------------------------------------------------------------
// NodeSnapshot — detached deep copy for visual-editor revert
// ---------------------------------------------------------------------------

/// Owned deep copy of a subtree, taken before the first mutation of a
/// target while override mode is active so the visual-editor host can
/// revert the element later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Element tag, or `None` for a text node.
    pub tag: Option<String>,
    /// Text content (text nodes only).
    pub text: String,
    pub attributes: BTreeMap<String, String>,
    pub style: BTreeMap<String, String>,
    pub children: Vec<NodeSnapshot>,
}

// ---------------------------------------------------------------------------
// Node storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum NodeData {
    Element { tag: String },
    Text { text: String },
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: BTreeMap<String, String>,
    style: BTreeMap<String, String>,
}

impl Node {
    fn element(tag: &str) -> Self {
        Self {
            data: NodeData::Element {
                tag: tag.to_ascii_lowercase(),
            },
            parent: None,
            children: Vec::new(),
            attributes: BTreeMap::new(),
            style: BTreeMap::new(),
        }
    }

    fn text(text: &str) -> Self {
        Self {
            data: NodeData::Text {
                text: text.to_string(),
            },
            parent: None,
            children: Vec::new(),
            attributes: BTreeMap::new(),
            style: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Document — the live page
// ---------------------------------------------------------------------------

/// The live page: a node arena rooted at a document element with a `body`
/// child, plus the pending mutation-record queue.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    body: NodeId,
    pending: Vec<MutationRecord>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty page: `<html><body></body></html>`.
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            body: NodeId(0),
            pending: Vec::new(),
        };
        let root = doc.alloc(Node::element("html"));
        let body = doc.alloc(Node::element("body"));
        doc.root = root;
        doc.body = body;
        doc.attach_silent(root, body);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    fn record(&mut self, target: NodeId, kind: MutationKind) {
        self.pending.push(MutationRecord { target, kind });
    }

    fn attach_silent(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    // -- node construction --

    /// Create a detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(Node::element(tag))
    }

    /// Create a detached text node.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(Node::text(text))
    }

    /// Attach `child` as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if self.nodes[child.0].parent.is_some() {
            self.remove(child);
        }
        self.attach_silent(parent, child);
        self.record(parent, MutationKind::ChildList);
    }

    /// Detach `node` from its parent. The subtree keeps its internal
    /// structure but is no longer connected to the document.
    pub fn remove(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent {
            self.nodes[parent.0].children.retain(|&c| c != node);
            self.nodes[node.0].parent = None;
            self.record(parent, MutationKind::ChildList);
        }
    }

    // -- structure queries --

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    /// Nearest element ancestor, excluding `node` itself.
    pub fn parent_element(&self, node: NodeId) -> Option<NodeId> {
        let mut cur = self.nodes[node.0].parent;
        while let Some(id) = cur {
            if self.is_element(id) {
                return Some(id);
            }
            cur = self.nodes[id.0].parent;
        }
        None
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        matches!(self.nodes[node.0].data, NodeData::Element { .. })
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        match &self.nodes[node.0].data {
            NodeData::Element { tag } => Some(tag),
            NodeData::Text { .. } => None,
        }
    }

    /// True while `node` is reachable from the document root.
    pub fn is_connected(&self, node: NodeId) -> bool {
        let mut cur = node;
        loop {
            if cur == self.root {
                return true;
            }
            match self.nodes[cur.0].parent {
                Some(parent) => cur = parent,
                None => return false,
            }
        }
    }

    /// True when `node` is `ancestor` or sits inside its subtree.
    pub fn is_descendant_or_self(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.nodes[id.0].parent;
        }
        false
    }

    // -- attributes and style --

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.nodes[node.0].attributes.get(name).map(String::as_str)
    }

    /// Set an attribute. A write with the current value is a no-op and
    /// records nothing.
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        if !self.is_element(node) {
            return;
        }
        if self.attribute(node, name) == Some(value) {
            return;
        }
        self.nodes[node.0]
            .attributes
            .insert(name.to_string(), value.to_string());
        self.record(node, MutationKind::Attributes);
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) {
        if self.nodes[node.0].attributes.remove(name).is_some() {
            self.record(node, MutationKind::Attributes);
        }
    }

    pub fn style_property(&self, node: NodeId, property: &str) -> Option<&str> {
        self.nodes[node.0].style.get(property).map(String::as_str)
    }

    /// Set one style property directly on the element.
    pub fn set_style_property(&mut self, node: NodeId, property: &str, value: &str) {
        if !self.is_element(node) {
            return;
        }
        if self.style_property(node, property) == Some(value) {
            return;
        }
        self.nodes[node.0]
            .style
            .insert(property.to_string(), value.to_string());
        self.record(node, MutationKind::Attributes);
    }

    // -- text --

    pub fn text(&self, node: NodeId) -> Option<&str> {
        match &self.nodes[node.0].data {
            NodeData::Text { text } => Some(text),
            NodeData::Element { .. } => None,
        }
    }

    pub fn set_text(&mut self, node: NodeId, text: &str) {
        if let NodeData::Text { text: current } = &mut self.nodes[node.0].data {
            if current == text {
                return;
            }
            *current = text.to_string();
            self.record(node, MutationKind::CharacterData);
        }
    }

    // -- inner HTML --

    /// Replace the entire inner content of `node` with parsed markup.
    /// Emits a single child-list record on `node`.
    pub fn set_inner_html(&mut self, node: NodeId, html: &str) {
        if !self.is_element(node) {
            return;
        }
        let old = std::mem::take(&mut self.nodes[node.0].children);
        for child in old {
            self.nodes[child.0].parent = None;
        }
        let roots = self.parse_fragment(html);
        for &root in &roots {
            self.nodes[root.0].parent = Some(node);
        }
        self.nodes[node.0].children = roots;
        self.record(node, MutationKind::ChildList);
    }

    /// Serialize the children of `node` back to markup. Attribute order is
    /// stable (sorted); the style map, when present, wins over a parsed
    /// `style` attribute.
    pub fn inner_html(&self, node: NodeId) -> String {
        self.nodes[node.0]
            .children
            .iter()
            .map(|&child| self.serialize_node(child))
            .collect()
    }

    fn serialize_node(&self, node: NodeId) -> String {
        let entry = &self.nodes[node.0];
        match &entry.data {
            NodeData::Text { text } => text.clone(),
            NodeData::Element { tag } => {
                let mut out = format!("<{tag}");
                for (name, value) in &entry.attributes {
                    if name == "style" && !entry.style.is_empty() {
                        continue;
                    }
                    out.push_str(&format!(" {name}=\"{value}\""));
                }
                if !entry.style.is_empty() {
                    let css: Vec<String> = entry
                        .style
                        .iter()
                        .map(|(property, value)| format!("{property}:{value}"))
                        .collect();
                    out.push_str(&format!(" style=\"{}\"", css.join(";")));
                }
                out.push('>');
                if entry.children.is_empty() && VOID_TAGS.contains(&tag.as_str()) {
                    return out;
                }
                for &child in &entry.children {
                    out.push_str(&self.serialize_node(child));
                }
                out.push_str(&format!("</{tag}>"));
                out
            }
        }
    }

    // -- snapshots --

    /// Deep owned copy of the subtree rooted at `node`.
    pub fn clone_snapshot(&self, node: NodeId) -> NodeSnapshot {
        let entry = &self.nodes[node.0];
        let (tag, text) = match &entry.data {
            NodeData::Element { tag } => (Some(tag.clone()), String::new()),
            NodeData::Text { text } => (None, text.clone()),
        };
        NodeSnapshot {
            tag,
            text,
            attributes: entry.attributes.clone(),
            style: entry.style.clone(),
            children: entry
                .children
                .iter()
                .map(|&child| self.clone_snapshot(child))
                .collect(),
        }
    }

    // -- selector queries --

    /// All connected elements matching `selector`, in document order.
    pub fn query_selector_all(&self, selector: &Selector) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if self.is_element(id) && selector.matches(self, id) {
                out.push(id);
            }
            for &child in self.nodes[id.0].children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// First connected element matching `selector`, in document order.
    pub fn query_selector(&self, selector: &Selector) -> Option<NodeId> {
        self.query_selector_all(selector).into_iter().next()
    }

    // -- mutation-record queue --

    /// Number of records currently pending. Captured as a mark before a
    /// mutation batch so self-generated records can be discarded after.
    pub fn records_len(&self) -> usize {
        self.pending.len()
    }

    /// Drain every pending record in delivery order.
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.pending)
    }

    /// Discard every record appended after `mark`.
    pub fn truncate_records(&mut self, mark: usize) {
        self.pending.truncate(mark);
    }

    // -- fragment parsing --

    fn parse_fragment(&mut self, html: &str) -> Vec<NodeId> {
        let chars: Vec<char> = html.chars().collect();
        let mut roots = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            if chars[i] == '<' && i + 1 < chars.len() && chars[i + 1] == '/' {
                i += 2;
                let name = read_ident(&chars, &mut i).to_ascii_lowercase();
                while i < chars.len() && chars[i] != '>' {
                    i += 1;
                }
                if i < chars.len() {
                    i += 1;
                }
                // Close the nearest matching open element; ignore strays.
                if let Some(pos) = stack
                    .iter()
                    .rposition(|&id| self.tag(id) == Some(name.as_str()))
                {
                    stack.truncate(pos);
                }
                continue;
            }

            if chars[i] == '<' && i + 1 < chars.len() && chars[i + 1].is_ascii_alphabetic() {
                i += 1;
                let tag = read_ident(&chars, &mut i).to_ascii_lowercase();
                let mut attributes = BTreeMap::new();
                let mut self_closing = false;
                loop {
                    skip_whitespace(&chars, &mut i);
                    if i >= chars.len() {
                        break;
                    }
                    if chars[i] == '>' {
                        i += 1;
                        break;
                    }
                    if chars[i] == '/' {
                        self_closing = true;
                        i += 1;
                        continue;
                    }
                    let name = read_attr_name(&chars, &mut i);
                    if name.is_empty() {
                        i += 1;
                        continue;
                    }
                    skip_whitespace(&chars, &mut i);
                    let mut value = String::new();
                    if i < chars.len() && chars[i] == '=' {
                        i += 1;
                        skip_whitespace(&chars, &mut i);
                        if i < chars.len() && (chars[i] == '"' || chars[i] == '\'') {
                            let quote = chars[i];
                            i += 1;
                            while i < chars.len() && chars[i] != quote {
                                value.push(chars[i]);
                                i += 1;
                            }
                            if i < chars.len() {
                                i += 1;
                            }
                        } else {
                            while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '>' {
                                value.push(chars[i]);
                                i += 1;
                            }
                        }
                    }
                    attributes.insert(name.to_ascii_lowercase(), value);
                }

                let element = self.alloc(Node {
                    data: NodeData::Element { tag: tag.clone() },
                    parent: None,
                    children: Vec::new(),
                    attributes,
                    style: BTreeMap::new(),
                });
                match stack.last() {
                    Some(&parent) => self.attach_silent(parent, element),
                    None => roots.push(element),
                }
                if !self_closing && !VOID_TAGS.contains(&tag.as_str()) {
                    stack.push(element);
                }
                continue;
            }

            // Text run; a stray '<' that opens no tag is literal text.
            let mut text = String::new();
            if chars[i] == '<' {
                text.push('<');
                i += 1;
            }
            while i < chars.len() && chars[i] != '<' {
                text.push(chars[i]);
                i += 1;
            }
            if !text.trim().is_empty() {
                let node = self.alloc(Node::text(&text));
                match stack.last() {
                    Some(&parent) => self.attach_silent(parent, node),
                    None => roots.push(node),
                }
            }
        }

        roots
    }
}

fn skip_whitespace(chars: &[char], i: &mut usize) {
    while *i < chars.len() && chars[*i].is_whitespace() {
        *i += 1;
    }
}

fn read_ident(chars: &[char], i: &mut usize) -> String {
    let mut out = String::new();
    while *i < chars.len()
        && (chars[*i].is_ascii_alphanumeric()
            || chars[*i] == '-'
            || chars[*i] == '_'
            || chars[*i] == ':')
    {
        out.push(chars[*i]);
        *i += 1;
    }
    out
}

fn read_attr_name(chars: &[char], i: &mut usize) -> String {
    let mut out = String::new();
    while *i < chars.len()
        && !chars[*i].is_whitespace()
        && chars[*i] != '='
        && chars[*i] != '>'
        && chars[*i] != '/'
    {
        out.push(chars[*i]);
        *i += 1;
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_div(id: &str) -> (Document, NodeId) {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        doc.set_attribute(div, "id", id);
        doc.append_child(doc.body(), div);
        doc.take_records();
        (doc, div)
    }

    #[test]
    fn new_document_has_connected_body() {
        let doc = Document::new();
        assert!(doc.is_connected(doc.body()));
        assert_eq!(doc.tag(doc.body()), Some("body"));
    }

    #[test]
    fn removed_subtree_is_disconnected() {
        let (mut doc, div) = doc_with_div("a");
        let inner = doc.create_element("span");
        doc.append_child(div, inner);
        assert!(doc.is_connected(inner));

        doc.remove(div);
        assert!(!doc.is_connected(div));
        assert!(!doc.is_connected(inner));
    }

    #[test]
    fn append_and_remove_record_child_list_on_parent() {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        doc.append_child(doc.body(), div);
        doc.remove(div);

        let records = doc.take_records();
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .all(|r| r.target == doc.body() && r.kind == MutationKind::ChildList));
    }

    #[test]
    fn unchanged_attribute_write_records_nothing() {
        let (mut doc, div) = doc_with_div("a");
        doc.set_attribute(div, "role", "main");
        assert_eq!(doc.records_len(), 1);
        doc.set_attribute(div, "role", "main");
        assert_eq!(doc.records_len(), 1);
    }

    #[test]
    fn style_write_records_attribute_mutation() {
        let (mut doc, div) = doc_with_div("a");
        doc.set_style_property(div, "color", "red");
        let records = doc.take_records();
        assert_eq!(
            records,
            vec![MutationRecord {
                target: div,
                kind: MutationKind::Attributes
            }]
        );
        assert_eq!(doc.style_property(div, "color"), Some("red"));
    }

    #[test]
    fn set_inner_html_replaces_content() {
        let (mut doc, div) = doc_with_div("a");
        let text = doc.create_text("before");
        doc.append_child(div, text);
        doc.take_records();

        doc.set_inner_html(div, "<b>x</b>");
        assert_eq!(doc.inner_html(div), "<b>x</b>");
        assert!(!doc.is_connected(text));

        let records = doc.take_records();
        assert_eq!(
            records,
            vec![MutationRecord {
                target: div,
                kind: MutationKind::ChildList
            }]
        );
    }

    #[test]
    fn fragment_parser_handles_nesting_attributes_and_voids() {
        let (mut doc, div) = doc_with_div("a");
        doc.set_inner_html(
            div,
            "<ul class=\"menu\"><li>one</li><li data-k='2'>two</li></ul><br>",
        );
        assert_eq!(
            doc.inner_html(div),
            "<ul class=\"menu\"><li>one</li><li data-k=\"2\">two</li></ul><br>"
        );
    }

    #[test]
    fn fragment_parser_tolerates_stray_close_tags() {
        let (mut doc, div) = doc_with_div("a");
        doc.set_inner_html(div, "</p><span>ok</span>");
        assert_eq!(doc.inner_html(div), "<span>ok</span>");
    }

    #[test]
    fn character_data_recorded_on_text_node() {
        let (mut doc, div) = doc_with_div("a");
        let text = doc.create_text("old");
        doc.append_child(div, text);
        doc.take_records();

        doc.set_text(text, "new");
        let records = doc.take_records();
        assert_eq!(
            records,
            vec![MutationRecord {
                target: text,
                kind: MutationKind::CharacterData
            }]
        );
        assert_eq!(doc.text(text), Some("new"));
    }

    #[test]
    fn truncate_records_drops_only_the_tail() {
        let (mut doc, div) = doc_with_div("a");
        doc.set_attribute(div, "x", "1");
        let mark = doc.records_len();
        doc.set_attribute(div, "y", "2");
        doc.set_attribute(div, "z", "3");
        doc.truncate_records(mark);
        assert_eq!(doc.take_records().len(), 1);
    }

    #[test]
    fn snapshot_is_a_deep_copy() {
        let (mut doc, div) = doc_with_div("a");
        doc.set_inner_html(div, "<em>hi</em>");
        let snapshot = doc.clone_snapshot(div);
        assert_eq!(snapshot.tag.as_deref(), Some("div"));
        assert_eq!(snapshot.children.len(), 1);
        assert_eq!(snapshot.children[0].tag.as_deref(), Some("em"));
        assert_eq!(snapshot.children[0].children[0].text, "hi");
    }

    #[test]
    fn detached_nodes_are_invisible_to_queries() {
        let (mut doc, div) = doc_with_div("a");
        let selector = Selector::parse("#a").unwrap();
        assert_eq!(doc.query_selector(&selector), Some(div));
        doc.remove(div);
        assert_eq!(doc.query_selector(&selector), None);
    }
}
