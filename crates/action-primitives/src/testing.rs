//! In-memory page for exercising the executor without a browser
//!
//! Supports the selector subset the executor itself emits: tag, `#id`,
//! `.class`, `[attr]`, `[attr=value]`, `[attr*=value]`, comma lists and the
//! descendant combinator.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::DomError;
use crate::ports::{DecodedFile, DomEvent, DomPort, DragPhase, Layout, NodeInfo, NodeRef};

/// Description of an element to insert.
#[derive(Clone, Debug)]
pub struct Element {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    value: Option<String>,
    layout: Layout,
    click_handler: bool,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        let tag = tag.to_ascii_lowercase();
        let value = matches!(tag.as_str(), "input" | "textarea").then(String::new);
        Self {
            tag,
            attrs: BTreeMap::new(),
            text: String::new(),
            value,
            layout: Layout::default(),
            click_handler: false,
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn id(self, id: &str) -> Self {
        self.attr("id", id)
    }

    pub fn class(self, class: &str) -> Self {
        self.attr("class", class)
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    /// Give the element a 100x20 box at `(10, 10)`.
    pub fn visible(mut self) -> Self {
        self.layout = Layout {
            x: 10.0,
            y: 10.0,
            width: 100.0,
            height: 20.0,
            client_rects: 1,
            ..Layout::default()
        };
        self
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn on_click(mut self) -> Self {
        self.click_handler = true;
        self
    }
}

#[derive(Debug)]
struct MemNode {
    element: Element,
    parent: Option<usize>,
    children: Vec<usize>,
    selection: Option<(usize, usize)>,
    files: Vec<String>,
    attached: bool,
    rejects_events: bool,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: Vec<MemNode>,
    events: Vec<(usize, String)>,
    native_clicks: Vec<(f64, f64)>,
    native_click_fails: bool,
    rejects_file_lists: bool,
    focused: Option<usize>,
    reveals: HashMap<usize, Vec<(usize, Element)>>,
}

/// Thread-safe DOM tree rooted at a `body` element.
#[derive(Debug)]
pub struct MemoryDom {
    inner: Mutex<Inner>,
}

impl Default for MemoryDom {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDom {
    pub fn new() -> Self {
        let body = MemNode {
            element: Element::new("body").visible(),
            parent: None,
            children: Vec::new(),
            selection: None,
            files: Vec::new(),
            attached: true,
            rejects_events: false,
        };
        Self {
            inner: Mutex::new(Inner {
                nodes: vec![body],
                ..Inner::default()
            }),
        }
    }

    pub fn root(&self) -> NodeRef {
        node_ref(0)
    }

    /// Append `element` under `parent`, returning its handle.
    pub fn append(&self, parent: &NodeRef, element: Element) -> NodeRef {
        let mut inner = self.inner.lock();
        let parent = index_of(parent).unwrap_or(0);
        node_ref(inner.insert(parent, element))
    }

    /// Detach a node (and its subtree) from the document.
    pub fn remove(&self, node: &NodeRef) {
        let mut inner = self.inner.lock();
        if let Ok(index) = inner.index(node) {
            inner.detach(index);
        }
    }

    /// When `trigger` is activated via `click()`, insert `element` under `parent`.
    pub fn reveal_on_activate(&self, trigger: &NodeRef, parent: &NodeRef, element: Element) {
        let (Some(trigger), Some(parent)) = (index_of(trigger), index_of(parent)) else {
            return;
        };
        self.inner
            .lock()
            .reveals
            .entry(trigger)
            .or_default()
            .push((parent, element));
    }

    pub fn fail_native_clicks(&self) {
        self.inner.lock().native_click_fails = true;
    }

    pub fn reject_file_lists(&self) {
        self.inner.lock().rejects_file_lists = true;
    }

    /// Make every synthetic event dispatched to `node` throw.
    pub fn reject_events(&self, node: &NodeRef) {
        let mut inner = self.inner.lock();
        if let Ok(index) = inner.index(node) {
            inner.nodes[index].rejects_events = true;
        }
    }

    /// Event names recorded for `node`, in dispatch order.
    pub fn events(&self, node: &NodeRef) -> Vec<String> {
        let inner = self.inner.lock();
        let Some(index) = index_of(node) else {
            return Vec::new();
        };
        inner
            .events
            .iter()
            .filter(|(target, _)| *target == index)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn value_of(&self, node: &NodeRef) -> Option<String> {
        let inner = self.inner.lock();
        inner.node(node).ok().and_then(|node| node.element.value.clone())
    }

    pub fn text_of(&self, node: &NodeRef) -> String {
        let inner = self.inner.lock();
        index_of(node)
            .map(|index| inner.text_content(index))
            .unwrap_or_default()
    }

    pub fn files_of(&self, node: &NodeRef) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .node(node)
            .map(|node| node.files.clone())
            .unwrap_or_default()
    }

    pub fn focused(&self) -> Option<NodeRef> {
        self.inner.lock().focused.map(node_ref)
    }

    pub fn native_clicks(&self) -> Vec<(f64, f64)> {
        self.inner.lock().native_clicks.clone()
    }
}

fn node_ref(index: usize) -> NodeRef {
    NodeRef(format!("mem-{index}"))
}

fn index_of(node: &NodeRef) -> Option<usize> {
    node.as_str().strip_prefix("mem-")?.parse().ok()
}

impl Inner {
    fn insert(&mut self, parent: usize, element: Element) -> usize {
        let index = self.nodes.len();
        self.nodes.push(MemNode {
            element,
            parent: Some(parent),
            children: Vec::new(),
            selection: None,
            files: Vec::new(),
            attached: true,
            rejects_events: false,
        });
        if let Some(parent) = self.nodes.get_mut(parent) {
            parent.children.push(index);
        }
        index
    }

    fn detach(&mut self, index: usize) {
        if let Some(parent) = self.nodes.get(index).and_then(|node| node.parent) {
            self.nodes[parent].children.retain(|child| *child != index);
        }
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            let node = &mut self.nodes[current];
            node.attached = false;
            stack.extend(node.children.iter().copied());
        }
    }

    fn index(&self, node: &NodeRef) -> Result<usize, DomError> {
        index_of(node)
            .filter(|index| self.nodes.get(*index).is_some_and(|node| node.attached))
            .ok_or_else(|| DomError::StaleNode(node.as_str().to_string()))
    }

    fn node(&self, node: &NodeRef) -> Result<&MemNode, DomError> {
        let index = self.index(node)?;
        Ok(&self.nodes[index])
    }

    fn node_mut(&mut self, node: &NodeRef) -> Result<&mut MemNode, DomError> {
        let index = self.index(node)?;
        Ok(&mut self.nodes[index])
    }

    /// Preorder walk below `start`, `start` excluded.
    fn descendants(&self, start: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.nodes[start].children.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.nodes[current].children.iter().rev().copied());
        }
        out
    }

    fn text_content(&self, index: usize) -> String {
        let mut text = self.nodes[index].element.text.clone();
        for child in self.descendants(index) {
            text.push_str(&self.nodes[child].element.text);
        }
        text
    }

    fn matches(&self, index: usize, selector: &[Compound]) -> bool {
        let Some((last, rest)) = selector.split_last() else {
            return false;
        };
        if !last.matches(&self.nodes[index].element) {
            return false;
        }
        let mut remaining = rest;
        let mut ancestor = self.nodes[index].parent;
        while let Some((wanted, before)) = remaining.split_last() {
            loop {
                let Some(current) = ancestor else {
                    return false;
                };
                ancestor = self.nodes[current].parent;
                if wanted.matches(&self.nodes[current].element) {
                    break;
                }
            }
            remaining = before;
        }
        true
    }

    fn query_all(&self, scope: Option<usize>, selector: &str) -> Result<Vec<usize>, DomError> {
        let list = parse_selector_list(selector)?;
        let candidates = match scope {
            Some(scope) => self.descendants(scope),
            None => std::iter::once(0).chain(self.descendants(0)).collect(),
        };
        Ok(candidates
            .into_iter()
            .filter(|index| list.iter().any(|complex| self.matches(*index, complex)))
            .collect())
    }

    fn record(&mut self, index: usize, name: &str) {
        self.events.push((index, name.to_string()));
    }
}

#[derive(Debug, Default)]
struct Compound {
    tag: Option<String>,
    ids: Vec<String>,
    classes: Vec<String>,
    attrs: Vec<AttrTest>,
}

#[derive(Debug)]
enum AttrTest {
    Present(String),
    Equals(String, String),
    Contains(String, String),
}

impl Compound {
    fn matches(&self, element: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if tag != "*" && *tag != element.tag {
                return false;
            }
        }
        let attr = |name: &str| element.attrs.get(name);
        if !self.ids.iter().all(|id| attr("id") == Some(id)) {
            return false;
        }
        let classes: Vec<&str> = attr("class")
            .map(|class| class.split_whitespace().collect())
            .unwrap_or_default();
        if !self.classes.iter().all(|class| classes.contains(&class.as_str())) {
            return false;
        }
        self.attrs.iter().all(|test| match test {
            AttrTest::Present(name) => attr(name).is_some(),
            AttrTest::Equals(name, value) => attr(name) == Some(value),
            AttrTest::Contains(name, value) => attr(name).is_some_and(|have| have.contains(value.as_str())),
        })
    }
}

fn parse_selector_list(selector: &str) -> Result<Vec<Vec<Compound>>, DomError> {
    let invalid = || DomError::InvalidSelector(selector.to_string());
    let mut list = Vec::new();
    for complex in selector.split(',') {
        let parts: Vec<Compound> = complex
            .split_whitespace()
            .map(parse_compound)
            .collect::<Option<_>>()
            .ok_or_else(invalid)?;
        if parts.is_empty() {
            return Err(invalid());
        }
        list.push(parts);
    }
    Ok(list)
}

fn parse_compound(text: &str) -> Option<Compound> {
    let mut compound = Compound::default();
    let mut rest = text;
    let name_end = rest
        .find(|c: char| matches!(c, '#' | '.' | '['))
        .unwrap_or(rest.len());
    if name_end > 0 {
        let tag = &rest[..name_end];
        if !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '*') {
            return None;
        }
        compound.tag = Some(tag.to_ascii_lowercase());
        rest = &rest[name_end..];
    }
    while !rest.is_empty() {
        let marker = rest.chars().next()?;
        rest = &rest[marker.len_utf8()..];
        match marker {
            '#' | '.' => {
                let end = rest
                    .find(|c: char| matches!(c, '#' | '.' | '['))
                    .unwrap_or(rest.len());
                let name = &rest[..end];
                if name.is_empty() {
                    return None;
                }
                if marker == '#' {
                    compound.ids.push(name.to_string());
                } else {
                    compound.classes.push(name.to_string());
                }
                rest = &rest[end..];
            }
            '[' => {
                let end = rest.find(']')?;
                compound.attrs.push(parse_attr(&rest[..end])?);
                rest = &rest[end + 1..];
            }
            _ => return None,
        }
    }
    Some(compound)
}

fn parse_attr(body: &str) -> Option<AttrTest> {
    let unquote = |value: &str| value.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
    if let Some((name, value)) = body.split_once("*=") {
        return Some(AttrTest::Contains(name.trim().to_ascii_lowercase(), unquote(value)));
    }
    if let Some((name, value)) = body.split_once('=') {
        return Some(AttrTest::Equals(name.trim().to_ascii_lowercase(), unquote(value)));
    }
    let name = body.trim();
    (!name.is_empty()).then(|| AttrTest::Present(name.to_ascii_lowercase()))
}

#[async_trait]
impl DomPort for MemoryDom {
    async fn query_all(
        &self,
        scope: Option<&NodeRef>,
        selector: &str,
    ) -> Result<Vec<NodeRef>, DomError> {
        let inner = self.inner.lock();
        let scope = scope.map(|node| inner.index(node)).transpose()?;
        Ok(inner
            .query_all(scope, selector)?
            .into_iter()
            .map(node_ref)
            .collect())
    }

    async fn closest(&self, node: &NodeRef, selector: &str) -> Result<Option<NodeRef>, DomError> {
        let inner = self.inner.lock();
        let list = parse_selector_list(selector)?;
        let mut current = Some(inner.index(node)?);
        while let Some(index) = current {
            if list.iter().any(|complex| inner.matches(index, complex)) {
                return Ok(Some(node_ref(index)));
            }
            current = inner.nodes[index].parent;
        }
        Ok(None)
    }

    async fn parent(&self, node: &NodeRef) -> Result<Option<NodeRef>, DomError> {
        let inner = self.inner.lock();
        Ok(inner.node(node)?.parent.map(node_ref))
    }

    async fn previous_sibling(&self, node: &NodeRef) -> Result<Option<NodeRef>, DomError> {
        let inner = self.inner.lock();
        let index = inner.index(node)?;
        let Some(parent) = inner.nodes[index].parent else {
            return Ok(None);
        };
        let siblings = &inner.nodes[parent].children;
        let position = siblings.iter().position(|child| *child == index);
        Ok(position
            .and_then(|position| position.checked_sub(1))
            .map(|previous| node_ref(siblings[previous])))
    }

    async fn element_by_id(&self, id: &str) -> Result<Option<NodeRef>, DomError> {
        let inner = self.inner.lock();
        let found = std::iter::once(0)
            .chain(inner.descendants(0))
            .find(|index| inner.nodes[*index].element.attrs.get("id").map(String::as_str) == Some(id));
        Ok(found.map(node_ref))
    }

    async fn describe(&self, node: &NodeRef) -> Result<NodeInfo, DomError> {
        let inner = self.inner.lock();
        let element = &inner.node(node)?.element;
        let attr = |name: &str| element.attrs.get(name).cloned();
        Ok(NodeInfo {
            tag: element.tag.clone(),
            id: attr("id"),
            input_type: attr("type").map(|kind| kind.to_ascii_lowercase()),
            role: attr("role"),
            class_name: attr("class").unwrap_or_default(),
            max_length: attr("maxlength").and_then(|raw| raw.trim().parse().ok()),
            content_editable: attr("contenteditable").as_deref() == Some("true"),
            has_value: element.value.is_some(),
            has_click_handler: element.click_handler,
            html_for: if element.tag == "label" { attr("for") } else { None },
            drop_zone_attr: element.attrs.contains_key("dropzone")
                || element.attrs.contains_key("data-dropzone"),
        })
    }

    async fn text_content(&self, node: &NodeRef) -> Result<String, DomError> {
        let inner = self.inner.lock();
        let index = inner.index(node)?;
        Ok(inner.text_content(index))
    }

    async fn value(&self, node: &NodeRef) -> Result<String, DomError> {
        let inner = self.inner.lock();
        Ok(inner.node(node)?.element.value.clone().unwrap_or_default())
    }

    async fn layout(&self, node: &NodeRef) -> Result<Layout, DomError> {
        let inner = self.inner.lock();
        Ok(inner.node(node)?.element.layout.clone())
    }

    async fn scroll_into_view(&self, node: &NodeRef) -> Result<(), DomError> {
        let mut inner = self.inner.lock();
        let index = inner.index(node)?;
        inner.record(index, "scroll");
        Ok(())
    }

    async fn focus(&self, node: &NodeRef) -> Result<(), DomError> {
        let mut inner = self.inner.lock();
        let index = inner.index(node)?;
        inner.focused = Some(index);
        inner.record(index, "focus");
        Ok(())
    }

    async fn dispatch(&self, node: &NodeRef, event: DomEvent) -> Result<(), DomError> {
        let mut inner = self.inner.lock();
        let index = inner.index(node)?;
        if inner.nodes[index].rejects_events {
            return Err(DomError::Script(format!("{} listener threw", event.name())));
        }
        let name = match &event {
            DomEvent::Key { kind, key, .. } => format!("{kind}:{key}"),
            other => other.name().to_string(),
        };
        inner.record(index, &name);
        Ok(())
    }

    async fn set_value(&self, node: &NodeRef, value: &str) -> Result<(), DomError> {
        let mut inner = self.inner.lock();
        let target = inner.node_mut(node)?;
        target.element.value = Some(value.to_string());
        target.selection = None;
        Ok(())
    }

    async fn set_text(&self, node: &NodeRef, text: &str) -> Result<(), DomError> {
        let mut inner = self.inner.lock();
        let index = inner.index(node)?;
        for child in inner.descendants(index) {
            inner.nodes[child].attached = false;
        }
        let target = &mut inner.nodes[index];
        target.children.clear();
        target.element.text = text.to_string();
        Ok(())
    }

    async fn selection(&self, node: &NodeRef) -> Result<Option<(usize, usize)>, DomError> {
        let inner = self.inner.lock();
        let target = inner.node(node)?;
        if !matches!(target.element.tag.as_str(), "input" | "textarea") {
            return Ok(None);
        }
        let length = target
            .element
            .value
            .as_deref()
            .unwrap_or_default()
            .chars()
            .count();
        Ok(Some(target.selection.unwrap_or((length, length))))
    }

    async fn set_selection(
        &self,
        node: &NodeRef,
        start: usize,
        end: usize,
    ) -> Result<(), DomError> {
        let mut inner = self.inner.lock();
        inner.node_mut(node)?.selection = Some((start, end));
        Ok(())
    }

    async fn activate(&self, node: &NodeRef) -> Result<(), DomError> {
        let mut inner = self.inner.lock();
        let index = inner.index(node)?;
        inner.record(index, "activate");
        if let Some(reveals) = inner.reveals.remove(&index) {
            for (parent, element) in reveals {
                inner.insert(parent, element);
            }
        }
        Ok(())
    }

    async fn assign_files(&self, node: &NodeRef, files: &[DecodedFile]) -> Result<bool, DomError> {
        let mut inner = self.inner.lock();
        if inner.rejects_file_lists {
            return Ok(false);
        }
        let target = inner.node_mut(node)?;
        target.files = files.iter().map(|file| file.name.clone()).collect();
        Ok(true)
    }

    async fn dispatch_drag(
        &self,
        node: &NodeRef,
        phase: DragPhase,
        files: &[DecodedFile],
    ) -> Result<(), DomError> {
        let mut inner = self.inner.lock();
        let index = inner.index(node)?;
        inner.record(index, phase.as_str());
        if phase == DragPhase::Drop {
            inner.nodes[index].files = files.iter().map(|file| file.name.clone()).collect();
        }
        Ok(())
    }

    async fn native_click(&self, x: f64, y: f64) -> Result<(), DomError> {
        let mut inner = self.inner.lock();
        if inner.native_click_fails {
            return Err(DomError::Unavailable("debugger detached".into()));
        }
        inner.native_clicks.push((x, y));
        Ok(())
    }
}
