//! Page access seam for the executor
//!
//! The executor never touches a browser directly. Everything it needs from
//! the target page goes through [`DomPort`], which a CDP-backed page and the
//! in-memory test DOM both implement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DomError;

/// Opaque handle to an element inside the page.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef(pub String);

impl NodeRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Static facts about an element used by the locator heuristics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeInfo {
    /// Lowercase tag name
    pub tag: String,
    pub id: Option<String>,
    /// Lowercase `type` attribute as written (absent when missing)
    pub input_type: Option<String>,
    pub role: Option<String>,
    pub class_name: String,
    pub max_length: Option<i64>,
    /// `contenteditable="true"`
    pub content_editable: bool,
    /// The element exposes a `value` property
    pub has_value: bool,
    /// An `onclick` handler function is attached
    pub has_click_handler: bool,
    /// `for` attribute of a label
    pub html_for: Option<String>,
    /// `dropzone` or `data-dropzone` attribute present
    pub drop_zone_attr: bool,
}

impl NodeInfo {
    pub fn element(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            ..Self::default()
        }
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.class_name.split_whitespace()
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes().any(|class| class == name)
    }

    pub fn is_text_control(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "textarea")
    }

    /// `input,textarea,[contenteditable="true"]` or anything with a value property.
    pub fn is_editable(&self) -> bool {
        self.is_text_control() || self.content_editable || self.has_value
    }

    pub fn is_file_input(&self) -> bool {
        self.tag == "input" && self.input_type.as_deref() == Some("file")
    }
}

/// Bounding box plus the computed style bits visibility depends on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Layout {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub display: String,
    pub visibility: String,
    pub opacity: String,
    pub client_rects: usize,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            display: "block".into(),
            visibility: "visible".into(),
            opacity: "1".into(),
            client_rects: 0,
        }
    }
}

impl Layout {
    /// Click point; degenerate boxes still get a point one pixel in.
    pub fn center(&self) -> (f64, f64) {
        (
            self.x + self.width.max(1.0) / 2.0,
            self.y + self.height.max(1.0) / 2.0,
        )
    }

    pub fn is_visible(&self) -> bool {
        self.width > 0.0
            && self.height > 0.0
            && self.display != "none"
            && self.visibility != "hidden"
            && self.opacity != "0"
            && self.client_rects > 0
    }
}

/// Synthetic events the executor dispatches. All bubble; pointer, mouse and
/// key events are cancelable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DomEvent {
    Pointer { kind: String, x: f64, y: f64 },
    Mouse { kind: String, x: f64, y: f64 },
    Key {
        kind: String,
        key: String,
        code: Option<String>,
    },
    BeforeInput {
        #[serde(rename = "inputType")]
        input_type: String,
        data: String,
    },
    Input,
    Change,
}

impl DomEvent {
    pub fn pointer(kind: &str, (x, y): (f64, f64)) -> Self {
        Self::Pointer {
            kind: kind.into(),
            x,
            y,
        }
    }

    pub fn mouse(kind: &str, (x, y): (f64, f64)) -> Self {
        Self::Mouse {
            kind: kind.into(),
            x,
            y,
        }
    }

    pub fn key(kind: &str, key: &str, code: Option<String>) -> Self {
        Self::Key {
            kind: kind.into(),
            key: key.into(),
            code,
        }
    }

    pub fn before_input(input_type: &str, data: &str) -> Self {
        Self::BeforeInput {
            input_type: input_type.into(),
            data: data.into(),
        }
    }

    /// DOM event type name.
    pub fn name(&self) -> &str {
        match self {
            DomEvent::Pointer { kind, .. }
            | DomEvent::Mouse { kind, .. }
            | DomEvent::Key { kind, .. } => kind,
            DomEvent::BeforeInput { .. } => "beforeinput",
            DomEvent::Input => "input",
            DomEvent::Change => "change",
        }
    }
}

/// Drag phases used by the drop-zone fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DragPhase {
    DragEnter,
    DragOver,
    Drop,
    DragLeave,
}

impl DragPhase {
    pub const SEQUENCE: [DragPhase; 4] = [
        DragPhase::DragEnter,
        DragPhase::DragOver,
        DragPhase::Drop,
        DragPhase::DragLeave,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DragPhase::DragEnter => "dragenter",
            DragPhase::DragOver => "dragover",
            DragPhase::Drop => "drop",
            DragPhase::DragLeave => "dragleave",
        }
    }
}

/// A file rebuilt from its data URL, ready for a file input or drop event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Operations the executor performs against the live page.
///
/// `scope: None` means the whole document. Implementations report page-side
/// exceptions as [`DomError`]; the executor converts them into failed outcomes.
#[async_trait]
pub trait DomPort: Send + Sync {
    async fn query_all(
        &self,
        scope: Option<&NodeRef>,
        selector: &str,
    ) -> Result<Vec<NodeRef>, DomError>;

    async fn query(
        &self,
        scope: Option<&NodeRef>,
        selector: &str,
    ) -> Result<Option<NodeRef>, DomError> {
        Ok(self.query_all(scope, selector).await?.into_iter().next())
    }

    async fn closest(&self, node: &NodeRef, selector: &str) -> Result<Option<NodeRef>, DomError>;

    async fn parent(&self, node: &NodeRef) -> Result<Option<NodeRef>, DomError>;

    async fn previous_sibling(&self, node: &NodeRef) -> Result<Option<NodeRef>, DomError>;

    async fn element_by_id(&self, id: &str) -> Result<Option<NodeRef>, DomError>;

    async fn describe(&self, node: &NodeRef) -> Result<NodeInfo, DomError>;

    async fn text_content(&self, node: &NodeRef) -> Result<String, DomError>;

    async fn value(&self, node: &NodeRef) -> Result<String, DomError>;

    async fn layout(&self, node: &NodeRef) -> Result<Layout, DomError>;

    async fn scroll_into_view(&self, node: &NodeRef) -> Result<(), DomError>;

    async fn focus(&self, node: &NodeRef) -> Result<(), DomError>;

    async fn dispatch(&self, node: &NodeRef, event: DomEvent) -> Result<(), DomError>;

    /// Assign `value` through the prototype setter so framework wrappers see it.
    async fn set_value(&self, node: &NodeRef, value: &str) -> Result<(), DomError>;

    async fn set_text(&self, node: &NodeRef, text: &str) -> Result<(), DomError>;

    /// Current `(selectionStart, selectionEnd)` if the element tracks one.
    async fn selection(&self, node: &NodeRef) -> Result<Option<(usize, usize)>, DomError>;

    async fn set_selection(&self, node: &NodeRef, start: usize, end: usize)
        -> Result<(), DomError>;

    /// `element.click()`
    async fn activate(&self, node: &NodeRef) -> Result<(), DomError>;

    /// Replace the input's file list. `false` when the page ignores the assignment.
    async fn assign_files(&self, node: &NodeRef, files: &[DecodedFile]) -> Result<bool, DomError>;

    async fn dispatch_drag(
        &self,
        node: &NodeRef,
        phase: DragPhase,
        files: &[DecodedFile],
    ) -> Result<(), DomError>;

    /// Trusted click at viewport coordinates, issued from outside the page.
    async fn native_click(&self, x: f64, y: f64) -> Result<(), DomError>;
}
