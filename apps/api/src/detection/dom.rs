//! Host tree abstraction.
//!
//! The scanner only needs a handful of questions answered about each node, so
//! any host UI tree (browser DOM snapshot, native accessibility tree, virtual
//! DOM) can be scanned by implementing [`HostNode`]. Shadow roots generalize
//! to "an opaque nested tree attached to an element".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::field::{Geometry, SelectOption};

/// Computed presentation state relevant to visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputedStyle {
    pub display: String,
    pub visibility: String,
    pub opacity: f64,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: "block".to_string(),
            visibility: "visible".to_string(),
            opacity: 1.0,
        }
    }
}

impl ComputedStyle {
    pub fn is_hidden(&self) -> bool {
        self.display.eq_ignore_ascii_case("none")
            || self.visibility.eq_ignore_ascii_case("hidden")
            || self.opacity <= 0.0
    }
}

pub trait HostNode: Sized {
    fn tag(&self) -> &str;
    fn attr(&self, name: &str) -> Option<&str>;
    /// Concatenated text content, used for `<label>` elements.
    fn text(&self) -> Option<&str>;
    fn style(&self) -> ComputedStyle;
    fn bounding_box(&self) -> Option<Geometry>;
    fn children(&self) -> &[Self];
    /// Root of a nested encapsulated tree attached to this element, if any.
    fn shadow_root(&self) -> Option<&[Self]>;
    fn options(&self) -> Vec<SelectOption>;
    /// Stable physical identity supplied by the host, if it has one.
    fn handle(&self) -> Option<u64>;
}

/// Serializable snapshot of a browser DOM subtree, as posted by the extension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomNode {
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub text: Option<String>,
    pub style: Option<ComputedStyle>,
    pub rect: Option<Geometry>,
    pub children: Vec<DomNode>,
    pub shadow_root: Option<Vec<DomNode>>,
    pub options: Vec<SelectOption>,
    pub handle: Option<u64>,
}

impl DomNode {
    pub fn element(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn with_child(mut self, child: DomNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_shadow(mut self, nodes: Vec<DomNode>) -> Self {
        self.shadow_root = Some(nodes);
        self
    }

    pub fn with_style(mut self, style: ComputedStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn with_rect(mut self, rect: Geometry) -> Self {
        self.rect = Some(rect);
        self
    }
}

impl HostNode for DomNode {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    fn style(&self) -> ComputedStyle {
        self.style.clone().unwrap_or_default()
    }

    fn bounding_box(&self) -> Option<Geometry> {
        self.rect
    }

    fn children(&self) -> &[Self] {
        &self.children
    }

    fn shadow_root(&self) -> Option<&[Self]> {
        self.shadow_root.as_deref()
    }

    fn options(&self) -> Vec<SelectOption> {
        self.options.clone()
    }

    fn handle(&self) -> Option<u64> {
        self.handle
    }
}
