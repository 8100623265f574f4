//! Field Scanner: walks a host tree (including nested shadow roots) and
//! produces normalized field descriptors.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::detection::dom::HostNode;
use crate::models::field::{FieldDescriptor, FieldKind, UNKNOWN_FIELD_LABEL};

/// Physical identity of an element without a natural id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NodeKey {
    Handle(u64),
    Path(String),
}

/// Scans a host tree for fillable fields.
///
/// Holds the synthesized-id registry, so one scanner must be kept per session
/// for synthesized ids to stay stable across re-scans.
#[derive(Debug, Default)]
pub struct FieldScanner {
    container_id: Option<String>,
    synthesized: HashMap<NodeKey, String>,
}

impl FieldScanner {
    /// `container_id` names the element whose subtree is scanned. `None` scans
    /// the whole tree.
    pub fn new(container_id: Option<String>) -> Self {
        Self {
            container_id,
            synthesized: HashMap::new(),
        }
    }

    /// Returns every visible recognized field below the container.
    /// An absent container yields an empty list.
    pub fn scan<N: HostNode>(&mut self, document: &N) -> Vec<FieldDescriptor> {
        let (root, root_path) = match &self.container_id {
            Some(id) => match find_container(document, id, String::from("r")) {
                Some(found) => found,
                None => {
                    debug!("Scan container '{id}' not mounted yet");
                    return Vec::new();
                }
            },
            None => (document, String::from("r")),
        };

        let mut fields = Vec::new();
        self.scan_scope(std::slice::from_ref(root), &root_path, true, &mut fields);
        fields
    }

    /// Scans one tree scope. Labels only associate with fields in the same scope.
    fn scan_scope<N: HostNode>(
        &mut self,
        nodes: &[N],
        base_path: &str,
        is_root: bool,
        out: &mut Vec<FieldDescriptor>,
    ) {
        let mut labels = HashMap::new();
        for node in nodes {
            collect_labels(node, &mut labels);
        }

        for (i, node) in nodes.iter().enumerate() {
            let path = if is_root {
                base_path.to_string()
            } else {
                format!("{base_path}/{i}")
            };
            self.visit(node, &path, &labels, out);
        }
    }

    fn visit<N: HostNode>(
        &mut self,
        node: &N,
        path: &str,
        labels: &HashMap<String, String>,
        out: &mut Vec<FieldDescriptor>,
    ) {
        if let Some(kind) = recognize(node) {
            if !node.style().is_hidden() {
                let descriptor = FieldDescriptor {
                    id: self.resolve_id(node, path),
                    kind,
                    label: resolve_label(node, labels),
                    geometry: node.bounding_box(),
                    options: node.options(),
                };
                out.push(descriptor);
            }
        }

        for (i, child) in node.children().iter().enumerate() {
            self.visit(child, &format!("{path}/{i}"), labels, out);
        }

        if let Some(shadow) = node.shadow_root() {
            self.scan_scope(shadow, &format!("{path}/s"), false, out);
        }
    }

    fn resolve_id<N: HostNode>(&mut self, node: &N, path: &str) -> String {
        if let Some(id) = node.attr("id").map(str::trim).filter(|id| !id.is_empty()) {
            return id.to_string();
        }
        let key = match node.handle() {
            Some(handle) => NodeKey::Handle(handle),
            None => NodeKey::Path(path.to_string()),
        };
        self.synthesized
            .entry(key)
            .or_insert_with(|| {
                let suffix = Uuid::new_v4().simple().to_string();
                format!("ext-field-{}", &suffix[..9])
            })
            .clone()
    }
}

/// Returns the field kind when `node` matches the recognized selector set.
fn recognize<N: HostNode>(node: &N) -> Option<FieldKind> {
    let tag = node.tag().to_ascii_lowercase();
    match tag.as_str() {
        "input" => {
            let input_type = node.attr("type").unwrap_or("");
            if input_type.eq_ignore_ascii_case("hidden") {
                None
            } else {
                Some(FieldKind::from_input_type(input_type))
            }
        }
        "select" => Some(FieldKind::Select),
        "textarea" => Some(FieldKind::Textarea),
        _ if node.attr("role").is_some_and(|r| r.eq_ignore_ascii_case("textbox")) => {
            Some(FieldKind::AriaTextbox)
        }
        _ if node
            .attr("contenteditable")
            .is_some_and(|c| c.eq_ignore_ascii_case("true")) =>
        {
            Some(FieldKind::ContentEditable)
        }
        _ => None,
    }
}

/// Priority: `label[for]` → aria-label → placeholder → name → title → fallback.
fn resolve_label<N: HostNode>(node: &N, labels: &HashMap<String, String>) -> String {
    let associated = node
        .attr("id")
        .and_then(|id| labels.get(id))
        .map(|text| text.trim())
        .filter(|text| !text.is_empty());
    if let Some(text) = associated {
        return text.to_string();
    }

    ["aria-label", "placeholder", "name", "title"]
        .iter()
        .filter_map(|attr| node.attr(attr))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_FIELD_LABEL)
        .to_string()
}

/// Collects `label[for]` text in one scope; does not cross shadow boundaries.
fn collect_labels<N: HostNode>(node: &N, labels: &mut HashMap<String, String>) {
    if node.tag().eq_ignore_ascii_case("label") {
        if let (Some(target), Some(text)) = (node.attr("for"), node.text()) {
            labels
                .entry(target.to_string())
                .or_insert_with(|| text.trim().to_string());
        }
    }
    for child in node.children() {
        collect_labels(child, labels);
    }
}

/// Locates the container element and the structural path leading to it.
fn find_container<'a, N: HostNode>(node: &'a N, id: &str, path: String) -> Option<(&'a N, String)> {
    if node.attr("id") == Some(id) {
        return Some((node, path));
    }
    for (i, child) in node.children().iter().enumerate() {
        if let Some(found) = find_container(child, id, format!("{path}/{i}")) {
            return Some(found);
        }
    }
    if let Some(shadow) = node.shadow_root() {
        for (i, child) in shadow.iter().enumerate() {
            if let Some(found) = find_container(child, id, format!("{path}/s/{i}")) {
                return Some(found);
            }
        }
    }
    None
}
