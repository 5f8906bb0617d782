//! The markup tree and its serialization.

use std::fmt::Write as _;

/// A node of the decompiled markup tree.
///
/// A message body is an ordered sequence of nodes; every container keeps
/// its children in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupNode {
    /// A tag-like container: `[name]…[/name]` or `[name=attr]…[/name]`.
    Element {
        /// Tag name (`b`, `url`, `quote`, …).
        name: String,
        /// Ordered child nodes.
        children: Vec<MarkupNode>,
        /// The single associated value (URL, color, quote attribution)
        /// when the element kind carries one.
        attribute: Option<String>,
    },
    /// A bullet item: `[*]…` with no closing tag.
    ListItem {
        /// Ordered child nodes.
        children: Vec<MarkupNode>,
    },
    /// Literal text.
    Text(String),
    /// Text derived from a smiley image; keeps the source URL so
    /// consumers re-rendering to HTML can restore the image.
    SmileyText {
        /// The smiley symbol, e.g. `:)`.
        text: String,
        /// The image URL the symbol was derived from.
        source_url: String,
    },
}

impl MarkupNode {
    /// Creates an element without an attribute.
    #[must_use]
    pub fn element(name: impl Into<String>, children: Vec<MarkupNode>) -> Self {
        Self::Element {
            name: name.into(),
            children,
            attribute: None,
        }
    }

    /// Creates an element with an attribute value.
    #[must_use]
    pub fn element_with(
        name: impl Into<String>,
        children: Vec<MarkupNode>,
        attribute: impl Into<String>,
    ) -> Self {
        Self::Element {
            name: name.into(),
            children,
            attribute: Some(attribute.into()),
        }
    }

    /// Creates a text node.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Returns true for `Text` and `SmileyText` nodes.
    #[must_use]
    pub const fn is_textual(&self) -> bool {
        matches!(self, Self::Text(_) | Self::SmileyText { .. })
    }
}

/// Renders a node sequence back into chat markup.
///
/// Text content is emitted verbatim; use [`verbatim_serialize`] when the
/// output must not be reparseable as markup.
#[must_use]
pub fn serialize(nodes: &[MarkupNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_node(&mut out, node, false);
    }
    out
}

/// Renders a node sequence with every structurally significant opening
/// bracket neutralized.
///
/// Literal `[` in text and attribute values is wrapped as
/// `[noparse][[/noparse]`, so echoing untrusted content back through the
/// posting path can never be reinterpreted as markup.
#[must_use]
pub fn verbatim_serialize(nodes: &[MarkupNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_node(&mut out, node, true);
    }
    out
}

/// Concatenates all textual leaves, recursively.
#[must_use]
pub fn plain_text(nodes: &[MarkupNode]) -> String {
    let mut out = String::new();
    collect_text(nodes, &mut out);
    out
}

fn collect_text(nodes: &[MarkupNode], out: &mut String) {
    for node in nodes {
        match node {
            MarkupNode::Element { children, .. } | MarkupNode::ListItem { children } => {
                collect_text(children, out);
            }
            MarkupNode::Text(value) | MarkupNode::SmileyText { text: value, .. } => {
                out.push_str(value);
            }
        }
    }
}

fn write_node(out: &mut String, node: &MarkupNode, verbatim: bool) {
    match node {
        MarkupNode::Element {
            name,
            children,
            attribute,
        } => {
            match attribute {
                Some(attr) => {
                    out.push('[');
                    out.push_str(name);
                    out.push('=');
                    write_text(out, attr, verbatim);
                    out.push(']');
                }
                None => {
                    let _ = write!(out, "[{name}]");
                }
            }
            for child in children {
                write_node(out, child, verbatim);
            }
            let _ = write!(out, "[/{name}]");
        }
        MarkupNode::ListItem { children } => {
            out.push_str("[*]");
            for child in children {
                write_node(out, child, verbatim);
            }
        }
        MarkupNode::Text(value) | MarkupNode::SmileyText { text: value, .. } => {
            write_text(out, value, verbatim);
        }
    }
}

fn write_text(out: &mut String, value: &str, verbatim: bool) {
    if !verbatim {
        out.push_str(value);
        return;
    }
    for c in value.chars() {
        if c == '[' {
            out.push_str("[noparse][[/noparse]");
        } else {
            out.push(c);
        }
    }
}

/// Merges adjacent `Text` nodes into one, recursively.
///
/// Decompilation and trigger splitting can produce runs of plain text
/// fragments; consumers rely on one `Text` node per run so pattern
/// matching over node values stays well-defined. `SmileyText` is never
/// merged, it carries a distinct source URL.
#[must_use]
pub fn coalesce(nodes: Vec<MarkupNode>) -> Vec<MarkupNode> {
    let mut out: Vec<MarkupNode> = Vec::with_capacity(nodes.len());
    for node in nodes {
        let node = match node {
            MarkupNode::Element {
                name,
                children,
                attribute,
            } => MarkupNode::Element {
                name,
                children: coalesce(children),
                attribute,
            },
            MarkupNode::ListItem { children } => MarkupNode::ListItem {
                children: coalesce(children),
            },
            other => other,
        };
        match (out.last_mut(), &node) {
            (Some(MarkupNode::Text(prev)), MarkupNode::Text(next)) => {
                prev.push_str(next);
            }
            _ => out.push(node),
        }
    }
    out
}
