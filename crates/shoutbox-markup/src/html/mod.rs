//! Tolerant parser for the HTML dialect the forum emits.
//!
//! The forum renders chat markup into a small, fixed tag vocabulary, so
//! this is not a general HTML5 engine: it is a recovering fragment
//! parser in the same spirit as the wire parsers elsewhere in the
//! workspace. Parsing never fails; malformed input degrades to text or
//! is dropped.

mod lexer;

pub use lexer::{Lexer, Token, decode_entities};

/// A parsed HTML node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtmlNode {
    /// An element with attributes and children.
    Element(HtmlElement),
    /// A run of character data.
    Text(String),
}

/// A parsed HTML element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlElement {
    /// Lowercased tag name.
    pub name: String,
    /// Attributes in source order, names lowercased.
    pub attrs: Vec<(String, String)>,
    /// Ordered child nodes.
    pub children: Vec<HtmlNode>,
}

impl HtmlElement {
    /// Returns the value of the named attribute, if present.
    ///
    /// A valueless attribute yields `Some("")`, distinct from an absent
    /// one.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(attr_name, _)| attr_name == name)
            .map(|(_, value)| value.as_str())
    }

    /// Concatenates all text descendants.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    /// Returns the element children, skipping text nodes.
    pub fn child_elements(&self) -> impl Iterator<Item = &HtmlElement> {
        self.children.iter().filter_map(|child| match child {
            HtmlNode::Element(el) => Some(el),
            HtmlNode::Text(_) => None,
        })
    }

    /// Depth-first search for the first descendant element matching the
    /// predicate.
    pub fn find<'a>(&'a self, pred: &impl Fn(&HtmlElement) -> bool) -> Option<&'a HtmlElement> {
        for child in self.child_elements() {
            if pred(child) {
                return Some(child);
            }
            if let Some(found) = child.find(pred) {
                return Some(found);
            }
        }
        None
    }

    /// Depth-first collection of all descendant elements matching the
    /// predicate.
    pub fn find_all<'a>(
        &'a self,
        pred: &impl Fn(&HtmlElement) -> bool,
        out: &mut Vec<&'a HtmlElement>,
    ) {
        for child in self.child_elements() {
            if pred(child) {
                out.push(child);
            }
            child.find_all(pred, out);
        }
    }
}

fn collect_text(nodes: &[HtmlNode], out: &mut String) {
    for node in nodes {
        match node {
            HtmlNode::Element(el) => collect_text(&el.children, out),
            HtmlNode::Text(text) => out.push_str(text),
        }
    }
}

/// Depth-first search over a node sequence for the first element
/// matching the predicate.
#[must_use]
pub fn find_in<'a>(
    nodes: &'a [HtmlNode],
    pred: &impl Fn(&HtmlElement) -> bool,
) -> Option<&'a HtmlElement> {
    for node in nodes {
        if let HtmlNode::Element(el) = node {
            if pred(el) {
                return Some(el);
            }
            if let Some(found) = el.find(pred) {
                return Some(found);
            }
        }
    }
    None
}

/// Depth-first collection over a node sequence of all elements matching
/// the predicate.
#[must_use]
pub fn find_all_in<'a>(
    nodes: &'a [HtmlNode],
    pred: &impl Fn(&HtmlElement) -> bool,
) -> Vec<&'a HtmlElement> {
    let mut out = Vec::new();
    for node in nodes {
        if let HtmlNode::Element(el) = node {
            if pred(el) {
                out.push(el);
            }
            el.find_all(pred, &mut out);
        }
    }
    out
}

/// Serializes nodes back into HTML text.
///
/// Text is entity-escaped, with everything past printable ASCII emitted
/// as a numeric character reference, so the output is a stable
/// byte-for-byte comparison key for change detection regardless of how
/// the page spelled its entities.
#[must_use]
pub fn to_html(nodes: &[HtmlNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_html(node, &mut out);
    }
    out
}

fn write_html(node: &HtmlNode, out: &mut String) {
    match node {
        HtmlNode::Text(text) => escape_into(text, out),
        HtmlNode::Element(el) => {
            out.push('<');
            out.push_str(&el.name);
            for (name, value) in &el.attrs {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                escape_into(value, out);
                out.push('"');
            }
            if is_void(&el.name) {
                out.push_str(" />");
                return;
            }
            out.push('>');
            for child in &el.children {
                write_html(child, out);
            }
            out.push_str("</");
            out.push_str(&el.name);
            out.push('>');
        }
    }
}

fn escape_into(text: &str, out: &mut String) {
    use std::fmt::Write as _;
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if c > '\u{7e}' => {
                let _ = write!(out, "&#{};", u32::from(c));
            }
            c => out.push(c),
        }
    }
}

/// Elements that never take children.
fn is_void(name: &str) -> bool {
    matches!(name, "br" | "img" | "hr" | "input" | "meta" | "link")
}

/// Parses an HTML fragment into a node sequence.
#[must_use]
pub fn parse_fragment(input: &str) -> Vec<HtmlNode> {
    let mut lexer = Lexer::new(input);
    // Stack of open elements; index 0 is a synthetic root.
    let mut stack: Vec<HtmlElement> = vec![HtmlElement {
        name: String::new(),
        attrs: Vec::new(),
        children: Vec::new(),
    }];

    loop {
        match lexer.next_token() {
            Token::Eof => break,
            Token::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.children.push(HtmlNode::Text(text));
                }
            }
            Token::StartTag {
                name,
                attrs,
                self_closing,
            } => {
                let element = HtmlElement {
                    name: name.clone(),
                    attrs,
                    children: Vec::new(),
                };
                if self_closing || is_void(&name) {
                    if let Some(top) = stack.last_mut() {
                        top.children.push(HtmlNode::Element(element));
                    }
                } else {
                    stack.push(element);
                }
            }
            Token::EndTag(name) => {
                // Close up to the nearest matching open element; an end
                // tag with no match is ignored.
                let Some(open_idx) = stack.iter().rposition(|el| el.name == name) else {
                    continue;
                };
                if open_idx == 0 {
                    continue;
                }
                while stack.len() > open_idx {
                    // Stack length is checked above, pop cannot fail.
                    if let Some(closed) = stack.pop()
                        && let Some(parent) = stack.last_mut()
                    {
                        parent.children.push(HtmlNode::Element(closed));
                    }
                }
            }
        }
    }

    // Unclosed elements fold back into their parents.
    while stack.len() > 1 {
        if let Some(closed) = stack.pop()
            && let Some(parent) = stack.last_mut()
        {
            parent.children.push(HtmlNode::Element(closed));
        }
    }

    stack.pop().map(|root| root.children).unwrap_or_default()
}
