//! Decompiles forum-rendered HTML back into the markup tree.

use crate::html::{HtmlElement, HtmlNode, parse_fragment};
use crate::node::{MarkupNode, coalesce};
use crate::smiley::SmileyTable;

/// Inline style tags mapped straight to an element of the same meaning.
const INLINE_TAGS: &[(&str, &str)] = &[
    ("b", "b"),
    ("i", "i"),
    ("u", "u"),
    ("s", "s"),
    ("strike", "s"),
    ("sub", "sub"),
    ("sup", "sup"),
];

/// The exact right-to-left override style the forum emits for `[flip]`.
const FLIP_STYLE: &str = "direction: rtl; unicode-bidi: bidi-override;";

/// Exact div styles the forum emits for alignment and indentation.
const DIV_STYLES: &[(&str, &str)] = &[
    ("margin-left:40px", "indent"),
    ("text-align: left;", "left"),
    ("text-align: center;", "center"),
    ("text-align: right;", "right"),
];

/// The exact style of the spoiler container div.
const SPOILER_STYLE: &str = "margin: 5px; padding: 5px; background-color: #e5e5e5;";

/// Class of the code block container div.
const CODE_CLASS: &str = "code_container";

/// Class of the quote block container div.
const QUOTE_CLASS: &str = "quote_container";

/// Class of the quoted-message payload div inside a quote block.
const QUOTE_MESSAGE_CLASS: &str = "message";

/// Class the forum puts on decimal-numbered ordered lists.
const DECIMAL_LIST_CLASS: &str = "decimal";

/// URL pieces identifying quote metadata links.
const POSTER_URL_PIECE: &str = "member.php?u=";
const POST_URL_PIECE: &str = "showthread.php?p=";

/// Placeholder text carried by video elements.
const VIDEO_PLACEHOLDER: &str = "(video)";

/// Decompiles a constrained HTML dialect into the markup tree.
///
/// Borrows the smiley table so the caller stays the single owner of
/// that state; the decompiler itself is a pure function of its inputs.
#[derive(Debug, Clone, Copy)]
pub struct HtmlDecompiler<'a> {
    smilies: &'a SmileyTable,
    math_prefix: Option<&'a str>,
}

impl<'a> HtmlDecompiler<'a> {
    /// Creates a decompiler over the given smiley table.
    #[must_use]
    pub const fn new(smilies: &'a SmileyTable) -> Self {
        Self {
            smilies,
            math_prefix: None,
        }
    }

    /// Treats image URLs under this prefix as inline math, the
    /// remainder of the URL being the math source.
    #[must_use]
    pub const fn with_math_prefix(mut self, prefix: &'a str) -> Self {
        self.math_prefix = Some(prefix);
        self
    }

    /// Parses and decompiles an HTML fragment.
    #[must_use]
    pub fn decompile_fragment(&self, html: &str) -> Vec<MarkupNode> {
        self.decompile(&parse_fragment(html))
    }

    /// Decompiles parsed HTML nodes into a coalesced markup tree.
    #[must_use]
    pub fn decompile(&self, nodes: &[HtmlNode]) -> Vec<MarkupNode> {
        coalesce(self.decompile_nodes(nodes))
    }

    fn decompile_nodes(&self, nodes: &[HtmlNode]) -> Vec<MarkupNode> {
        let mut out = Vec::new();
        for node in nodes {
            match node {
                HtmlNode::Text(text) => self.split_text(text, &mut out),
                HtmlNode::Element(el) => self.decompile_element(el, &mut out),
            }
        }
        out
    }

    #[allow(clippy::too_many_lines)]
    fn decompile_element(&self, el: &HtmlElement, out: &mut Vec<MarkupNode>) {
        match el.name.as_str() {
            "img" => {
                if let Some(src) = el.attr("src") {
                    out.push(self.decompile_image(src));
                    return;
                }
            }
            "a" => {
                if let Some(href) = el.attr("href") {
                    self.decompile_anchor(el, href, out);
                    return;
                }
            }
            "font" => {
                if let Some(color) = el.attr("color") {
                    out.push(MarkupNode::element_with(
                        "color",
                        self.decompile_nodes(&el.children),
                        color,
                    ));
                    return;
                }
            }
            "span" => {
                if self.decompile_span(el, out) {
                    return;
                }
            }
            "div" => {
                if self.decompile_div(el, out) {
                    return;
                }
            }
            "ul" => {
                out.push(MarkupNode::element(
                    "list",
                    self.decompile_nodes(&el.children),
                ));
                return;
            }
            "ol" => {
                if el.attr("class") == Some(DECIMAL_LIST_CLASS) {
                    out.push(MarkupNode::element_with(
                        "list",
                        self.decompile_nodes(&el.children),
                        "1",
                    ));
                    return;
                }
            }
            "li" => {
                // Only the plain chatbox list item shape is supported.
                if el.attr("style") == Some("") {
                    out.push(MarkupNode::ListItem {
                        children: self.decompile_nodes(&el.children),
                    });
                    return;
                }
            }
            "iframe" => {
                if let Some(src) = el.attr("src")
                    && let Some(video_id) = youtube_embed_id(src)
                {
                    out.push(MarkupNode::element_with(
                        "video",
                        vec![MarkupNode::text(VIDEO_PLACEHOLDER)],
                        format!("youtube;{video_id}"),
                    ));
                    return;
                }
            }
            "br" => {
                out.push(MarkupNode::text("\n"));
                return;
            }
            name if INLINE_TAGS.iter().any(|(tag, _)| *tag == name) => {
                let mapped = INLINE_TAGS
                    .iter()
                    .find(|(tag, _)| *tag == name)
                    .map_or(name, |(_, mapped)| *mapped);
                out.push(MarkupNode::element(
                    mapped,
                    self.decompile_nodes(&el.children),
                ));
                return;
            }
            _ => {}
        }

        // Everything else, including recognized tags with unexpected
        // attribute shapes, is lossy fallout rather than an error.
        tracing::warn!(element = %el.name, "skipping unrecognized HTML element");
    }

    fn decompile_image(&self, src: &str) -> MarkupNode {
        if let Some(symbol) = self.smilies.symbol_for_url(src) {
            return MarkupNode::SmileyText {
                text: symbol.to_owned(),
                source_url: src.to_owned(),
            };
        }
        if let Some(prefix) = self.math_prefix
            && let Some(math_source) = src.strip_prefix(prefix)
        {
            return MarkupNode::element("tex", vec![MarkupNode::text(math_source)]);
        }
        MarkupNode::element("icon", vec![MarkupNode::text(src)])
    }

    fn decompile_anchor(&self, el: &HtmlElement, href: &str, out: &mut Vec<MarkupNode>) {
        if let Some(address) = href.strip_prefix("mailto:") {
            out.push(MarkupNode::element_with(
                "email",
                self.decompile_nodes(&el.children),
                address,
            ));
            return;
        }

        // An anchor that merely wraps its own image is an icon link;
        // collapse it to the image's decompilation.
        if el.children.len() == 1
            && let HtmlNode::Element(child) = &el.children[0]
            && child.name == "img"
            && child.attr("src") == Some(href)
        {
            out.extend(self.decompile_nodes(&el.children));
            return;
        }

        out.push(MarkupNode::element_with(
            "url",
            self.decompile_nodes(&el.children),
            href,
        ));
    }

    /// Returns true if the span was recognized and emitted.
    fn decompile_span(&self, el: &HtmlElement, out: &mut Vec<MarkupNode>) -> bool {
        if let Some(style) = el.attr("style") {
            if style == FLIP_STYLE {
                out.push(MarkupNode::element(
                    "flip",
                    self.decompile_nodes(&el.children),
                ));
                return true;
            }
            if let Some(family) = style.strip_prefix("font-family: ") {
                let family = family.trim_end_matches(';').trim();
                out.push(MarkupNode::element_with(
                    "font",
                    self.decompile_nodes(&el.children),
                    family,
                ));
                return true;
            }
            return false;
        }
        match el.attr("class") {
            Some("highlight") => {
                out.push(MarkupNode::element(
                    "highlight",
                    self.decompile_nodes(&el.children),
                ));
                true
            }
            Some("irony") => {
                out.push(MarkupNode::element(
                    "irony",
                    self.decompile_nodes(&el.children),
                ));
                true
            }
            _ => false,
        }
    }

    /// Returns true if the div was recognized and emitted.
    fn decompile_div(&self, el: &HtmlElement, out: &mut Vec<MarkupNode>) -> bool {
        if let Some(style) = el.attr("style") {
            if let Some((_, name)) = DIV_STYLES.iter().find(|(known, _)| *known == style) {
                out.push(MarkupNode::element(
                    *name,
                    self.decompile_nodes(&el.children),
                ));
                return true;
            }
            if style == SPOILER_STYLE {
                return self.decompile_spoiler(el, out);
            }
            return false;
        }
        match el.attr("class") {
            Some(CODE_CLASS) => {
                let payload = el
                    .find(&|child| child.name == "pre")
                    .map(HtmlElement::text)
                    .unwrap_or_default();
                out.push(MarkupNode::element("code", vec![MarkupNode::text(payload)]));
                true
            }
            Some(QUOTE_CLASS) => {
                self.decompile_quote(el, out);
                true
            }
            _ => false,
        }
    }

    fn decompile_spoiler(&self, el: &HtmlElement, out: &mut Vec<MarkupNode>) -> bool {
        let marker = el.find(&|child| child.text().trim_start().starts_with("Spoiler"));
        let payload = el.find(&|child| child.name == "pre");
        match (marker, payload) {
            (Some(_), Some(pre)) => {
                out.push(MarkupNode::element(
                    "spoiler",
                    vec![MarkupNode::text(pre.text())],
                ));
                true
            }
            _ => false,
        }
    }

    fn decompile_quote(&self, el: &HtmlElement, out: &mut Vec<MarkupNode>) {
        let poster = el
            .find(&|child| {
                child.name == "a"
                    && child
                        .attr("href")
                        .is_some_and(|href| href.contains(POSTER_URL_PIECE))
            })
            .map(HtmlElement::text);
        let post_id = el
            .find(&|child| {
                child.name == "a"
                    && child
                        .attr("href")
                        .is_some_and(|href| href.contains(POST_URL_PIECE))
            })
            .and_then(|anchor| {
                let href = anchor.attr("href")?;
                let idx = href.find(POST_URL_PIECE)?;
                let digits: String = href[idx + POST_URL_PIECE.len()..]
                    .chars()
                    .take_while(char::is_ascii_digit)
                    .collect();
                (!digits.is_empty()).then_some(digits)
            });

        let attribute = match (poster, post_id) {
            (Some(name), Some(id)) => Some(format!("{name};{id}")),
            (Some(name), None) => Some(name),
            (None, _) => None,
        };

        let children = el
            .find(&|child| child.name == "div" && child.attr("class") == Some(QUOTE_MESSAGE_CLASS))
            .map_or_else(
                || self.decompile_nodes(&el.children),
                |message| self.decompile_nodes(&message.children),
            );

        out.push(MarkupNode::Element {
            name: "quote".to_owned(),
            children,
            attribute,
        });
    }

    /// Splits a bare text run against the trigger index.
    ///
    /// Matched substrings (the opening bracket or any configured smiley
    /// symbol) are wrapped in a neutral `noparse` element so the text
    /// survives a round trip through the outbound posting path without
    /// being reinterpreted.
    fn split_text(&self, text: &str, out: &mut Vec<MarkupNode>) {
        let triggers = self.smilies.triggers();
        let mut rest = text;
        loop {
            // Earliest match wins; on position ties the index order
            // (longest first) already prefers the longer trigger.
            let hit = triggers
                .iter()
                .filter_map(|trigger| rest.find(trigger.as_str()).map(|pos| (pos, trigger)))
                .min_by_key(|(pos, _)| *pos);

            let Some((pos, trigger)) = hit else {
                if !rest.is_empty() {
                    out.push(MarkupNode::text(rest));
                }
                return;
            };

            if pos > 0 {
                out.push(MarkupNode::text(&rest[..pos]));
            }
            out.push(MarkupNode::element(
                "noparse",
                vec![MarkupNode::text(trigger.as_str())],
            ));
            rest = &rest[pos + trigger.len()..];
        }
    }
}

fn youtube_embed_id(src: &str) -> Option<&str> {
    let after_host = ["youtube.com/embed/", "youtube-nocookie.com/embed/"]
        .iter()
        .find_map(|piece| src.find(piece).map(|idx| &src[idx + piece.len()..]))?;
    let id = after_host
        .split(['?', '&', '#', '/'])
        .next()
        .unwrap_or_default();
    (!id.is_empty()).then_some(id)
}
