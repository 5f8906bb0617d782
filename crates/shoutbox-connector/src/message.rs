//! Chatbox messages as observed on the message page.

use chrono::{DateTime, Utc};
use shoutbox_markup::{HtmlDecompiler, MarkupNode, plain_text};

/// A message observed in the chatbox.
///
/// Values are immutable once constructed; a re-observed message with a
/// changed body is a new `ChatMessage` carrying the same `id`. The
/// decompiled views are derived on demand so the stored state stays the
/// raw page truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Forum-assigned, monotonically growing message id.
    pub id: u64,
    /// Posting user's id, when the page exposed one.
    pub author_id: Option<u64>,
    /// Posting user's name, flattened to plain text.
    pub author_name: String,
    /// Posting user's name as raw HTML; usernames can carry limited
    /// formatting of their own.
    pub author_name_html: String,
    /// Raw message body HTML as scraped.
    pub body_html: String,
    /// When the message was posted.
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Decompiles the body into a markup tree.
    #[must_use]
    pub fn decompiled_body(&self, decompiler: &HtmlDecompiler<'_>) -> Vec<MarkupNode> {
        decompiler.decompile_fragment(&self.body_html)
    }

    /// The body's text leaves, concatenated.
    #[must_use]
    pub fn plain_body(&self, decompiler: &HtmlDecompiler<'_>) -> String {
        plain_text(&self.decompiled_body(decompiler))
    }

    /// Decompiles the author name into a markup tree.
    #[must_use]
    pub fn decompiled_author_name(&self, decompiler: &HtmlDecompiler<'_>) -> Vec<MarkupNode> {
        decompiler.decompile_fragment(&self.author_name_html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoutbox_markup::SmileyTable;

    fn message(body_html: &str) -> ChatMessage {
        ChatMessage {
            id: 1,
            author_id: Some(7),
            author_name: "ondra".into(),
            author_name_html: "<b>ondra</b>".into(),
            body_html: body_html.into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn body_is_decompiled_on_demand() {
        let table = SmileyTable::new();
        let decompiler = HtmlDecompiler::new(&table);
        let msg = message("<b>hi</b>");
        assert_eq!(
            msg.decompiled_body(&decompiler),
            vec![MarkupNode::element("b", vec![MarkupNode::text("hi")])]
        );
        assert_eq!(msg.plain_body(&decompiler), "hi");
    }

    #[test]
    fn author_name_markup_is_preserved() {
        let table = SmileyTable::new();
        let decompiler = HtmlDecompiler::new(&table);
        let msg = message("x");
        assert_eq!(
            msg.decompiled_author_name(&decompiler),
            vec![MarkupNode::element("b", vec![MarkupNode::text("ondra")])]
        );
    }
}
