//! The smiley table and its derived trigger index.

use std::collections::HashMap;

/// Bidirectional mapping between smiley symbols and the image URLs the
/// forum serves for them.
///
/// Two layers feed the table: pairs scraped from the forum's smiley
/// listing and custom pairs from configuration, custom taking
/// precedence. Every update rebuilds the derived [trigger
/// index](Self::triggers) as an explicit step, so lookups and the
/// decompiler both see a consistent snapshot.
#[derive(Debug, Clone, Default)]
pub struct SmileyTable {
    forum: Vec<(String, String)>,
    custom: Vec<(String, String)>,
    symbol_to_url: HashMap<String, String>,
    url_to_symbol: HashMap<String, String>,
    triggers: Vec<String>,
}

impl SmileyTable {
    /// Creates an empty table.
    ///
    /// The trigger index still contains the opening bracket, which is
    /// always structurally significant.
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self::default();
        table.rebuild();
        table
    }

    /// Creates a table from `(symbol, url)` pairs.
    #[must_use]
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut table = Self::default();
        table.forum = pairs.into_iter().collect();
        table.rebuild();
        table
    }

    /// Replaces the forum-scraped layer and rebuilds the derived index.
    pub fn set_forum_pairs(&mut self, pairs: impl IntoIterator<Item = (String, String)>) {
        self.forum = pairs.into_iter().collect();
        self.rebuild();
    }

    /// Replaces the custom configured layer and rebuilds the derived
    /// index.
    pub fn set_custom_pairs(&mut self, pairs: impl IntoIterator<Item = (String, String)>) {
        self.custom = pairs.into_iter().collect();
        self.rebuild();
    }

    /// Looks up the symbol for an image URL.
    #[must_use]
    pub fn symbol_for_url(&self, url: &str) -> Option<&str> {
        self.url_to_symbol.get(url).map(String::as_str)
    }

    /// Looks up the image URL for a symbol.
    #[must_use]
    pub fn url_for_symbol(&self, symbol: &str) -> Option<&str> {
        self.symbol_to_url.get(symbol).map(String::as_str)
    }

    /// The custom configured pairs, in configuration order.
    #[must_use]
    pub fn custom_pairs(&self) -> &[(String, String)] {
        &self.custom
    }

    /// Number of known symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbol_to_url.len()
    }

    /// Whether no smilies are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbol_to_url.is_empty()
    }

    /// The trigger index: every string that must not pass through a
    /// bare text node unescaped.
    ///
    /// Contains the opening bracket and every known symbol, ordered
    /// longest first (ties lexicographic) so a shorter symbol never
    /// matches inside a longer one.
    #[must_use]
    pub fn triggers(&self) -> &[String] {
        &self.triggers
    }

    /// Escapes every trigger occurrence in a plain string with
    /// `[noparse]` wrappers.
    ///
    /// The string-level counterpart of the decompiler's bare-text
    /// splitting, for callers composing outbound messages from raw
    /// user input.
    #[must_use]
    pub fn escape_text(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        loop {
            let hit = self
                .triggers
                .iter()
                .filter_map(|trigger| rest.find(trigger.as_str()).map(|pos| (pos, trigger)))
                .min_by_key(|(pos, _)| *pos);
            let Some((pos, trigger)) = hit else {
                out.push_str(rest);
                return out;
            };
            out.push_str(&rest[..pos]);
            out.push_str("[noparse]");
            out.push_str(trigger);
            out.push_str("[/noparse]");
            rest = &rest[pos + trigger.len()..];
        }
    }

    fn rebuild(&mut self) {
        self.symbol_to_url.clear();
        self.url_to_symbol.clear();

        // Forum pairs first so custom pairs overwrite on collision.
        for (symbol, url) in self.forum.iter().chain(self.custom.iter()) {
            self.symbol_to_url.insert(symbol.clone(), url.clone());
            self.url_to_symbol.insert(url.clone(), symbol.clone());
        }

        self.triggers = self.symbol_to_url.keys().cloned().collect();
        self.triggers.push("[".to_owned());
        self.triggers
            .sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter()
            .map(|(symbol, url)| ((*symbol).to_owned(), (*url).to_owned()))
            .collect()
    }

    #[test]
    fn bidirectional_lookup() {
        let table = SmileyTable::from_pairs(pairs(&[(":)", "pics/smile.gif")]));
        assert_eq!(table.symbol_for_url("pics/smile.gif"), Some(":)"));
        assert_eq!(table.url_for_symbol(":)"), Some("pics/smile.gif"));
        assert_eq!(table.symbol_for_url("pics/other.gif"), None);
    }

    #[test]
    fn custom_pairs_take_precedence() {
        let mut table = SmileyTable::from_pairs(pairs(&[(":)", "pics/forum.gif")]));
        table.set_custom_pairs(pairs(&[(":)", "pics/custom.gif")]));
        assert_eq!(table.url_for_symbol(":)"), Some("pics/custom.gif"));
    }

    #[test]
    fn triggers_are_longest_first() {
        let table = SmileyTable::from_pairs(pairs(&[
            (":)", "a.gif"),
            (":))", "b.gif"),
            (":D", "c.gif"),
        ]));
        let triggers = table.triggers();
        assert_eq!(triggers[0], ":))");
        // Shorter symbols follow, the bracket is in there somewhere.
        assert!(triggers.contains(&"[".to_owned()));
        for window in triggers.windows(2) {
            assert!(window[0].len() >= window[1].len());
        }
    }

    #[test]
    fn empty_table_still_guards_bracket() {
        let table = SmileyTable::new();
        assert_eq!(table.triggers(), ["[".to_owned()]);
    }

    #[test]
    fn escape_text_wraps_triggers() {
        let table = SmileyTable::from_pairs(pairs(&[(":)", "a.gif")]));
        assert_eq!(
            table.escape_text("hey :) [b]"),
            "hey [noparse]:)[/noparse] [noparse][[/noparse]b]"
        );
    }

    #[test]
    fn escape_text_prefers_longer_trigger() {
        let table = SmileyTable::from_pairs(pairs(&[(":)", "a.gif"), (":))", "b.gif")]));
        assert_eq!(table.escape_text(":))"), "[noparse]:))[/noparse]");
    }

    #[test]
    fn replacing_forum_pairs_rebuilds_index() {
        let mut table = SmileyTable::from_pairs(pairs(&[(":old:", "old.gif")]));
        table.set_forum_pairs(pairs(&[(":new:", "new.gif")]));
        assert_eq!(table.url_for_symbol(":old:"), None);
        assert!(table.triggers().contains(&":new:".to_owned()));
    }
}
