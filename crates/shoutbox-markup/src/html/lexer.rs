//! Tokenizer for the constrained HTML dialect the forum emits.
//!
//! Breaks a fragment into start tags, end tags, and text runs. The
//! tokenizer never fails: anything that does not scan as a tag is
//! recovered as literal text.

/// A single token of the input fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// An opening tag, possibly self-closing.
    StartTag {
        /// Lowercased tag name.
        name: String,
        /// Attributes in source order, names lowercased, values
        /// entity-decoded. A valueless attribute carries an empty value.
        attrs: Vec<(String, String)>,
        /// Whether the tag ended in `/>`.
        self_closing: bool,
    },
    /// A closing tag, name lowercased.
    EndTag(String),
    /// A run of character data, entity-decoded.
    Text(String),
    /// End of input.
    Eof,
}

/// Tokenizer state.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given fragment.
    #[must_use]
    pub const fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.rest().starts_with(prefix)
    }

    fn advance_bytes(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    /// Reads the next token.
    pub fn next_token(&mut self) -> Token {
        if self.pos >= self.input.len() {
            return Token::Eof;
        }

        if self.starts_with("<!--") {
            self.skip_comment();
            return self.next_token();
        }
        if self.starts_with("<!") || self.starts_with("<?") {
            // Doctype or processing instruction, irrelevant to fragments.
            self.skip_until('>');
            return self.next_token();
        }
        if self.starts_with("</") {
            return self.read_end_tag();
        }
        if self.starts_with("<") && self.rest()[1..].starts_with(|c: char| c.is_ascii_alphabetic())
        {
            return self.read_start_tag();
        }

        self.read_text()
    }

    fn skip_comment(&mut self) {
        self.advance_bytes(4);
        match self.rest().find("-->") {
            Some(idx) => self.advance_bytes(idx + 3),
            None => self.pos = self.input.len(),
        }
    }

    fn skip_until(&mut self, terminator: char) {
        match self.rest().find(terminator) {
            Some(idx) => self.advance_bytes(idx + terminator.len_utf8()),
            None => self.pos = self.input.len(),
        }
    }

    fn read_text(&mut self) -> Token {
        let rest = self.rest();
        // Text runs up to the next tag-looking '<'; a stray '<' that is
        // not followed by a tag opener stays literal.
        let mut end = rest.len();
        for (idx, _) in rest.match_indices('<') {
            if idx == 0 {
                continue;
            }
            let after = &rest[idx + 1..];
            if after.starts_with(|c: char| c.is_ascii_alphabetic())
                || after.starts_with('/')
                || after.starts_with('!')
                || after.starts_with('?')
            {
                end = idx;
                break;
            }
        }
        let raw = &rest[..end];
        self.advance_bytes(end);
        Token::Text(decode_entities(raw))
    }

    fn read_end_tag(&mut self) -> Token {
        self.advance_bytes(2);
        let name = self.read_name();
        self.skip_until('>');
        Token::EndTag(name)
    }

    fn read_start_tag(&mut self) -> Token {
        self.advance_bytes(1);
        let name = self.read_name();
        let mut attrs = Vec::new();
        let mut self_closing = false;

        loop {
            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some('>') => {
                    self.advance_bytes(1);
                    break;
                }
                Some('/') => {
                    self.advance_bytes(1);
                    if self.peek() == Some('>') {
                        self.advance_bytes(1);
                        self_closing = true;
                        break;
                    }
                }
                Some(_) => {
                    let attr_name = self.read_name();
                    if attr_name.is_empty() {
                        // Unscannable junk inside the tag; drop one char
                        // and keep going rather than looping forever.
                        self.advance_bytes(self.peek().map_or(1, char::len_utf8));
                        continue;
                    }
                    self.skip_whitespace();
                    let value = if self.peek() == Some('=') {
                        self.advance_bytes(1);
                        self.skip_whitespace();
                        self.read_attr_value()
                    } else {
                        String::new()
                    };
                    attrs.push((attr_name, value));
                }
            }
        }

        Token::StartTag {
            name,
            attrs,
            self_closing,
        }
    }

    fn read_name(&mut self) -> String {
        let rest = self.rest();
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':'))
            .unwrap_or(rest.len());
        let name = rest[..end].to_ascii_lowercase();
        self.advance_bytes(end);
        name
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance_bytes(c.len_utf8());
            } else {
                break;
            }
        }
    }

    fn read_attr_value(&mut self) -> String {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.advance_bytes(1);
                let rest = self.rest();
                let end = rest.find(quote).unwrap_or(rest.len());
                let raw = &rest[..end];
                self.advance_bytes(end.min(rest.len()));
                if self.peek() == Some(quote) {
                    self.advance_bytes(1);
                }
                decode_entities(raw)
            }
            _ => {
                let rest = self.rest();
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == '>')
                    .unwrap_or(rest.len());
                let raw = &rest[..end];
                self.advance_bytes(end);
                decode_entities(raw)
            }
        }
    }
}

/// Decodes the entity vocabulary the forum pages use.
///
/// Named entities outside the known set and malformed references stay
/// literal.
#[must_use]
pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_owned();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        // A ';' further out than any entity body reaches means this '&'
        // is literal.
        let Some(semi) = rest.find(';').filter(|&idx| idx <= 12) else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };
        let body = &rest[1..semi];
        let decoded = match body {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            _ => decode_numeric(body),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_numeric(body: &str) -> Option<char> {
    let digits = body.strip_prefix('#')?;
    let value = if let Some(hex) = digits.strip_prefix(['x', 'X']) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse().ok()?
    };
    char::from_u32(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token();
            if token == Token::Eof {
                return out;
            }
            out.push(token);
        }
    }

    #[test]
    fn plain_text() {
        assert_eq!(tokens("hello"), vec![Token::Text("hello".into())]);
    }

    #[test]
    fn simple_tag_pair() {
        assert_eq!(
            tokens("<b>hi</b>"),
            vec![
                Token::StartTag {
                    name: "b".into(),
                    attrs: vec![],
                    self_closing: false,
                },
                Token::Text("hi".into()),
                Token::EndTag("b".into()),
            ]
        );
    }

    #[test]
    fn attributes_quoted_and_bare() {
        let got = tokens(r#"<a href="http://x/y" rel=nofollow>z</a>"#);
        assert_eq!(
            got[0],
            Token::StartTag {
                name: "a".into(),
                attrs: vec![
                    ("href".into(), "http://x/y".into()),
                    ("rel".into(), "nofollow".into()),
                ],
                self_closing: false,
            }
        );
    }

    #[test]
    fn valueless_attribute_is_empty() {
        let got = tokens("<li style=\"\" disabled>x");
        let Token::StartTag { attrs, .. } = &got[0] else {
            panic!("expected start tag");
        };
        assert_eq!(
            attrs,
            &vec![
                ("style".into(), String::new()),
                ("disabled".into(), String::new())
            ]
        );
    }

    #[test]
    fn self_closing_img() {
        assert_eq!(
            tokens("<img src=\"u\" />"),
            vec![Token::StartTag {
                name: "img".into(),
                attrs: vec![("src".into(), "u".into())],
                self_closing: true,
            }]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            tokens("a<!-- hidden -->b"),
            vec![Token::Text("a".into()), Token::Text("b".into())]
        );
    }

    #[test]
    fn stray_angle_bracket_stays_text() {
        assert_eq!(tokens("1 < 2"), vec![Token::Text("1 < 2".into())]);
    }

    #[test]
    fn entities_decode() {
        assert_eq!(
            tokens("&lt;b&gt; &amp; &#65;&#x42;"),
            vec![Token::Text("<b> & AB".into())]
        );
    }

    #[test]
    fn unknown_entity_stays_literal() {
        assert_eq!(tokens("&bogus;"), vec![Token::Text("&bogus;".into())]);
    }

    #[test]
    fn ampersand_before_multibyte_text_stays_literal() {
        assert_eq!(tokens("&日日日日"), vec![Token::Text("&日日日日".into())]);
        assert_eq!(
            tokens("a &日; b"),
            vec![Token::Text("a &日; b".into())]
        );
    }

    #[test]
    fn uppercase_names_fold() {
        assert_eq!(
            tokens("<BR/>"),
            vec![Token::StartTag {
                name: "br".into(),
                attrs: vec![],
                self_closing: true,
            }]
        );
    }
}
