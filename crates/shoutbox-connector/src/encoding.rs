//! Outbound text encodings and defensive text filters.
//!
//! The forum's posting endpoints speak a legacy dialect: bodies are
//! percent-encoded windows-1252 with numeric character references for
//! everything the codepage cannot carry, and the AJAX endpoint uses a
//! `%uXXXX` UTF-16 escape of its own. These are pure string transforms.

use std::fmt::Write as _;

/// Characters sent verbatim by both encoders.
fn is_url_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Encodes an outgoing message body for the post/edit endpoints.
///
/// URL-safe ASCII passes verbatim; characters representable in
/// windows-1252 are percent-encoded bytewise; everything else becomes a
/// percent-encoded numeric character reference (`%26%23{n}%3B`, i.e.
/// `&#{n};`).
#[must_use]
pub fn encode_outgoing(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if is_url_safe(c) {
            out.push(c);
        } else if let Some(byte) = windows_1252_byte(c) {
            let _ = write!(out, "%{byte:02X}");
        } else {
            let _ = write!(out, "%26%23{}%3B", u32::from(c));
        }
    }
    out
}

/// Encodes a string in the escape dialect of the forum's AJAX endpoint.
///
/// URL-safe ASCII passes verbatim, other ASCII is percent-encoded, and
/// anything beyond ASCII is sent as `%uXXXX` UTF-16 code units.
#[must_use]
pub fn ajax_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if is_url_safe(c) {
            out.push(c);
        } else if c.is_ascii() {
            let _ = write!(out, "%{:02x}", c as u32);
        } else {
            let mut units = [0_u16; 2];
            for unit in c.encode_utf16(&mut units) {
                let _ = write!(out, "%u{unit:04X}");
            }
        }
    }
    out
}

/// Maps a character to its windows-1252 byte, if the codepage has one.
fn windows_1252_byte(c: char) -> Option<u8> {
    let code = u32::from(c);
    match code {
        // ASCII and the Latin-1 high range map through unchanged.
        0x00..=0x7F | 0xA0..=0xFF => Some(code as u8),
        _ => {
            // The 0x80..0x9F block is where windows-1252 departs from
            // Latin-1.
            let byte = match c {
                '\u{20AC}' => 0x80,
                '\u{201A}' => 0x82,
                '\u{0192}' => 0x83,
                '\u{201E}' => 0x84,
                '\u{2026}' => 0x85,
                '\u{2020}' => 0x86,
                '\u{2021}' => 0x87,
                '\u{02C6}' => 0x88,
                '\u{2030}' => 0x89,
                '\u{0160}' => 0x8A,
                '\u{2039}' => 0x8B,
                '\u{0152}' => 0x8C,
                '\u{017D}' => 0x8E,
                '\u{2018}' => 0x91,
                '\u{2019}' => 0x92,
                '\u{201C}' => 0x93,
                '\u{201D}' => 0x94,
                '\u{2022}' => 0x95,
                '\u{2013}' => 0x96,
                '\u{2014}' => 0x97,
                '\u{02DC}' => 0x98,
                '\u{2122}' => 0x99,
                '\u{0161}' => 0x9A,
                '\u{203A}' => 0x9B,
                '\u{0153}' => 0x9C,
                '\u{017E}' => 0x9E,
                '\u{0178}' => 0x9F,
                _ => return None,
            };
            Some(byte)
        }
    }
}

/// Caps the number of combining marks stacked on a single base
/// character.
///
/// Runaway mark stacking ("zalgo") breaks the chat rendering; marks past
/// the cap are dropped. Zero-width format characters pass through
/// without resetting the run, so directional marks inside a cluster do
/// not reopen the budget.
#[must_use]
pub fn limit_combining_marks(text: &str, maximum_marks: usize) -> String {
    let mut out = String::with_capacity(text.len());
    let mut mark_count = 0_usize;
    for c in text.chars() {
        if is_combining_mark(c) {
            mark_count += 1;
            if mark_count <= maximum_marks {
                out.push(c);
            }
        } else if is_format_char(c) {
            out.push(c);
        } else {
            mark_count = 0;
            out.push(c);
        }
    }
    out
}

/// Covers the combining-mark blocks seen in chat abuse; this is a
/// denylist for rendering abuse, not a full Unicode category oracle.
fn is_combining_mark(c: char) -> bool {
    matches!(
        u32::from(c),
        0x0300..=0x036F     // combining diacritical marks
            | 0x0483..=0x0489 // cyrillic combining
            | 0x0591..=0x05BD // hebrew points
            | 0x0610..=0x061A // arabic marks
            | 0x064B..=0x065F
            | 0x0E31 | 0x0E34..=0x0E3A | 0x0E47..=0x0E4E // thai
            | 0x135D..=0x135F
            | 0x1AB0..=0x1AFF // combining extended
            | 0x1DC0..=0x1DFF // combining supplement
            | 0x20D0..=0x20FF // combining for symbols
            | 0xFE20..=0xFE2F // combining half marks
    )
}

fn is_format_char(c: char) -> bool {
    matches!(
        u32::from(c),
        0x00AD | 0x200B..=0x200F | 0x202A..=0x202E | 0x2060..=0x2064 | 0xFEFF
    )
}

/// Strips characters and numeric character references a page may carry
/// that the markup parser must never see.
///
/// NUL, surrogate code points, and C0 controls other than whitespace are
/// dropped, both verbatim and as `&#n;` / `&#xn;` references. The forum
/// occasionally serves these inside message bodies when users paste
/// binary garbage.
#[must_use]
pub fn strip_invalid_markup_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        let head = &rest[..amp];
        out.extend(head.chars().filter(|&c| is_valid_verbatim(c)));
        rest = &rest[amp..];

        match parse_numeric_reference(rest) {
            Some((len, value)) if is_invalid_code_point(value) => {
                rest = &rest[len..];
            }
            Some((len, _)) => {
                out.push_str(&rest[..len]);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.extend(rest.chars().filter(|&c| is_valid_verbatim(c)));
    out
}

fn is_valid_verbatim(c: char) -> bool {
    !(c == '\0' || (c.is_control() && !matches!(c, '\n' | '\r' | '\t')))
}

const fn is_invalid_code_point(value: u32) -> bool {
    value == 0 || (value >= 0xD800 && value <= 0xDFFF)
}

/// Parses `&#123;` or `&#x1F;` at the start of the input, returning the
/// byte length consumed and the referenced code point.
fn parse_numeric_reference(input: &str) -> Option<(usize, u32)> {
    let body = input.strip_prefix("&#")?;
    // A ';' further out than any reference body reaches means the "&#"
    // is literal text.
    let semi = body.find(';').filter(|&idx| idx <= 10)?;
    let digits = &body[..semi];
    let value = if let Some(hex) = digits.strip_prefix(['x', 'X']) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse().ok()?
    };
    Some((2 + semi + 1, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    mod outgoing {
        use super::*;

        #[test]
        fn safe_ascii_passes_verbatim() {
            assert_eq!(encode_outgoing("abc-XYZ_0.9"), "abc-XYZ_0.9");
        }

        #[test]
        fn space_and_punctuation_are_percent_encoded() {
            assert_eq!(encode_outgoing("a b!"), "a%20b%21");
        }

        #[test]
        fn latin1_goes_through_the_codepage() {
            assert_eq!(encode_outgoing("ä"), "%E4");
        }

        #[test]
        fn windows_1252_specials_use_their_byte() {
            assert_eq!(encode_outgoing("€"), "%80");
            assert_eq!(encode_outgoing("—"), "%97");
        }

        #[test]
        fn unencodable_becomes_character_reference() {
            // U+4E2D is not in windows-1252.
            assert_eq!(encode_outgoing("中"), "%26%2320013%3B");
        }
    }

    mod ajax {
        use super::*;

        #[test]
        fn ascii_is_lowercase_percent() {
            assert_eq!(ajax_encode("a b"), "a%20b");
            assert_eq!(ajax_encode("="), "%3d");
        }

        #[test]
        fn non_ascii_is_utf16_units() {
            assert_eq!(ajax_encode("ä"), "%u00E4");
            // Astral characters produce a surrogate pair.
            assert_eq!(ajax_encode("\u{1F600}"), "%uD83D%uDE00");
        }
    }

    mod marks {
        use super::*;

        #[test]
        fn caps_stacked_marks() {
            let zalgo = "e\u{0301}\u{0302}\u{0303}\u{0304}\u{0305}\u{0306}";
            assert_eq!(
                limit_combining_marks(zalgo, 4),
                "e\u{0301}\u{0302}\u{0303}\u{0304}"
            );
        }

        #[test]
        fn new_base_character_resets_the_budget() {
            let text = "a\u{0301}b\u{0301}";
            assert_eq!(limit_combining_marks(text, 1), text);
        }

        #[test]
        fn format_characters_do_not_reset() {
            let text = "e\u{0301}\u{200D}\u{0302}";
            assert_eq!(limit_combining_marks(text, 1), "e\u{0301}\u{200D}");
        }
    }

    mod stripping {
        use super::*;

        #[test]
        fn nul_and_controls_are_dropped() {
            assert_eq!(strip_invalid_markup_chars("a\u{0}b\u{1}c\nd"), "abc\nd");
        }

        #[test]
        fn surrogate_references_are_dropped() {
            assert_eq!(strip_invalid_markup_chars("x&#xD800;y&#0;z"), "xyz");
        }

        #[test]
        fn valid_references_survive() {
            assert_eq!(strip_invalid_markup_chars("x&#65;y"), "x&#65;y");
        }

        #[test]
        fn bare_ampersand_survives() {
            assert_eq!(strip_invalid_markup_chars("a & b"), "a & b");
        }

        #[test]
        fn reference_opener_before_multibyte_text_survives() {
            assert_eq!(strip_invalid_markup_chars("&#日日日日"), "&#日日日日");
            assert_eq!(strip_invalid_markup_chars("x&#日;y"), "x&#日;y");
        }
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn output_is_transport_safe(out: &str) {
            assert!(
                out.chars()
                    .all(|c| is_url_safe(c) || c == '%' || c == 'u'),
                "unsafe output: {out:?}"
            );
        }

        proptest! {
            #[test]
            fn outgoing_output_is_always_url_safe(s in "\\PC*") {
                output_is_transport_safe(&encode_outgoing(&s));
            }

            #[test]
            fn ajax_output_is_always_url_safe(s in "\\PC*") {
                output_is_transport_safe(&ajax_encode(&s));
            }

            #[test]
            fn mark_limiting_never_grows_text(s in "\\PC*") {
                prop_assert!(limit_combining_marks(&s, 4).len() <= s.len());
            }
        }
    }
}
