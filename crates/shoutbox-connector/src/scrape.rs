//! Scrapers for the forum pages the connector consumes.
//!
//! All functions here are pure: they take already-parsed HTML and fish
//! values out of it. Structure anomalies degrade to skipped rows or
//! `None`, never panics.

use chrono::{DateTime, NaiveDateTime, Utc};
use shoutbox_markup::html::{HtmlElement, HtmlNode, find_all_in, find_in, to_html};
use tracing::debug;

use crate::message::ChatMessage;

/// URL piece directly preceding a message id in message links.
const MESSAGE_ID_PIECE: &str = "misc.php?ccbloc=";

/// URL piece directly preceding a user id in profile links.
const USER_ID_PIECE: &str = "member.php?u=";

/// The timestamp format the message page embeds in brackets.
const TIMESTAMP_FORMAT: &str = "%d-%m-%y, %H:%M";

/// Extracts chat messages from the parsed message listing page.
///
/// Rows the page renders without a resolvable message id are skipped;
/// the page occasionally interleaves decorative rows. Row order is
/// preserved (the page is typically newest-first).
#[must_use]
pub fn scrape_rows(page: &[HtmlNode]) -> Vec<ChatMessage> {
    let rows = find_all_in(page, &|el| el.name == "tr");
    let mut out = Vec::with_capacity(rows.len());

    for row in rows {
        let cells: Vec<&HtmlElement> = row
            .child_elements()
            .filter(|el| el.name == "td")
            .collect();
        let [meta_cell, body_cell, ..] = cells.as_slice() else {
            continue;
        };

        let Some(id) = fish_out_id(meta_cell, MESSAGE_ID_PIECE) else {
            debug!("skipping row without a message id");
            continue;
        };
        let author_id = fish_out_id(meta_cell, USER_ID_PIECE);

        // The last profile link in the metadata cell is the author; the
        // first can be a quote backlink.
        let Some(nick_anchor) = find_author_anchor(meta_cell) else {
            debug!(id, "skipping row without an author link");
            continue;
        };

        let timestamp = find_timestamp(&meta_cell.text()).unwrap_or_else(Utc::now);

        out.push(ChatMessage {
            id,
            author_id,
            author_name: nick_anchor.text(),
            author_name_html: to_html(&nick_anchor.children),
            body_html: to_html(&body_cell.children).trim().to_owned(),
            timestamp,
        });
    }

    out
}

/// Fishes the id following `url_piece` out of the first matching link
/// under `root`.
fn fish_out_id(root: &HtmlElement, url_piece: &str) -> Option<u64> {
    let anchor = root.find(&|el| {
        el.name == "a"
            && el
                .attr("href")
                .is_some_and(|href| href.contains(url_piece))
    })?;
    let href = anchor.attr("href")?;
    let idx = href.find(url_piece)?;
    let digits: String = href[idx + url_piece.len()..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn find_author_anchor(meta_cell: &HtmlElement) -> Option<&HtmlElement> {
    let mut anchors = Vec::new();
    meta_cell.find_all(
        &|el| {
            el.name == "a"
                && el
                    .attr("href")
                    .is_some_and(|href| href.contains(USER_ID_PIECE))
        },
        &mut anchors,
    );
    anchors.last().copied()
}

/// Finds a bracketed `dd-mm-yy, HH:MM` stamp in the cell text.
fn find_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        rest = &rest[open + 1..];
        if let Some(close) = rest.find(']')
            && let Ok(naive) = NaiveDateTime::parse_from_str(&rest[..close], TIMESTAMP_FORMAT)
        {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Pulls the security token out of a cheap page.
#[must_use]
pub fn scrape_security_token(page: &[HtmlNode]) -> Option<String> {
    let input = find_in(page, &|el| {
        el.name == "input" && el.attr("name") == Some("securitytoken")
    })?;
    input.attr("value").map(ToOwned::to_owned)
}

/// Extracts `(symbol, url)` pairs from the smiley listing page.
#[must_use]
pub fn scrape_smilies(page: &[HtmlNode]) -> Vec<(String, String)> {
    let blocks = find_all_in(page, &|el| {
        el.name == "li" && el.attr("class") == Some("smiliebit")
    });
    let mut out = Vec::with_capacity(blocks.len());
    for block in blocks {
        let Some(symbol_div) = block.find(&|el| el.attr("class") == Some("smilietext")) else {
            continue;
        };
        let Some(image) = block
            .find(&|el| el.attr("class") == Some("smilieimage"))
            .and_then(|div| div.find(&|el| el.name == "img"))
        else {
            continue;
        };
        let Some(url) = image.attr("src") else {
            continue;
        };
        let symbol = symbol_div.text().trim().to_owned();
        if symbol.is_empty() {
            continue;
        }
        out.push((symbol, url.to_owned()));
    }
    out
}

/// Extracts `(user id, name)` pairs from a user-search AJAX response.
///
/// The response is a small XML document; the tolerant HTML parser reads
/// it fine.
#[must_use]
pub fn scrape_user_search(response: &[HtmlNode]) -> Vec<(u64, String)> {
    find_all_in(response, &|el| {
        el.name == "user" && el.attr("userid").is_some()
    })
    .into_iter()
    .filter_map(|el| {
        let id = el.attr("userid")?.parse().ok()?;
        Some((id, el.text()))
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use shoutbox_markup::html::parse_fragment;

    fn message_row(id: u64, user: u64, nick: &str, body: &str) -> String {
        format!(
            "<tr><td>\
             <a href=\"misc.php?ccbloc={id}\">#</a> \
             [07-03-15, 12:34] \
             <a href=\"member.php?u={user}\">{nick}</a>\
             </td><td>{body}</td></tr>"
        )
    }

    mod rows {
        use super::*;

        #[test]
        fn extracts_all_fields() {
            let page = parse_fragment(&message_row(42, 7, "<b>ondra</b>", "hello <i>there</i>"));
            let rows = scrape_rows(&page);
            assert_eq!(rows.len(), 1);
            let row = &rows[0];
            assert_eq!(row.id, 42);
            assert_eq!(row.author_id, Some(7));
            assert_eq!(row.author_name, "ondra");
            assert_eq!(row.author_name_html, "<b>ondra</b>");
            assert_eq!(row.body_html, "hello <i>there</i>");
            assert_eq!(
                (row.timestamp.day(), row.timestamp.month()),
                (7, 3)
            );
            assert_eq!(
                (row.timestamp.hour(), row.timestamp.minute()),
                (12, 34)
            );
        }

        #[test]
        fn row_without_message_id_is_skipped() {
            let html = "<tr><td><a href=\"member.php?u=7\">x</a></td><td>y</td></tr>";
            let page = parse_fragment(html);
            assert!(scrape_rows(&page).is_empty());
        }

        #[test]
        fn page_order_is_preserved() {
            let html = format!(
                "{}{}",
                message_row(103, 1, "a", "x"),
                message_row(101, 1, "a", "y")
            );
            let page = parse_fragment(&html);
            let ids: Vec<u64> = scrape_rows(&page).iter().map(|row| row.id).collect();
            assert_eq!(ids, vec![103, 101]);
        }

        #[test]
        fn missing_timestamp_falls_back_to_now() {
            let html = "<tr><td>\
                        <a href=\"misc.php?ccbloc=5\">#</a>\
                        <a href=\"member.php?u=2\">n</a>\
                        </td><td>b</td></tr>";
            let page = parse_fragment(html);
            let rows = scrape_rows(&page);
            assert_eq!(rows.len(), 1);
        }
    }

    #[test]
    fn security_token() {
        let page = parse_fragment(
            "<form><input type=\"hidden\" name=\"securitytoken\" value=\"abc123\" /></form>",
        );
        assert_eq!(scrape_security_token(&page), Some("abc123".to_owned()));
        assert_eq!(scrape_security_token(&parse_fragment("<p>no</p>")), None);
    }

    #[test]
    fn smilies() {
        let page = parse_fragment(
            "<ul>\
             <li class=\"smiliebit\">\
             <div class=\"smilietext\">:)</div>\
             <div class=\"smilieimage\"><img src=\"pics/smile.gif\" /></div>\
             </li>\
             <li class=\"smiliebit\"><div class=\"smilietext\"></div></li>\
             </ul>",
        );
        assert_eq!(
            scrape_smilies(&page),
            vec![(":)".to_owned(), "pics/smile.gif".to_owned())]
        );
    }

    #[test]
    fn user_search() {
        let page = parse_fragment(
            "<users><user userid=\"12\">Alice</user><user userid=\"34\">Bob</user></users>",
        );
        assert_eq!(
            scrape_user_search(&page),
            vec![(12, "Alice".to_owned()), (34, "Bob".to_owned())]
        );
    }
}
