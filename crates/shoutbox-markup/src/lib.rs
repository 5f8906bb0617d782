//! # shoutbox-markup
//!
//! Markup tree and HTML decompiler for forum chatbox messages.
//!
//! The forum renders chat markup (`[b]…[/b]`, `[url=…]…[/url]`, smilies)
//! into a small, fixed HTML dialect. This crate parses that dialect and
//! maps it deterministically back into a structured markup tree that
//! bot code can match against and serialize for outbound posting.
//!
//! ## Quick Start
//!
//! ```
//! use shoutbox_markup::{HtmlDecompiler, SmileyTable, serialize};
//!
//! let smilies = SmileyTable::from_pairs(vec![
//!     (":)".to_owned(), "pics/smilies/smile.gif".to_owned()),
//! ]);
//! let decompiler = HtmlDecompiler::new(&smilies);
//!
//! let tree = decompiler.decompile_fragment("I said <b>hi</b>");
//! assert_eq!(serialize(&tree), "I said [b]hi[/b]");
//! ```
//!
//! ## Modules
//!
//! - [`html`]: tolerant fragment parser for the forum's HTML dialect
//! - [`MarkupNode`]: the decompiled tree and its serializations
//! - [`HtmlDecompiler`]: HTML → markup tree mapping
//! - [`SmileyTable`]: symbol↔URL table with a derived trigger index

mod decompiler;
pub mod html;
mod node;
mod smiley;

pub use decompiler::HtmlDecompiler;
pub use node::{MarkupNode, coalesce, plain_text, serialize, verbatim_serialize};
pub use smiley::SmileyTable;
