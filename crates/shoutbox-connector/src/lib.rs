//! Polling connector for a forum's embedded chatbox.
//!
//! The chatbox has no push channel and no API; the whole protocol is
//! "log in like a browser, re-fetch the message listing, and diff it
//! against what you saw last time". This crate wraps that into a
//! [`Connector`]: it keeps the session alive, classifies each poll's
//! rows as new or edited, and fans [`MessageEvent`]s out to
//! [`Subscriber`]s. Outbound posting handles the forum's legacy
//! windows-1252 form encoding and the security-token dance.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use shoutbox_connector::{Connector, ConnectorConfig, HttpTransport};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ConnectorConfig::new("http://forum.example.com", "bot", "hunter2");
//! let transport = HttpTransport::new(config.endpoints()?, config.http_timeout)?;
//! let connector = Arc::new(Connector::new(transport, config));
//! let handle = Arc::clone(&connector).start().await?;
//! // ... register subscribers beforehand, do other work ...
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
pub mod encoding;
mod error;
mod message;
mod poller;
mod retry;
pub mod scrape;
mod session;
mod store;

pub use config::{ConnectorConfig, Endpoints};
pub use error::{Error, Result};
pub use message::ChatMessage;
pub use poller::{Connector, ConnectorHandle, SendOptions, Subscriber};
pub use session::{HttpTransport, Transport};
pub use store::{MessageEvent, MessageStore};
