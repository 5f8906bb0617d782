//! Connector configuration.
//!
//! The connector does not load files itself; an external loader parses
//! whatever format it likes and hands over an already-built
//! [`ConnectorConfig`].

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Configuration for a chatbox connector.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Base URL of the forum, down to the directory the forum software
    /// lives in.
    pub base_url: String,
    /// Forum username to log in with.
    pub username: String,
    /// Forum password to log in with.
    pub password: String,
    /// Delay between poll cycles.
    pub poll_interval: Duration,
    /// Per-HTTP-call timeout.
    pub http_timeout: Duration,
    /// Nicknames whose events are flagged `sender_banned` (matched
    /// case-insensitively).
    #[serde(deserialize_with = "lowercase_names")]
    pub banned_names: HashSet<String>,
    /// Extra `(symbol, url)` smiley pairs layered over the forum's own.
    pub custom_smilies: Vec<(String, String)>,
    /// Image URL prefix that marks inline math renders.
    pub math_prefix: Option<String>,
}

/// The ban set is stored lowercased; configuration files may spell
/// names however they like.
fn lowercase_names<'de, D>(deserializer: D) -> std::result::Result<HashSet<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let names = HashSet::<String>::deserialize(deserializer)?;
    Ok(names.into_iter().map(|name| name.to_lowercase()).collect())
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            poll_interval: Duration::from_secs(5),
            http_timeout: Duration::from_secs(30),
            banned_names: HashSet::new(),
            custom_smilies: Vec::new(),
            math_prefix: None,
        }
    }
}

impl ConnectorConfig {
    /// Creates a configuration for the given forum and credentials.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Sets the delay between poll cycles.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the per-HTTP-call timeout.
    #[must_use]
    pub const fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Adds banned nicknames; matching is case-insensitive.
    #[must_use]
    pub fn banned_names(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.banned_names
            .extend(names.into_iter().map(|name| name.to_lowercase()));
        self
    }

    /// Adds custom `(symbol, url)` smiley pairs.
    #[must_use]
    pub fn custom_smilies(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.custom_smilies.extend(pairs);
        self
    }

    /// Sets the inline-math image URL prefix.
    #[must_use]
    pub fn math_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.math_prefix = Some(prefix.into());
        self
    }

    /// Whether the given author name is on the ban list.
    #[must_use]
    pub fn is_banned(&self, name: &str) -> bool {
        self.banned_names.contains(&name.to_lowercase())
    }

    /// Builds the endpoint URL set for this forum.
    pub fn endpoints(&self) -> Result<Endpoints> {
        Endpoints::from_base(&self.base_url)
    }
}

/// The endpoint URLs the connector talks to, precomputed from the base
/// URL.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Login form target.
    pub login: String,
    /// A computationally cheap page carrying the security token.
    pub cheap_page: String,
    /// The chatbox message listing.
    pub messages: String,
    /// Post and edit form target.
    pub post_edit: String,
    /// The smiley listing page.
    pub smilies: String,
    /// The AJAX endpoint (user search and friends).
    pub ajax: String,
}

impl Endpoints {
    /// Derives the endpoint set from a forum base URL.
    pub fn from_base(base_url: &str) -> Result<Self> {
        if base_url.is_empty() || !base_url.starts_with("http") {
            return Err(Error::BaseUrl(base_url.to_owned()));
        }
        let base = base_url.trim_end_matches('/');
        Ok(Self {
            login: format!("{base}/login.php?do=login"),
            cheap_page: format!("{base}/faq.php"),
            messages: format!("{base}/misc.php?show=ccbmessages"),
            post_edit: format!("{base}/misc.php"),
            smilies: format!("{base}/misc.php?do=showsmilies"),
            ajax: format!("{base}/ajax.php"),
        })
    }
}
