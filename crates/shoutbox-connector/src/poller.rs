//! The connector: poll loop, change dispatch, and outbound actions.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use shoutbox_markup::html::parse_fragment;
use shoutbox_markup::{HtmlDecompiler, MarkupNode, SmileyTable};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConnectorConfig;
use crate::encoding::{encode_outgoing, limit_combining_marks, strip_invalid_markup_chars};
use crate::error::{Error, Result};
use crate::message::ChatMessage;
use crate::retry::{Recovery, RetryLadder};
use crate::scrape;
use crate::session::Transport;
use crate::store::{MessageEvent, MessageStore};

/// Cap on combining marks per base character in outbound text.
const MAX_COMBINING_MARKS: usize = 4;

/// Cap on the poll-interval penalty multiplier after repeated failures.
const MAX_PENALTY: u32 = 10;

/// Shortest user name the forum's search accepts.
const MIN_SEARCH_FRAGMENT: usize = 3;

/// A consumer of chatbox change events.
///
/// Called synchronously on the poll task, once per observed change, in
/// ascending message id order. Errors are logged and isolated; they
/// never affect other subscribers or the poll loop.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Handles one observed change.
    async fn on_event(&self, event: &MessageEvent) -> anyhow::Result<()>;
}

/// Options for outbound posts and edits.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Send even while a quiet window is active.
    pub bypass_quiet: bool,
    /// Skip the combining-mark filter.
    pub bypass_filters: bool,
    /// Substitute custom smiley symbols with `[icon]` elements.
    pub custom_smilies: bool,
}

/// Connects to a forum chatbox, polls it for changes, and fans events
/// out to subscribers.
///
/// The poll loop is the sole mutator of the message store; outbound
/// actions may run concurrently and share the transport, which
/// serializes exchanges internally.
pub struct Connector<T> {
    transport: T,
    config: ConnectorConfig,
    security_token: RwLock<Option<String>>,
    smilies: RwLock<SmileyTable>,
    store: Mutex<MessageStore>,
    subscribers: RwLock<Vec<Arc<dyn Subscriber>>>,
    user_cache: RwLock<HashMap<String, (u64, String)>>,
    quiet_until: RwLock<Option<Instant>>,
}

impl<T: Transport> Connector<T> {
    /// Creates a connector over the given transport and configuration.
    #[must_use]
    pub fn new(transport: T, config: ConnectorConfig) -> Self {
        let mut smilies = SmileyTable::new();
        smilies.set_custom_pairs(config.custom_smilies.iter().cloned());
        Self {
            transport,
            config,
            security_token: RwLock::new(None),
            smilies: RwLock::new(smilies),
            store: Mutex::new(MessageStore::new()),
            subscribers: RwLock::new(Vec::new()),
            user_cache: RwLock::new(HashMap::new()),
            quiet_until: RwLock::new(None),
        }
    }

    /// Registers a subscriber. Registration is add-only; dispatch
    /// iterates a snapshot of the list.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        write_lock(&self.subscribers).push(subscriber);
    }

    /// Logs in, then primes the security token and the smiley table.
    pub async fn login(&self) -> Result<()> {
        info!(username = %self.config.username, "logging in");
        self.transport
            .login(&self.config.username, &self.config.password)
            .await?;
        self.refresh_security_token().await?;
        if let Err(error) = self.update_smilies().await {
            warn!(%error, "smiley update failed; keeping previous table");
        }
        info!("ready");
        Ok(())
    }

    /// Fetches a cheap page and stores the security token from it.
    pub async fn refresh_security_token(&self) -> Result<()> {
        debug!("fetching new security token");
        let page = self.transport.fetch_cheap_page().await?;
        let nodes = parse_fragment(&strip_invalid_markup_chars(&page));
        let token = scrape::scrape_security_token(&nodes)
            .ok_or_else(|| Error::PageScrape("security token not found".to_owned()))?;
        *write_lock(&self.security_token) = Some(token);
        Ok(())
    }

    /// Rebuilds the forum layer of the smiley table from the smiley
    /// listing page.
    pub async fn update_smilies(&self) -> Result<()> {
        debug!("updating smilies");
        let page = self.transport.fetch_smilies_page().await?;
        let nodes = parse_fragment(&strip_invalid_markup_chars(&page));
        let pairs = scrape::scrape_smilies(&nodes);
        if pairs.is_empty() {
            return Err(Error::PageScrape("no smilies found".to_owned()));
        }
        write_lock(&self.smilies).set_forum_pairs(pairs);
        Ok(())
    }

    /// Runs one fetch-diff-dispatch cycle and returns the number of
    /// dispatched events.
    pub async fn poll_once(&self) -> Result<usize> {
        let rows = self.fetch_rows().await?;

        // Remember author identities for cheap case-insensitive lookup.
        {
            let mut cache = write_lock(&self.user_cache);
            for row in &rows {
                if let Some(author_id) = row.author_id {
                    cache.insert(
                        row.author_name.to_lowercase(),
                        (author_id, row.author_name.clone()),
                    );
                }
            }
        }

        let events = lock(&self.store).diff(rows, |name| self.config.is_banned(name));
        let count = events.len();
        self.dispatch(events).await;
        Ok(count)
    }

    /// Fetches and scrapes the message page, with the recovery ladder
    /// applied to transfer and structure failures.
    async fn fetch_rows(&self) -> Result<Vec<ChatMessage>> {
        self.with_recovery(|| async {
            let page = self.transport.fetch_messages_page().await?;
            let nodes = parse_fragment(&strip_invalid_markup_chars(&page));
            let rows = scrape::scrape_rows(&nodes);
            if rows.is_empty() {
                return Err(Error::PageScrape("no message rows".to_owned()));
            }
            Ok(rows)
        })
        .await
    }

    async fn dispatch(&self, events: Vec<MessageEvent>) {
        let subscribers = read_lock(&self.subscribers).clone();
        for event in events {
            for subscriber in &subscribers {
                if let Err(error) = subscriber.on_event(&event).await {
                    warn!(
                        %error,
                        id = event.message.id,
                        edited = event.edited,
                        "subscriber failed; continuing"
                    );
                }
            }
        }
    }

    /// Posts a message with default options.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        self.send_message_with(text, SendOptions::default()).await
    }

    /// Posts a message.
    ///
    /// No-ops (successfully) while a quiet window is active, unless
    /// bypassed.
    pub async fn send_message_with(&self, text: &str, options: SendOptions) -> Result<()> {
        if !options.bypass_quiet && self.is_quiet() {
            debug!(text, "quiet window active; not posting");
            return Ok(());
        }
        let encoded = self.prepare_outbound(text, options);
        debug!(text, "posting message");
        self.with_recovery(|| async {
            let token = self.security_token_value();
            self.transport.submit_post(&token, &encoded).await
        })
        .await
    }

    /// Edits a previously posted message. Edits bypass the quiet window
    /// by default; they clean up the bot's own output.
    pub async fn edit_message(&self, message_id: u64, new_text: &str) -> Result<()> {
        self.edit_message_with(
            message_id,
            new_text,
            SendOptions {
                bypass_quiet: true,
                ..SendOptions::default()
            },
        )
        .await
    }

    /// Edits a previously posted message with explicit options.
    pub async fn edit_message_with(
        &self,
        message_id: u64,
        new_text: &str,
        options: SendOptions,
    ) -> Result<()> {
        if !options.bypass_quiet && self.is_quiet() {
            debug!(message_id, "quiet window active; not editing");
            return Ok(());
        }
        let encoded = self.prepare_outbound(new_text, options);
        debug!(message_id, new_text, "editing message");
        self.with_recovery(|| async {
            let token = self.security_token_value();
            self.transport
                .submit_edit(&token, message_id, &encoded)
                .await
        })
        .await
    }

    fn prepare_outbound(&self, text: &str, options: SendOptions) -> String {
        let mut body = text.to_owned();
        if options.custom_smilies {
            for (symbol, url) in read_lock(&self.smilies).custom_pairs() {
                body = body.replace(symbol, &format!("[icon]{url}[/icon]"));
            }
        }
        if !options.bypass_filters {
            body = limit_combining_marks(&body, MAX_COMBINING_MARKS);
        }
        encode_outgoing(&body)
    }

    /// Suppresses outbound messages until the deadline. Send calls
    /// inside the window succeed as no-ops without consuming a retry.
    pub fn hush_until(&self, deadline: Instant) {
        *write_lock(&self.quiet_until) = Some(deadline);
    }

    /// Whether a quiet window is currently active.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        read_lock(&self.quiet_until).is_some_and(|deadline| Instant::now() < deadline)
    }

    /// Resolves a case-insensitive user name to `(user id, exact
    /// nickname)`, consulting the cache first and the forum's user
    /// search second.
    pub async fn user_for_name(&self, name: &str) -> Result<Option<(u64, String)>> {
        let lower = name.to_lowercase();
        if let Some(hit) = read_lock(&self.user_cache).get(&lower) {
            return Ok(Some(hit.clone()));
        }
        if name.chars().count() < MIN_SEARCH_FRAGMENT {
            // The forum rejects fragments this short.
            return Ok(None);
        }

        let response = self
            .with_recovery(|| async {
                let token = self.security_token_value();
                self.transport
                    .ajax(&token, "usersearch", &[("fragment", name)])
                    .await
            })
            .await?;

        let candidates = scrape::scrape_user_search(&parse_fragment(&response));
        for (id, candidate) in candidates {
            if candidate.to_lowercase() == lower {
                write_lock(&self.user_cache).insert(lower, (id, candidate.clone()));
                return Ok(Some((id, candidate)));
            }
        }
        Ok(None)
    }

    /// Decompiles an HTML fragment with the current smiley table.
    #[must_use]
    pub fn decompile_html(&self, html: &str) -> Vec<MarkupNode> {
        let table = self.smiley_table();
        let mut decompiler = HtmlDecompiler::new(&table);
        if let Some(prefix) = &self.config.math_prefix {
            decompiler = decompiler.with_math_prefix(prefix);
        }
        decompiler.decompile_fragment(html)
    }

    /// Escapes triggers in raw user input for safe outbound embedding.
    #[must_use]
    pub fn escape_text(&self, text: &str) -> String {
        read_lock(&self.smilies).escape_text(text)
    }

    /// A snapshot of the current smiley table.
    #[must_use]
    pub fn smiley_table(&self) -> SmileyTable {
        read_lock(&self.smilies).clone()
    }

    /// Highest message id observed so far.
    #[must_use]
    pub fn watermark(&self) -> Option<u64> {
        lock(&self.store).watermark()
    }

    fn security_token_value(&self) -> String {
        read_lock(&self.security_token).clone().unwrap_or_default()
    }

    /// Runs an exchange through the recovery ladder: token refresh,
    /// then re-login, then a terminal [`Error::Transfer`].
    async fn with_recovery<R, Fut>(&self, op: impl Fn() -> Fut) -> Result<R>
    where
        Fut: Future<Output = Result<R>> + Send,
    {
        let mut ladder = RetryLadder::new();
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_recoverable() => match ladder.next_recovery() {
                    Recovery::RefreshToken => {
                        warn!(%error, "exchange failed; refreshing security token");
                        if let Err(recovery_error) = self.refresh_security_token().await {
                            debug!(%recovery_error, "token refresh failed");
                        }
                    }
                    Recovery::Relogin => {
                        warn!(%error, "exchange failed again; re-logging in");
                        if let Err(recovery_error) = self.login().await {
                            debug!(%recovery_error, "re-login failed");
                        }
                    }
                    Recovery::GiveUp => {
                        warn!(%error, "exchange failed after recovery; giving up");
                        return Err(Error::Transfer);
                    }
                },
                Err(error) => return Err(error),
            }
        }
    }
}

impl<T: Transport + 'static> Connector<T> {
    /// Logs in and spawns the poll loop.
    ///
    /// The returned handle stops the loop after its current cycle and
    /// joins it.
    pub async fn start(self: Arc<Self>) -> Result<ConnectorHandle> {
        self.login().await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connector = Arc::clone(&self);
        let task = tokio::spawn(async move {
            connector.run(shutdown_rx).await;
        });
        Ok(ConnectorHandle {
            shutdown: shutdown_tx,
            task,
        })
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("poll loop started");
        let mut penalty: u32 = 1;
        loop {
            match self.poll_once().await {
                Ok(count) => {
                    if count > 0 {
                        debug!(count, "dispatched events");
                    }
                    penalty = 1;
                }
                Err(error) => {
                    // Lenient by design: the next scheduled poll is the
                    // retry, stretched by the penalty so a dead forum
                    // is not hammered.
                    warn!(%error, penalty, "poll cycle failed");
                    penalty = (penalty + 1).min(MAX_PENALTY);
                }
            }

            let delay = self.config.poll_interval * penalty;
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("poll loop stopping");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Handle to a running poll loop.
pub struct ConnectorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConnectorHandle {
    /// Signals the poll loop to exit after its current cycle and waits
    /// for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

fn lock<V>(mutex: &Mutex<V>) -> std::sync::MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_lock<V>(lock: &RwLock<V>) -> std::sync::RwLockReadGuard<'_, V> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<V>(lock: &RwLock<V>) -> std::sync::RwLockWriteGuard<'_, V> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    fn token_page(token: &str) -> String {
        format!("<input type=\"hidden\" name=\"securitytoken\" value=\"{token}\" />")
    }

    fn smiley_page() -> String {
        "<ul><li class=\"smiliebit\">\
         <div class=\"smilietext\">:)</div>\
         <div class=\"smilieimage\"><img src=\"pics/smile.gif\" /></div>\
         </li></ul>"
            .to_owned()
    }

    fn message_page(rows: &[(u64, &str, &str)]) -> String {
        rows.iter()
            .map(|(id, nick, body)| {
                format!(
                    "<tr><td>\
                     <a href=\"misc.php?ccbloc={id}\">#</a> \
                     [07-03-15, 12:34] \
                     <a href=\"member.php?u=7\">{nick}</a>\
                     </td><td>{body}</td></tr>"
                )
            })
            .collect()
    }

    #[derive(Default)]
    struct MockState {
        logins: usize,
        cheap_fetches: usize,
        message_pages: VecDeque<Result<String>>,
        posts: Vec<(String, String)>,
        edits: Vec<(u64, String)>,
        ajax_responses: VecDeque<String>,
    }

    #[derive(Default)]
    struct MockTransport {
        state: Mutex<MockState>,
    }

    impl MockTransport {
        fn queue_page(&self, page: Result<String>) {
            lock(&self.state).message_pages.push_back(page);
        }

        fn queue_ajax(&self, response: &str) {
            lock(&self.state)
                .ajax_responses
                .push_back(response.to_owned());
        }
    }

    impl Transport for MockTransport {
        async fn login(&self, _username: &str, _password: &str) -> Result<()> {
            lock(&self.state).logins += 1;
            Ok(())
        }

        async fn fetch_messages_page(&self) -> Result<String> {
            lock(&self.state)
                .message_pages
                .pop_front()
                .unwrap_or_else(|| Err(Error::PageScrape("script exhausted".to_owned())))
        }

        async fn fetch_cheap_page(&self) -> Result<String> {
            lock(&self.state).cheap_fetches += 1;
            Ok(token_page("tok"))
        }

        async fn fetch_smilies_page(&self) -> Result<String> {
            Ok(smiley_page())
        }

        async fn submit_post(&self, security_token: &str, encoded_body: &str) -> Result<()> {
            lock(&self.state)
                .posts
                .push((security_token.to_owned(), encoded_body.to_owned()));
            Ok(())
        }

        async fn submit_edit(
            &self,
            _security_token: &str,
            message_id: u64,
            encoded_body: &str,
        ) -> Result<()> {
            lock(&self.state)
                .edits
                .push((message_id, encoded_body.to_owned()));
            Ok(())
        }

        async fn ajax(
            &self,
            _security_token: &str,
            operation: &str,
            _parameters: &[(&str, &str)],
        ) -> Result<String> {
            lock(&self.state)
                .ajax_responses
                .pop_front()
                .ok_or_else(|| Error::Rejected(format!("ajax {operation} not scripted")))
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(u64, bool, bool)>>,
    }

    #[async_trait]
    impl Subscriber for Recorder {
        async fn on_event(&self, event: &MessageEvent) -> anyhow::Result<()> {
            lock(&self.seen)
                .push((event.message.id, event.edited, event.initial_salvo));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Subscriber for Failing {
        async fn on_event(&self, _event: &MessageEvent) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    fn connector(transport: MockTransport) -> Connector<MockTransport> {
        Connector::new(
            transport,
            ConnectorConfig::new("http://forum.example.com", "bot", "pw"),
        )
    }

    #[tokio::test]
    async fn poll_dispatches_new_and_edited_in_order() {
        let transport = MockTransport::default();
        transport.queue_page(Ok(message_page(&[(2, "alice", "b"), (1, "alice", "a")])));
        transport.queue_page(Ok(message_page(&[
            (3, "bob", "c"),
            (2, "alice", "b changed"),
            (1, "alice", "a"),
        ])));
        let connector = connector(transport);
        let recorder = Arc::new(Recorder::default());
        connector.subscribe(recorder.clone());

        assert_eq!(connector.poll_once().await.unwrap(), 2);
        assert_eq!(connector.poll_once().await.unwrap(), 2);

        let seen = lock(&recorder.seen).clone();
        assert_eq!(
            seen,
            vec![
                (1, false, true),
                (2, false, true),
                (2, true, false),
                (3, false, false),
            ]
        );
        assert_eq!(connector.watermark(), Some(3));
    }

    #[tokio::test]
    async fn subscriber_failure_does_not_stop_dispatch() {
        let transport = MockTransport::default();
        transport.queue_page(Ok(message_page(&[(1, "alice", "hi")])));
        let connector = connector(transport);
        let recorder = Arc::new(Recorder::default());
        connector.subscribe(Arc::new(Failing));
        connector.subscribe(recorder.clone());

        assert_eq!(connector.poll_once().await.unwrap(), 1);
        assert_eq!(lock(&recorder.seen).len(), 1);
    }

    #[tokio::test]
    async fn ladder_refreshes_then_relogs_then_gives_up() {
        let transport = MockTransport::default();
        for _ in 0..3 {
            transport.queue_page(Err(Error::Rejected("503".to_owned())));
        }
        let connector = connector(transport);

        let error = connector.poll_once().await.unwrap_err();
        assert!(matches!(error, Error::Transfer));

        let state = lock(&connector.transport.state);
        // First failure refreshes the token, second re-logs in (which
        // refreshes again), third gives up without a fourth fetch.
        assert_eq!(state.logins, 1);
        assert_eq!(state.cheap_fetches, 2);
        assert!(state.message_pages.is_empty());
    }

    #[tokio::test]
    async fn nonrecoverable_error_skips_the_ladder() {
        let transport = MockTransport::default();
        transport.queue_page(Err(Error::Transfer));
        let connector = connector(transport);

        assert!(matches!(
            connector.poll_once().await.unwrap_err(),
            Error::Transfer
        ));
        let state = lock(&connector.transport.state);
        assert_eq!(state.logins, 0);
        assert_eq!(state.cheap_fetches, 0);
    }

    #[tokio::test]
    async fn quiet_window_suppresses_sends_but_not_edits() {
        let connector = connector(MockTransport::default());
        connector.hush_until(Instant::now() + Duration::from_secs(60));

        connector.send_message("muted").await.unwrap();
        assert!(lock(&connector.transport.state).posts.is_empty());

        connector
            .send_message_with(
                "urgent",
                SendOptions {
                    bypass_quiet: true,
                    ..SendOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(lock(&connector.transport.state).posts.len(), 1);

        // Edits clean up our own output and go through by default.
        connector.edit_message(5, "fixed").await.unwrap();
        assert_eq!(lock(&connector.transport.state).edits.len(), 1);
    }

    #[tokio::test]
    async fn outbound_body_is_encoded_with_custom_smilies() {
        let config = ConnectorConfig::new("http://f", "bot", "pw").custom_smilies(vec![(
            ":cake:".to_owned(),
            "http://x/cake.png".to_owned(),
        )]);
        let connector = Connector::new(MockTransport::default(), config);

        connector
            .send_message_with(
                ":cake: héllo",
                SendOptions {
                    custom_smilies: true,
                    ..SendOptions::default()
                },
            )
            .await
            .unwrap();

        let state = lock(&connector.transport.state);
        let body = &state.posts[0].1;
        assert!(body.contains("%5Bicon%5Dhttp%3A%2F%2Fx%2Fcake.png%5B%2Ficon%5D"));
        assert!(body.contains("h%E9llo"));
    }

    #[tokio::test]
    async fn login_primes_token_and_smilies() {
        let connector = connector(MockTransport::default());
        connector.login().await.unwrap();

        assert_eq!(
            connector.smiley_table().url_for_symbol(":)"),
            Some("pics/smile.gif")
        );

        connector.send_message("hi").await.unwrap();
        let state = lock(&connector.transport.state);
        assert_eq!(state.posts[0].0, "tok");
    }

    #[tokio::test]
    async fn start_spawns_the_loop_and_shutdown_joins_it() {
        let transport = MockTransport::default();
        transport.queue_page(Ok(message_page(&[(1, "alice", "hi")])));
        let connector = Arc::new(connector(transport));
        let recorder = Arc::new(Recorder::default());
        connector.subscribe(recorder.clone());

        let handle = Arc::clone(&connector).start().await.unwrap();
        for _ in 0..100 {
            if !lock(&recorder.seen).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert_eq!(lock(&recorder.seen).clone(), vec![(1, false, true)]);
    }

    #[tokio::test]
    async fn user_lookup_matches_case_insensitively_and_caches() {
        let transport = MockTransport::default();
        transport.queue_ajax("<users><user userid=\"12\">Alice</user></users>");
        let connector = connector(transport);

        assert_eq!(
            connector.user_for_name("alice").await.unwrap(),
            Some((12, "Alice".to_owned()))
        );
        // Second hit comes from the cache; the ajax script is exhausted.
        assert_eq!(
            connector.user_for_name("ALICE").await.unwrap(),
            Some((12, "Alice".to_owned()))
        );
        // Fragments below the forum's minimum are not sent at all.
        assert_eq!(connector.user_for_name("ab").await.unwrap(), None);
    }
}
