//! Message visibility tracking and change classification.

use std::collections::HashMap;

use crate::message::ChatMessage;

/// A change observed in the chatbox, ready for dispatch.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// The message as freshly scraped.
    pub message: ChatMessage,
    /// True when a previously seen message id reappeared with a changed
    /// body.
    pub edited: bool,
    /// True for every event of the first successful poll after
    /// (re)connecting, so subscribers can suppress history replay.
    pub initial_salvo: bool,
    /// True when the author is on the configured ban list. Delivery
    /// still happens; suppression is the subscriber's call.
    pub sender_banned: bool,
}

/// Tracks which messages are visible and classifies each poll's rows as
/// new, edited, or unchanged.
///
/// Per message id the lifecycle is unseen → visible → (edited ↔
/// visible)* → forgotten, where forgetting is silent: an id missing
/// from the latest page has scrolled out of the forum's window, not
/// been deleted, so no event fires and a later reappearance counts as
/// new again.
#[derive(Debug, Default)]
pub struct MessageStore {
    bodies: HashMap<u64, String>,
    watermark: Option<u64>,
    initial_salvo: bool,
}

impl MessageStore {
    /// Creates an empty store; the next diff is the initial salvo.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bodies: HashMap::new(),
            watermark: None,
            initial_salvo: true,
        }
    }

    /// Highest message id observed so far. Never regresses, even if the
    /// forum temporarily shows a smaller maximum.
    #[must_use]
    pub const fn watermark(&self) -> Option<u64> {
        self.watermark
    }

    /// Number of currently visible messages.
    #[must_use]
    pub fn visible_len(&self) -> usize {
        self.bodies.len()
    }

    /// Classifies freshly scraped rows against the previous poll.
    ///
    /// Returns new/edited events in ascending message id order,
    /// regardless of page order. Ids absent from `rows` are evicted
    /// silently. `is_banned` is consulted per author for the event
    /// flag.
    pub fn diff(
        &mut self,
        rows: Vec<ChatMessage>,
        is_banned: impl Fn(&str) -> bool,
    ) -> Vec<MessageEvent> {
        let mut events = Vec::new();
        let mut visible: HashMap<u64, String> = HashMap::with_capacity(rows.len());

        for message in rows {
            if self.watermark.is_none_or(|mark| mark < message.id) {
                self.watermark = Some(message.id);
            }

            let changed = match self.bodies.get(&message.id) {
                None => Some(false),
                Some(old_body) if *old_body != message.body_html => Some(true),
                Some(_) => None,
            };

            visible.insert(message.id, message.body_html.clone());

            if let Some(edited) = changed {
                let sender_banned = is_banned(&message.author_name);
                events.push(MessageEvent {
                    message,
                    edited,
                    initial_salvo: self.initial_salvo,
                    sender_banned,
                });
            }
        }

        // Entries not on the page anymore scrolled out of view; forget
        // them without an event.
        self.bodies = visible;
        self.initial_salvo = false;

        events.sort_by_key(|event| event.message.id);
        events
    }

    /// Resets the salvo flag, e.g. after a reconnect, so the next poll
    /// is treated as catching up on history.
    pub fn mark_reconnected(&mut self) {
        self.initial_salvo = true;
    }
}
