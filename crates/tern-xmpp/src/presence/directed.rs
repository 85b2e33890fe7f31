//! Directed presence bookkeeping.

use std::collections::HashSet;

use dashmap::DashMap;
use jid::Jid;
use tracing::debug;
use xmpp_parsers::presence::{Presence, Type as PresenceType};

/// Remembers who received directed available presence from whom.
///
/// Entries are keyed by the sender's address and dropped when the sender
/// sends unavailable to the recipient, broadcasts unavailable, or its
/// session ends.
#[derive(Debug, Default)]
pub struct DirectedPresenceTracker {
    directed: DashMap<Jid, HashSet<Jid>>,
}

impl DirectedPresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, sender: &Jid, recipient: &Jid) {
        let inserted = self
            .directed
            .entry(sender.clone())
            .or_default()
            .insert(recipient.clone());
        if inserted {
            debug!(sender = %sender, recipient = %recipient, "Recorded directed presence");
        }
    }

    pub fn forget(&self, sender: &Jid, recipient: &Jid) {
        if let Some(mut recipients) = self.directed.get_mut(sender) {
            recipients.remove(recipient);
        }
        self.directed
            .remove_if(sender, |_, recipients| recipients.is_empty());
    }

    pub fn has_directed_presence(&self, sender: &Jid, recipient: &Jid) -> bool {
        self.directed
            .get(sender)
            .map(|recipients| recipients.contains(recipient))
            .unwrap_or(false)
    }

    pub fn recipients(&self, sender: &Jid) -> Vec<Jid> {
        self.directed
            .get(sender)
            .map(|recipients| recipients.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every record for `sender`, returning the unavailable presences
    /// its recipients should now receive.
    pub fn take_for_sender(&self, sender: &Jid) -> Vec<Presence> {
        let Some((_, recipients)) = self.directed.remove(sender) else {
            return Vec::new();
        };
        recipients
            .into_iter()
            .map(|recipient| {
                let mut presence = Presence::new(PresenceType::Unavailable);
                presence.from = Some(sender.clone());
                presence.to = Some(recipient);
                presence
            })
            .collect()
    }

    /// Number of senders with at least one directed presence.
    pub fn len(&self) -> usize {
        self.directed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directed.is_empty()
    }
}
