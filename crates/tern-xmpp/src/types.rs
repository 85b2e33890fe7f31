//! Common types for the routing core.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a session.
///
/// `Connecting` covers the window between the transport being accepted and
/// the authentication handshake completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Transport open, not yet authenticated
    Connecting,
    /// Authenticated and routable
    Connected,
    /// Torn down (or being torn down)
    Closed,
}

impl SessionStatus {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            SessionStatus::Connecting => 0,
            SessionStatus::Connected => 1,
            SessionStatus::Closed => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionStatus::Connecting,
            1 => SessionStatus::Connected,
            _ => SessionStatus::Closed,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Connected => write!(f, "connected"),
            SessionStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Kind of peer on the other end of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionKind {
    /// Client-to-server
    Client,
    /// Server-to-server
    Server,
    /// External component connection
    Component,
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionKind::Client => write!(f, "c2s"),
            SessionKind::Server => write!(f, "s2s"),
            SessionKind::Component => write!(f, "component"),
        }
    }
}

/// Stanza type for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaType {
    /// Message stanza
    Message,
    /// Presence stanza
    Presence,
    /// IQ (info/query) stanza
    Iq,
}

impl std::fmt::Display for StanzaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StanzaType::Message => write!(f, "message"),
            StanzaType::Presence => write!(f, "presence"),
            StanzaType::Iq => write!(f, "iq"),
        }
    }
}

/// MUC room affiliation (long-term standing in a room).
///
/// Declared in precedence order: `Owner < Admin < Member < Outcast < None`.
/// The derived `Ord` is used for "outranks" checks between actor and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affiliation {
    /// Room owner
    Owner,
    /// Room administrator
    Admin,
    /// Room member
    Member,
    /// Banned from the room
    Outcast,
    /// No affiliation
    None,
}

impl Affiliation {
    /// Numeric protocol code.
    pub fn value(self) -> u8 {
        match self {
            Affiliation::Owner => 10,
            Affiliation::Admin => 20,
            Affiliation::Member => 30,
            Affiliation::Outcast => 40,
            Affiliation::None => 50,
        }
    }

    /// Owners and admins are always moderators while present.
    pub fn is_privileged(self) -> bool {
        matches!(self, Affiliation::Owner | Affiliation::Admin)
    }

    /// True when `self` carries strictly more standing than `other`.
    ///
    /// Outcast and none carry no standing at all, so neither outranks
    /// the other.
    pub fn outranks(self, other: Affiliation) -> bool {
        let standing = |a: Affiliation| match a {
            Affiliation::Owner => 3,
            Affiliation::Admin => 2,
            Affiliation::Member => 1,
            Affiliation::Outcast | Affiliation::None => 0,
        };
        standing(self) > standing(other)
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Affiliation::Owner => "owner",
            Affiliation::Admin => "admin",
            Affiliation::Member => "member",
            Affiliation::Outcast => "outcast",
            Affiliation::None => "none",
        }
    }
}

impl std::fmt::Display for Affiliation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MUC room role (session-scoped).
///
/// Declared in restrictiveness order: `Moderator < Participant < Visitor < None`,
/// so `a <= b` reads "a is at least as privileged as b".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Moderator (can kick, manage voice)
    Moderator,
    /// Participant (normal user)
    Participant,
    /// Visitor (can read, no voice in moderated rooms)
    Visitor,
    /// No role (not in room)
    None,
}

impl Role {
    /// Numeric protocol code.
    pub fn value(self) -> u8 {
        match self {
            Role::Moderator => 0,
            Role::Participant => 1,
            Role::Visitor => 2,
            Role::None => 3,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Moderator => "moderator",
            Role::Participant => "participant",
            Role::Visitor => "visitor",
            Role::None => "none",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
