//! Error types for the routing core.

use thiserror::Error;
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType, StanzaError};

/// XMPP core errors.
#[derive(Debug, Error)]
pub enum XmppError {
    /// Address could not be parsed
    #[error("JID error: {0}")]
    Jid(#[from] jid::Error),

    /// Component lifecycle failure (initialize/start)
    #[error("Component error: {0}")]
    Component(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Stanza error (reported to the sender as an error stanza)
    #[error("Stanza error: {condition}")]
    Stanza {
        /// Error condition
        condition: StanzaErrorCondition,
        /// Error type
        error_type: StanzaErrorType,
        /// Optional text description
        text: Option<String>,
    },
}

impl XmppError {
    /// Create a new component error.
    pub fn component(msg: impl Into<String>) -> Self {
        Self::Component(msg.into())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn stanza(
        condition: StanzaErrorCondition,
        error_type: StanzaErrorType,
        text: Option<String>,
    ) -> Self {
        Self::Stanza {
            condition,
            error_type,
            text,
        }
    }

    /// Create a stanza error for 'not-allowed'.
    pub fn not_allowed(text: Option<String>) -> Self {
        Self::stanza(StanzaErrorCondition::NotAllowed, StanzaErrorType::Cancel, text)
    }

    /// Create a stanza error for 'not-authorized'.
    pub fn not_authorized(text: Option<String>) -> Self {
        Self::stanza(StanzaErrorCondition::NotAuthorized, StanzaErrorType::Auth, text)
    }

    /// Create a stanza error for 'bad-request'.
    pub fn bad_request(text: Option<String>) -> Self {
        Self::stanza(StanzaErrorCondition::BadRequest, StanzaErrorType::Modify, text)
    }

    /// Create a stanza error for 'item-not-found'.
    pub fn item_not_found(text: Option<String>) -> Self {
        Self::stanza(StanzaErrorCondition::ItemNotFound, StanzaErrorType::Cancel, text)
    }

    /// Create a stanza error for 'forbidden'.
    pub fn forbidden(text: Option<String>) -> Self {
        Self::stanza(StanzaErrorCondition::Forbidden, StanzaErrorType::Auth, text)
    }

    /// Create a stanza error for 'conflict'.
    pub fn conflict(text: Option<String>) -> Self {
        Self::stanza(StanzaErrorCondition::Conflict, StanzaErrorType::Cancel, text)
    }

    /// Create a stanza error for 'registration-required'.
    pub fn registration_required(text: Option<String>) -> Self {
        Self::stanza(
            StanzaErrorCondition::RegistrationRequired,
            StanzaErrorType::Auth,
            text,
        )
    }

    /// Create a stanza error for 'service-unavailable'.
    pub fn service_unavailable(text: Option<String>) -> Self {
        Self::stanza(
            StanzaErrorCondition::ServiceUnavailable,
            StanzaErrorType::Cancel,
            text,
        )
    }

    /// Create a stanza error for 'feature-not-implemented'.
    pub fn feature_not_implemented(text: Option<String>) -> Self {
        Self::stanza(
            StanzaErrorCondition::FeatureNotImplemented,
            StanzaErrorType::Cancel,
            text,
        )
    }

    /// The condition reported to a peer for this error.
    ///
    /// Anything that is not already a stanza error surfaces as
    /// `internal-server-error`.
    pub fn condition(&self) -> (StanzaErrorCondition, StanzaErrorType) {
        match self {
            Self::Stanza {
                condition,
                error_type,
                ..
            } => (*condition, *error_type),
            Self::Jid(_) => (StanzaErrorCondition::JidMalformed, StanzaErrorType::Modify),
            _ => (
                StanzaErrorCondition::InternalServerError,
                StanzaErrorType::Wait,
            ),
        }
    }

    /// Build the wire-level `<error/>` for this error.
    pub fn to_stanza_error(&self) -> StanzaError {
        let (condition, error_type) = self.condition();
        let text = match self {
            Self::Stanza { text, .. } => text.clone().unwrap_or_default(),
            _ => String::new(),
        };
        StanzaError::new(
            error_type.to_parsers(),
            condition.to_parsers(),
            "en",
            text,
        )
    }
}

/// XMPP stanza error conditions (RFC 6120 Section 8.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorCondition {
    /// Bad request (malformed XML, etc.)
    BadRequest,
    /// Conflict (e.g., nickname already in use)
    Conflict,
    /// Feature not implemented
    FeatureNotImplemented,
    /// Forbidden (permission denied)
    Forbidden,
    /// Internal server error
    InternalServerError,
    /// Item not found
    ItemNotFound,
    /// JID malformed
    JidMalformed,
    /// Not acceptable
    NotAcceptable,
    /// Not allowed
    NotAllowed,
    /// Not authorized
    NotAuthorized,
    /// Policy violation
    PolicyViolation,
    /// Recipient unavailable
    RecipientUnavailable,
    /// Registration required
    RegistrationRequired,
    /// Remote server not found
    RemoteServerNotFound,
    /// Remote server timeout
    RemoteServerTimeout,
    /// Resource constraint
    ResourceConstraint,
    /// Service unavailable
    ServiceUnavailable,
    /// Subscription required
    SubscriptionRequired,
    /// Undefined condition
    UndefinedCondition,
    /// Unexpected request
    UnexpectedRequest,
}

impl StanzaErrorCondition {
    /// Get the element name for this condition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::Conflict => "conflict",
            Self::FeatureNotImplemented => "feature-not-implemented",
            Self::Forbidden => "forbidden",
            Self::InternalServerError => "internal-server-error",
            Self::ItemNotFound => "item-not-found",
            Self::JidMalformed => "jid-malformed",
            Self::NotAcceptable => "not-acceptable",
            Self::NotAllowed => "not-allowed",
            Self::NotAuthorized => "not-authorized",
            Self::PolicyViolation => "policy-violation",
            Self::RecipientUnavailable => "recipient-unavailable",
            Self::RegistrationRequired => "registration-required",
            Self::RemoteServerNotFound => "remote-server-not-found",
            Self::RemoteServerTimeout => "remote-server-timeout",
            Self::ResourceConstraint => "resource-constraint",
            Self::ServiceUnavailable => "service-unavailable",
            Self::SubscriptionRequired => "subscription-required",
            Self::UndefinedCondition => "undefined-condition",
            Self::UnexpectedRequest => "unexpected-request",
        }
    }

    /// Convert to the `xmpp-parsers` condition.
    pub fn to_parsers(self) -> DefinedCondition {
        match self {
            Self::BadRequest => DefinedCondition::BadRequest,
            Self::Conflict => DefinedCondition::Conflict,
            Self::FeatureNotImplemented => DefinedCondition::FeatureNotImplemented,
            Self::Forbidden => DefinedCondition::Forbidden,
            Self::InternalServerError => DefinedCondition::InternalServerError,
            Self::ItemNotFound => DefinedCondition::ItemNotFound,
            Self::JidMalformed => DefinedCondition::JidMalformed,
            Self::NotAcceptable => DefinedCondition::NotAcceptable,
            Self::NotAllowed => DefinedCondition::NotAllowed,
            Self::NotAuthorized => DefinedCondition::NotAuthorized,
            Self::PolicyViolation => DefinedCondition::PolicyViolation,
            Self::RecipientUnavailable => DefinedCondition::RecipientUnavailable,
            Self::RegistrationRequired => DefinedCondition::RegistrationRequired,
            Self::RemoteServerNotFound => DefinedCondition::RemoteServerNotFound,
            Self::RemoteServerTimeout => DefinedCondition::RemoteServerTimeout,
            Self::ResourceConstraint => DefinedCondition::ResourceConstraint,
            Self::ServiceUnavailable => DefinedCondition::ServiceUnavailable,
            Self::SubscriptionRequired => DefinedCondition::SubscriptionRequired,
            Self::UndefinedCondition => DefinedCondition::UndefinedCondition,
            Self::UnexpectedRequest => DefinedCondition::UnexpectedRequest,
        }
    }

    /// Convert from the `xmpp-parsers` condition, if it is one we model.
    pub fn from_parsers(condition: &DefinedCondition) -> Option<Self> {
        Some(match condition {
            DefinedCondition::BadRequest => Self::BadRequest,
            DefinedCondition::Conflict => Self::Conflict,
            DefinedCondition::FeatureNotImplemented => Self::FeatureNotImplemented,
            DefinedCondition::Forbidden => Self::Forbidden,
            DefinedCondition::InternalServerError => Self::InternalServerError,
            DefinedCondition::ItemNotFound => Self::ItemNotFound,
            DefinedCondition::JidMalformed => Self::JidMalformed,
            DefinedCondition::NotAcceptable => Self::NotAcceptable,
            DefinedCondition::NotAllowed => Self::NotAllowed,
            DefinedCondition::NotAuthorized => Self::NotAuthorized,
            DefinedCondition::PolicyViolation => Self::PolicyViolation,
            DefinedCondition::RecipientUnavailable => Self::RecipientUnavailable,
            DefinedCondition::RegistrationRequired => Self::RegistrationRequired,
            DefinedCondition::RemoteServerNotFound => Self::RemoteServerNotFound,
            DefinedCondition::RemoteServerTimeout => Self::RemoteServerTimeout,
            DefinedCondition::ResourceConstraint => Self::ResourceConstraint,
            DefinedCondition::ServiceUnavailable => Self::ServiceUnavailable,
            DefinedCondition::SubscriptionRequired => Self::SubscriptionRequired,
            DefinedCondition::UndefinedCondition => Self::UndefinedCondition,
            DefinedCondition::UnexpectedRequest => Self::UnexpectedRequest,
            _ => return None,
        })
    }
}

impl std::fmt::Display for StanzaErrorCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// XMPP stanza error types (RFC 6120 Section 8.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorType {
    /// Retry after providing credentials
    Auth,
    /// Do not retry (unrecoverable error)
    Cancel,
    /// Retry after changing the data sent
    Modify,
    /// Retry after waiting (temporary error)
    Wait,
}

impl StanzaErrorType {
    /// Get the type attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Cancel => "cancel",
            Self::Modify => "modify",
            Self::Wait => "wait",
        }
    }

    /// Convert to the `xmpp-parsers` error type.
    pub fn to_parsers(self) -> ErrorType {
        match self {
            Self::Auth => ErrorType::Auth,
            Self::Cancel => ErrorType::Cancel,
            Self::Modify => ErrorType::Modify,
            Self::Wait => ErrorType::Wait,
        }
    }
}

impl std::fmt::Display for StanzaErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
