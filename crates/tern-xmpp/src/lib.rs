//! # tern-xmpp
//!
//! Routing core of the Tern XMPP server.
//!
//! This crate decides where every stanza goes once a transport has parsed
//! it. It has no listeners and no storage; transports feed it stanzas
//! through a [`ServerContext`] and drain per-session outbound channels.
//!
//! ## Architecture
//!
//! - **Routing Table**: address -> local session, internal component or
//!   remote server route
//! - **Session Registry**: live sessions and their status
//! - **Presence Router**: availability, directed presence, subscriptions
//!   and probes (RFC 6121)
//! - **Interceptor Chain**: global and per-user packet vetoes
//! - **Component Dispatch Table**: internal services at subdomains, with
//!   disco registration (XEP-0030)
//! - **MUC**: occupant role/affiliation state machine and the built-in
//!   multi-user chat service (XEP-0045)
//!
//! ```text
//! transport ──> ServerContext::route_stanza ──> InterceptorChain
//!                        │                            │
//!                        ├─ presence ─> PresenceRouter┤
//!                        │                            v
//!                        └──────────────────────> RoutingTable ──> Session / Component / s2s
//! ```

pub mod address;
pub mod component;
pub mod config;
pub mod context;
pub mod disco;
pub mod interceptor;
pub mod muc;
pub mod presence;
pub mod registry;
pub mod routing;
pub mod stanza;

mod error;
mod types;

pub use config::{CoreConfig, MucConfig};
pub use context::ServerContext;
pub use error::{StanzaErrorCondition, StanzaErrorType, XmppError};
pub use interceptor::{InterceptorChain, PacketInterceptor, PacketRejected};
pub use routing::{RouteTarget, RouterConfig, RoutingResult, RoutingTable};
pub use stanza::{OutboundStanza, Stanza};
pub use types::*;
