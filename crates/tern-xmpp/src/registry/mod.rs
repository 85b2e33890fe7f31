//! Session Registry.
//!
//! Thread-safe registry of live sessions. Each session carries its status
//! and the sending half of its outbound channel; the transport owns the
//! receiving half.
//!
//! ```text
//! transport (a@x.com/1) <- mpsc::Receiver --+
//!                                            |
//!                  SessionRegistry: DashMap<Jid, Arc<Session>>
//!                                            |
//! RoutingTable --------- Session::deliver ---+
//! ```

mod session_registry;

pub use session_registry::{SendResult, Session, SessionRegistry};
