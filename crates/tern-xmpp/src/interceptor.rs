//! Packet interceptor chain.
//!
//! Interceptors see every stanza twice: before it is processed and after.
//! A rejection in the pre-processing phase stops the stanza; in the
//! post-processing phase it is only reported, since delivery already
//! happened.
//!
//! Incoming stanzas are intercepted by the routers. Outgoing stanzas are
//! intercepted where the transport drains a session's outbound channel,
//! through [`ServerContext::intercept_outgoing`] and
//! [`ServerContext::outgoing_written`].
//!
//! [`ServerContext::intercept_outgoing`]: crate::ServerContext::intercept_outgoing
//! [`ServerContext::outgoing_written`]: crate::ServerContext::outgoing_written

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use crate::registry::Session;
use crate::stanza::Stanza;

/// An interceptor vetoed a stanza.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("packet rejected{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
pub struct PacketRejected {
    /// Optional human-readable text sent back to the sender.
    pub reason: Option<String>,
}

impl PacketRejected {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }
}

/// Hook invoked around stanza processing.
pub trait PacketInterceptor: Send + Sync {
    /// Inspect a stanza.
    ///
    /// `incoming` is true for stanzas read from `session`, and `processed`
    /// is false in the pre-processing phase and true after processing.
    fn intercept(
        &self,
        stanza: &Stanza,
        session: Option<&Session>,
        incoming: bool,
        processed: bool,
    ) -> Result<(), PacketRejected>;
}

type InterceptorList = Arc<Vec<Arc<dyn PacketInterceptor>>>;

/// Ordered interceptor pipeline.
///
/// Global interceptors run first, then the ones registered for the user the
/// session belongs to. Iteration always works on a snapshot, so adding or
/// removing an interceptor never disturbs a stanza in flight.
#[derive(Default)]
pub struct InterceptorChain {
    global: RwLock<InterceptorList>,
    per_user: DashMap<String, InterceptorList>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> InterceptorList {
        Arc::clone(&self.global.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn update(&self, f: impl FnOnce(&mut Vec<Arc<dyn PacketInterceptor>>)) {
        let mut guard = self.global.write().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<_> = guard.as_ref().clone();
        f(&mut list);
        *guard = Arc::new(list);
    }

    /// Append a global interceptor.
    pub fn add(&self, interceptor: Arc<dyn PacketInterceptor>) {
        self.update(|list| list.push(interceptor));
    }

    /// Insert a global interceptor at `index`, clamped to the list length.
    pub fn add_at(&self, index: usize, interceptor: Arc<dyn PacketInterceptor>) {
        self.update(|list| {
            let index = index.min(list.len());
            list.insert(index, interceptor);
        });
    }

    /// Remove a global interceptor by identity. Returns true if it was found.
    pub fn remove(&self, interceptor: &Arc<dyn PacketInterceptor>) -> bool {
        let mut removed = false;
        self.update(|list| {
            let before = list.len();
            list.retain(|i| !same_interceptor(i, interceptor));
            removed = list.len() != before;
        });
        removed
    }

    pub fn add_user_interceptor(&self, username: &str, interceptor: Arc<dyn PacketInterceptor>) {
        let mut entry = self.per_user.entry(username.to_string()).or_default();
        let mut list: Vec<_> = entry.as_ref().clone();
        list.push(interceptor);
        *entry = Arc::new(list);
    }

    pub fn remove_user_interceptor(
        &self,
        username: &str,
        interceptor: &Arc<dyn PacketInterceptor>,
    ) -> bool {
        let Some(mut entry) = self.per_user.get_mut(username) else {
            return false;
        };
        let before = entry.len();
        let list: Vec<_> = entry
            .iter()
            .filter(|i| !same_interceptor(i, interceptor))
            .cloned()
            .collect();
        let removed = list.len() != before;
        let now_empty = list.is_empty();
        *entry = Arc::new(list);
        drop(entry);
        if now_empty {
            self.per_user.remove_if(username, |_, list| list.is_empty());
        }
        removed
    }

    /// Number of global interceptors.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the chain. The first rejection short-circuits the rest.
    pub fn invoke(
        &self,
        stanza: &Stanza,
        session: Option<&Session>,
        incoming: bool,
        processed: bool,
    ) -> Result<(), PacketRejected> {
        for interceptor in self.snapshot().iter() {
            interceptor.intercept(stanza, session, incoming, processed)?;
        }

        let user_list = session
            .and_then(|s| s.username())
            .and_then(|username| self.per_user.get(username).map(|l| Arc::clone(l.value())));
        if let Some(list) = user_list {
            for interceptor in list.iter() {
                interceptor.intercept(stanza, session, incoming, processed)?;
            }
        }

        debug!(stanza = stanza.name(), incoming, processed, "Interceptors passed");
        Ok(())
    }
}

fn same_interceptor(a: &Arc<dyn PacketInterceptor>, b: &Arc<dyn PacketInterceptor>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("global", &self.len())
            .field("users", &self.per_user.len())
            .finish()
    }
}
