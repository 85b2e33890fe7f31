//! Address helpers on top of the `jid` crate.
//!
//! `jid` already normalizes node and domain (case-insensitive) and keeps the
//! resource case-sensitive, so equality and hashing of [`Jid`], [`BareJid`]
//! and [`FullJid`] are exactly what routing needs. This module only adds the
//! server-relative predicates the router asks about.

use jid::{BareJid, Jid};

use crate::XmppError;

/// True if the address is the bare server hostname (no node, no resource).
pub fn is_server_address(jid: &Jid, server_domain: &str) -> bool {
    jid.node().is_none() && jid.resource().is_none() && jid.domain().as_str() == server_domain
}

/// True if the address belongs to the local server domain.
pub fn is_local(jid: &Jid, server_domain: &str) -> bool {
    jid.domain().as_str() == server_domain
}

/// True if the address' domain is a subdomain of the server domain.
pub fn is_subdomain_of(jid: &Jid, server_domain: &str) -> bool {
    strip_server_suffix(jid.domain().as_str(), server_domain).is_some()
}

/// Strip `.<server_domain>` from a domain, returning the subdomain label.
///
/// Returns `None` if the domain is not a strict subdomain of the server.
pub fn strip_server_suffix<'a>(domain: &'a str, server_domain: &str) -> Option<&'a str> {
    domain
        .strip_suffix(server_domain)
        .and_then(|rest| rest.strip_suffix('.'))
        .filter(|sub| !sub.is_empty())
}

/// Build a domain-only address.
pub fn domain_jid(domain: &str) -> Result<BareJid, XmppError> {
    let jid: BareJid = domain.parse()?;
    if jid.node().is_some() {
        return Err(XmppError::config(format!("'{domain}' is not a bare domain")));
    }
    Ok(jid)
}
