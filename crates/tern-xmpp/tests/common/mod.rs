//! Shared helpers for the routing core integration tests.
//!
//! Provides a [`ServerContext`] with recording presence collaborators,
//! connected session helpers and a scriptable component.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use jid::{BareJid, Jid};
use minidom::Element;
use tern_xmpp::component::{Component, ComponentDispatcher};
use tern_xmpp::disco::{build_disco_info_response, is_disco_info_query, Feature, Identity};
use tern_xmpp::presence::{
    EntityCapabilitiesManager, MulticastRouter, PresenceHandlers, PresenceManager,
    PresenceSubscribeHandler, PresenceUpdateHandler, RemotePresenceEventDispatcher,
};
use tern_xmpp::registry::Session;
use tern_xmpp::stanza::{iq_error, iq_result};
use tern_xmpp::{CoreConfig, OutboundStanza, ServerContext, SessionKind, Stanza, XmppError};
use tokio::sync::mpsc;
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::presence::{Presence, Type as PresenceType};

/// Initialize test logging once.
pub fn init_test() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

pub fn jid(s: &str) -> Jid {
    s.parse().expect("valid test address")
}

pub fn bare(s: &str) -> BareJid {
    s.parse().expect("valid bare test address")
}

pub fn presence(type_: PresenceType, from: &str, to: Option<&str>) -> Presence {
    let mut presence = Presence::new(type_);
    presence.from = Some(jid(from));
    presence.to = to.map(jid);
    presence
}

/// Collaborator calls seen by the presence router, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Update(Option<Jid>),
    DirectedSent { target: Jid, original: Jid },
    Subscribe(PresenceType),
    Probe(Option<Jid>),
    Caps,
    Multicast,
    RemoteAvailable(Option<Jid>),
    RemoteUnavailable(Option<Jid>),
}

/// Presence collaborator that records every call.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
    failing: AtomicBool,
}

impl Recorder {
    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Make presence updates to the server fail.
    pub fn fail_updates(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl PresenceUpdateHandler for Recorder {
    async fn process(&self, presence: &Presence) -> Result<(), XmppError> {
        self.push(Call::Update(presence.from.clone()));
        if self.failing.load(Ordering::SeqCst) {
            return Err(XmppError::internal("roster store unavailable"));
        }
        Ok(())
    }

    async fn directed_presence_sent(
        &self,
        _presence: &Presence,
        target: &Jid,
        original_recipient: &Jid,
    ) -> Result<(), XmppError> {
        self.push(Call::DirectedSent {
            target: target.clone(),
            original: original_recipient.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl PresenceSubscribeHandler for Recorder {
    async fn process(&self, presence: &Presence) -> Result<(), XmppError> {
        self.push(Call::Subscribe(presence.type_.clone()));
        Ok(())
    }
}

#[async_trait]
impl PresenceManager for Recorder {
    async fn handle_probe(&self, presence: &Presence) -> Result<(), XmppError> {
        self.push(Call::Probe(presence.to.clone()));
        Ok(())
    }
}

#[async_trait]
impl EntityCapabilitiesManager for Recorder {
    async fn process(&self, _presence: &Presence) -> Result<(), XmppError> {
        self.push(Call::Caps);
        Ok(())
    }
}

#[async_trait]
impl MulticastRouter for Recorder {
    async fn route(&self, _presence: &Presence) -> Result<(), XmppError> {
        self.push(Call::Multicast);
        Ok(())
    }
}

#[async_trait]
impl RemotePresenceEventDispatcher for Recorder {
    async fn remote_user_available(&self, presence: &Presence) -> Result<(), XmppError> {
        self.push(Call::RemoteAvailable(presence.from.clone()));
        Ok(())
    }

    async fn remote_user_unavailable(&self, presence: &Presence) -> Result<(), XmppError> {
        self.push(Call::RemoteUnavailable(presence.from.clone()));
        Ok(())
    }
}

/// A context for `domain` whose presence collaborators all record into the
/// returned [`Recorder`].
pub fn recording_context(domain: &str) -> (ServerContext, Arc<Recorder>) {
    init_test();
    let recorder = Arc::new(Recorder::default());
    let handlers = PresenceHandlers {
        update: recorder.clone(),
        subscribe: recorder.clone(),
        presence_manager: recorder.clone(),
        caps: recorder.clone(),
        multicast: recorder.clone(),
        remote_events: recorder.clone(),
    };
    let context = ServerContext::with_handlers(CoreConfig::new(domain), |_, _| handlers)
        .expect("valid test config");
    (context, recorder)
}

/// A context with the default directed-presence handlers.
pub fn context(domain: &str) -> ServerContext {
    init_test();
    ServerContext::new(CoreConfig::new(domain)).expect("valid test config")
}

/// A registered session and the receiving end of its outbound channel.
pub struct TestSession {
    pub session: Arc<Session>,
    pub rx: mpsc::Receiver<OutboundStanza>,
}

impl TestSession {
    /// Everything delivered so far.
    pub fn drain(&mut self) -> Vec<Stanza> {
        let mut stanzas = Vec::new();
        while let Ok(outbound) = self.rx.try_recv() {
            stanzas.push(outbound.stanza);
        }
        stanzas
    }

    pub fn address(&self) -> &Jid {
        self.session.address()
    }
}

/// Open and authenticate a session.
pub fn connect(context: &ServerContext, address: &str, kind: SessionKind) -> TestSession {
    let (session, rx) = context.open_session(jid(address), kind);
    context
        .authenticate_session(session.address())
        .expect("authentication succeeds");
    TestSession { session, rx }
}

/// Open a session but leave it `Connecting`.
pub fn connect_unauthenticated(context: &ServerContext, address: &str) -> TestSession {
    let (session, rx) = context.open_session(jid(address), SessionKind::Client);
    TestSession { session, rx }
}

pub fn presences(stanzas: &[Stanza]) -> Vec<&Presence> {
    stanzas
        .iter()
        .filter_map(|s| match s {
            Stanza::Presence(p) => Some(p),
            _ => None,
        })
        .collect()
}

pub fn iqs(stanzas: &[Stanza]) -> Vec<&Iq> {
    stanzas
        .iter()
        .filter_map(|s| match s {
            Stanza::Iq(iq) => Some(iq),
            _ => None,
        })
        .collect()
}

/// Namespace handled by [`EchoComponent`].
pub const ECHO_NS: &str = "urn:tern:test:echo";

/// Component that answers disco#info and IQs in [`ECHO_NS`].
///
/// Every packet it receives is recorded. Initialization can be made to fail.
pub struct EchoComponent {
    name: String,
    fail_initialize: bool,
    dispatcher: OnceLock<ComponentDispatcher>,
    received: Mutex<Vec<Stanza>>,
    shut_down: Mutex<bool>,
}

impl EchoComponent {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail_initialize: false,
            dispatcher: OnceLock::new(),
            received: Mutex::new(Vec::new()),
            shut_down: Mutex::new(false),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail_initialize: true,
            dispatcher: OnceLock::new(),
            received: Mutex::new(Vec::new()),
            shut_down: Mutex::new(false),
        })
    }

    pub fn received(&self) -> Vec<Stanza> {
        self.received.lock().unwrap().clone()
    }

    /// Received IQs carrying a payload in `ns`.
    pub fn received_in(&self, ns: &str) -> usize {
        self.received()
            .iter()
            .filter(|s| match s {
                Stanza::Iq(iq) => match &iq.payload {
                    IqType::Get(el) | IqType::Set(el) => el.ns() == ns,
                    _ => false,
                },
                _ => false,
            })
            .count()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shut_down.lock().unwrap()
    }

    fn reply_for(&self, iq: &Iq) -> Option<Iq> {
        match &iq.payload {
            IqType::Get(_) if is_disco_info_query(iq) => Some(build_disco_info_response(
                iq,
                &[Identity::new("proxy", "bytestreams", Some(&self.name))],
                &[Feature::disco_info(), Feature::new(ECHO_NS)],
            )),
            IqType::Get(el) | IqType::Set(el) if el.ns() == ECHO_NS => {
                Some(iq_result(iq, Some(Element::builder("echo", ECHO_NS).build())))
            }
            IqType::Get(_) | IqType::Set(_) => Some(iq_error(
                iq,
                XmppError::feature_not_implemented(None).to_stanza_error(),
            )),
            _ => None,
        }
    }
}

#[async_trait]
impl Component for EchoComponent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(
        &self,
        _address: BareJid,
        dispatcher: ComponentDispatcher,
    ) -> Result<(), XmppError> {
        if self.fail_initialize {
            return Err(XmppError::component("initialization refused"));
        }
        let _ = self.dispatcher.set(dispatcher);
        Ok(())
    }

    async fn shutdown(&self) {
        *self.shut_down.lock().unwrap() = true;
    }

    async fn process_packet(&self, stanza: Stanza) -> Result<(), XmppError> {
        self.received.lock().unwrap().push(stanza.clone());
        let Stanza::Iq(iq) = stanza else {
            return Ok(());
        };
        let Some(reply) = self.reply_for(&iq) else {
            return Ok(());
        };
        let dispatcher = self
            .dispatcher
            .get()
            .ok_or_else(|| XmppError::component("not initialized"))?;
        dispatcher.send(Stanza::Iq(reply)).await?;
        Ok(())
    }
}

/// An IQ `get` carrying an empty element in `ns`.
pub fn iq_get(from: &str, to: &str, id: &str, ns: &str) -> Iq {
    Iq {
        from: Some(jid(from)),
        to: Some(jid(to)),
        id: id.to_string(),
        payload: IqType::Get(Element::builder("query", ns).build()),
    }
}
