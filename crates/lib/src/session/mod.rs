//! Sessions: credential store, bootstrap, and the process-wide registry of live connections.
//!
//! A session is one linked phone number: its credential directory plus a live connection to
//! the messaging client. The registry is the only shared state; entries are inserted on first
//! pairing and live for the rest of the process.

mod store;

pub use store::SessionStore;

use crate::client::{
    BrowserIdentity, ClientError, ConnectOptions, ConnectionState, Connector, Credentials, WaClient,
    WaEvent,
};
use crate::commands::Dispatcher;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid phone number")]
    InvalidNumber,
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credentials at {}: {source}", .path.display())]
    Credentials {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// What a pairing request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairOutcome {
    /// Code to enter on the phone to link the number.
    Code(String),
    AlreadyConnected,
}

impl fmt::Display for PairOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairOutcome::Code(code) => f.write_str(code),
            PairOutcome::AlreadyConnected => f.write_str("Already Connected"),
        }
    }
}

/// A live session.
pub struct SessionHandle {
    pub number: String,
    pub client: Arc<dyn WaClient>,
    credentials: Arc<RwLock<Credentials>>,
    events_task: JoinHandle<()>,
}

impl SessionHandle {
    pub async fn is_registered(&self) -> bool {
        self.credentials.read().await.registered
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.events_task.abort();
    }
}

/// Fold an update into the current credentials. Fields the update leaves empty are kept, and
/// `registered` never goes back to false.
fn merge_credentials(current: &mut Credentials, update: Credentials) {
    current.registered |= update.registered;
    if update.instance.is_some() {
        current.instance = update.instance;
    }
    if update.token.is_some() {
        current.token = update.token;
    }
    if update.me.is_some() {
        current.me = update.me;
    }
}

/// Shared collaborators every session needs.
struct SessionDeps {
    store: Arc<SessionStore>,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<Dispatcher>,
    browser: BrowserIdentity,
}

/// Bootstrap one session: ensure the credential directory, load credentials, fetch the client
/// version, connect, and start the event loop.
async fn start_session(
    deps: &SessionDeps,
    number: &str,
) -> Result<(Arc<SessionHandle>, PairOutcome), SessionError> {
    let loaded = deps.store.load_or_init(number).await?;
    let version = deps.connector.fetch_latest_version().await?;
    let connection = deps
        .connector
        .connect(ConnectOptions {
            number: number.to_string(),
            version,
            credentials: loaded.clone(),
            browser: deps.browser.clone(),
        })
        .await?;

    let mut credentials = loaded;
    merge_credentials(&mut credentials, connection.credentials);
    deps.store.save(number, &credentials).await?;
    let registered = credentials.registered;
    let credentials = Arc::new(RwLock::new(credentials));

    let events_task = tokio::spawn(run_events(
        number.to_string(),
        connection.events,
        deps.store.clone(),
        credentials.clone(),
        connection.client.clone(),
        deps.dispatcher.clone(),
    ));
    let handle = Arc::new(SessionHandle {
        number: number.to_string(),
        client: connection.client,
        credentials,
        events_task,
    });

    let outcome = if registered {
        PairOutcome::AlreadyConnected
    } else {
        PairOutcome::Code(handle.client.request_pairing_code(number).await?)
    };
    Ok((handle, outcome))
}

/// Per-session event loop: persist credential updates, log connection changes, and dispatch the
/// first message of each batch on its own task.
async fn run_events(
    number: String,
    mut events: mpsc::Receiver<WaEvent>,
    store: Arc<SessionStore>,
    credentials: Arc<RwLock<Credentials>>,
    client: Arc<dyn WaClient>,
    dispatcher: Arc<Dispatcher>,
) {
    while let Some(event) = events.recv().await {
        match event {
            WaEvent::CredsUpdate(update) => {
                let snapshot = {
                    let mut g = credentials.write().await;
                    merge_credentials(&mut g, update);
                    g.clone()
                };
                if let Err(e) = store.save(&number, &snapshot).await {
                    log::warn!("session {}: saving credentials failed: {}", number, e);
                }
            }
            WaEvent::ConnectionUpdate(ConnectionState::Open) => {
                log::info!("connected: {}", number);
            }
            WaEvent::ConnectionUpdate(state) => {
                log::debug!("session {}: connection {:?}", number, state);
            }
            WaEvent::MessagesUpsert(messages) => {
                let Some(message) = messages.into_iter().next() else {
                    continue;
                };
                let client = client.clone();
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher.dispatch(client.as_ref(), &message).await;
                });
            }
        }
    }
    log::debug!("session {}: event stream closed", number);
}

/// Process-wide map of phone number to live session.
pub struct SessionRegistry {
    deps: SessionDeps,
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    /// One lock per number: a number never gets two connections, and a slow bootstrap only
    /// holds up later requests for the same number.
    bootstrap: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<SessionStore>,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<Dispatcher>,
        browser: BrowserIdentity,
    ) -> Self {
        Self {
            deps: SessionDeps {
                store,
                connector,
                dispatcher,
                browser,
            },
            sessions: RwLock::new(HashMap::new()),
            bootstrap: Mutex::new(HashMap::new()),
        }
    }

    /// Start (or reuse) the session for `number` and return a pairing code, or
    /// [`PairOutcome::AlreadyConnected`] once the number is linked.
    pub async fn pair(&self, number: &str) -> Result<PairOutcome, SessionError> {
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(SessionError::InvalidNumber);
        }
        let lock = self.number_lock(number).await;
        let _guard = lock.lock().await;
        if let Some(handle) = self.get(number).await {
            if handle.is_registered().await {
                return Ok(PairOutcome::AlreadyConnected);
            }
            let code = handle.client.request_pairing_code(number).await?;
            return Ok(PairOutcome::Code(code));
        }
        let (handle, outcome) = start_session(&self.deps, number).await?;
        self.sessions
            .write()
            .await
            .insert(number.to_string(), handle);
        log::info!("session {} started", number);
        Ok(outcome)
    }

    async fn number_lock(&self, number: &str) -> Arc<Mutex<()>> {
        self.bootstrap
            .lock()
            .await
            .entry(number.to_string())
            .or_default()
            .clone()
    }

    /// Reattach every stored session that already completed pairing. Returns how many resumed.
    pub async fn resume_all(&self) -> usize {
        let numbers = match self.deps.store.registered_numbers().await {
            Ok(n) => n,
            Err(e) => {
                log::warn!("listing stored sessions failed: {}", e);
                return 0;
            }
        };
        let mut resumed = 0;
        for number in numbers {
            match self.pair(&number).await {
                Ok(_) => resumed += 1,
                Err(e) => log::warn!("resuming session {} failed: {}", number, e),
            }
        }
        resumed
    }

    pub async fn get(&self, number: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(number).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn numbers(&self) -> Vec<String> {
        let mut n: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        n.sort();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::{Call, FakeClient, FakeConnector};
    use crate::client::{OutgoingMessage, WaMessage};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        root: PathBuf,
        client: Arc<FakeClient>,
        connector: Arc<FakeConnector>,
        registry: SessionRegistry,
    }

    fn harness_with(connector: impl FnOnce(Arc<FakeClient>) -> FakeConnector) -> Harness {
        let root = std::env::temp_dir().join(format!("techwolf-sessions-{}", uuid::Uuid::new_v4()));
        let client = Arc::new(FakeClient::new());
        let connector = Arc::new(connector(client.clone()));
        let registry = SessionRegistry::new(
            Arc::new(SessionStore::new(&root)),
            connector.clone(),
            Arc::new(Dispatcher::new(".", "TECHWOLF", Duration::ZERO)),
            BrowserIdentity::default(),
        );
        Harness {
            root,
            client,
            connector,
            registry,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeConnector::new)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn first_pair_returns_code_and_creates_session_dir() {
        let h = harness();
        let outcome = h.registry.pair("254700000000").await.expect("pair");
        assert_eq!(outcome, PairOutcome::Code("WOLF-1234".to_string()));
        assert!(h.root.join("254700000000").join("creds.json").is_file());
        assert_eq!(h.connector.connect_count(), 1);
        let opts = h.connector.connect_options();
        assert_eq!(opts[0].browser, BrowserIdentity::default());
        assert_eq!(opts[0].version.0, "2.3000.0");
    }

    #[tokio::test]
    async fn second_pair_after_registration_is_already_connected() {
        let h = harness();
        h.registry.pair("254700000000").await.expect("pair");
        h.connector
            .emit(
                "254700000000",
                WaEvent::CredsUpdate(Credentials {
                    registered: true,
                    ..Default::default()
                }),
            )
            .await;
        let handle = h.registry.get("254700000000").await.expect("handle");
        for _ in 0..100 {
            if handle.is_registered().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let again = h.registry.pair("254700000000").await.expect("pair again");
        assert_eq!(again, PairOutcome::AlreadyConnected);
        assert_eq!(again.to_string(), "Already Connected");
        assert_eq!(h.connector.connect_count(), 1);
        assert_eq!(h.registry.len().await, 1);
        let dirs = std::fs::read_dir(&h.root).expect("read root").count();
        assert_eq!(dirs, 1);

        // The update was persisted, instance from connect kept.
        let stored = SessionStore::new(&h.root)
            .load_or_init("254700000000")
            .await
            .expect("load");
        assert!(stored.registered);
        assert_eq!(stored.instance.as_deref(), Some("254700000000"));
    }

    #[tokio::test]
    async fn unregistered_session_gets_a_fresh_code_without_reconnecting() {
        let h = harness();
        h.registry.pair("111").await.expect("pair");
        let again = h.registry.pair("111").await.expect("pair again");
        assert!(matches!(again, PairOutcome::Code(_)));
        assert_eq!(h.connector.connect_count(), 1);
        let codes = h
            .client
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::PairingCode { .. }))
            .count();
        assert_eq!(codes, 2);
    }

    #[tokio::test]
    async fn already_linked_on_connect_skips_pairing_code() {
        let h = harness_with(|c| FakeConnector::new(c).registered_on_connect());
        assert_eq!(
            h.registry.pair("111").await.expect("pair"),
            PairOutcome::AlreadyConnected
        );
        assert!(h.client.calls().is_empty());
    }

    #[tokio::test]
    async fn bootstrap_failure_propagates_and_registers_nothing() {
        let h = harness_with(|c| FakeConnector::new(c).failing_version());
        let err = h.registry.pair("111").await.expect_err("should fail");
        assert!(matches!(err, SessionError::Client(_)));
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn a_stuck_bootstrap_only_holds_up_its_own_number() {
        let h = harness_with(|c| FakeConnector::new(c).hanging_for("111"));
        let registry = Arc::new(h.registry);
        let stuck = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.pair("111").await })
        };
        let connector = h.connector.clone();
        wait_until(move || connector.connect_count() == 1).await;

        let other = tokio::time::timeout(Duration::from_secs(2), registry.pair("222"))
            .await
            .expect("pair(222) waited on 111's bootstrap")
            .expect("pair(222)");
        assert_eq!(other, PairOutcome::Code("WOLF-1234".to_string()));

        // The same number still waits for the bootstrap in flight.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), registry.pair("111"))
                .await
                .is_err()
        );
        assert_eq!(h.connector.connect_count(), 2);
        assert!(!stuck.is_finished());
        stuck.abort();
    }

    #[tokio::test]
    async fn invalid_numbers_are_rejected() {
        let h = harness();
        assert!(matches!(h.registry.pair("").await, Err(SessionError::InvalidNumber)));
        assert!(matches!(
            h.registry.pair("12ab").await,
            Err(SessionError::InvalidNumber)
        ));
        assert_eq!(h.connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn first_message_of_each_batch_is_dispatched() {
        let h = harness();
        h.registry.pair("111").await.expect("pair");
        let msg = |text: &str| -> WaMessage {
            serde_json::from_value(json!({
                "key": { "remoteJid": "222@s.whatsapp.net" },
                "message": { "conversation": text }
            }))
            .expect("message")
        };
        h.connector
            .emit("111", WaEvent::MessagesUpsert(vec![msg(".ping"), msg(".alive")]))
            .await;
        let client = h.client.clone();
        wait_until(move || !client.sent().is_empty()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            h.client.sent(),
            vec![(
                "222@s.whatsapp.net".to_string(),
                OutgoingMessage::text("Pong 🏓")
            )]
        );
    }

    #[tokio::test]
    async fn resume_all_reattaches_registered_sessions() {
        let h = harness();
        let store = SessionStore::new(&h.root);
        store
            .save(
                "111",
                &Credentials {
                    registered: true,
                    ..Default::default()
                },
            )
            .await
            .expect("save");
        store.load_or_init("222").await.expect("init");

        assert_eq!(h.registry.resume_all().await, 1);
        assert_eq!(h.registry.numbers().await, vec!["111"]);
        assert!(h.client.calls().is_empty());
    }

    #[test]
    fn merge_keeps_known_fields_and_never_unregisters() {
        let mut current = Credentials {
            registered: true,
            instance: Some("i".to_string()),
            token: Some("t".to_string()),
            me: None,
        };
        merge_credentials(
            &mut current,
            Credentials {
                registered: false,
                instance: None,
                token: None,
                me: Some("me@s.whatsapp.net".to_string()),
            },
        );
        assert!(current.registered);
        assert_eq!(current.instance.as_deref(), Some("i"));
        assert_eq!(current.me.as_deref(), Some("me@s.whatsapp.net"));
    }
}
