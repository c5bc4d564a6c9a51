//! In-memory client and connector that record every call, for unit tests.

use super::{
    ClientError, ClientVersion, ConnectOptions, Connection, Connector, Credentials, DocumentMessage,
    GroupMetadata, GroupSetting, OutgoingMessage, ParticipantAction, Participant, WaClient, WaEvent,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One recorded side effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send {
        jid: String,
        message: OutgoingMessage,
    },
    Setting {
        jid: String,
        setting: GroupSetting,
    },
    Participants {
        jid: String,
        participants: Vec<String>,
        action: ParticipantAction,
    },
    Metadata {
        jid: String,
    },
    Download,
    PairingCode {
        number: String,
    },
}

#[derive(Default)]
pub struct FakeClient {
    calls: Mutex<Vec<Call>>,
    groups: Mutex<HashMap<String, GroupMetadata>>,
    media: Mutex<Vec<u8>>,
    fail_participants: Mutex<bool>,
    pairing_code: Mutex<String>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            pairing_code: Mutex::new("WOLF-1234".to_string()),
            ..Default::default()
        }
    }

    /// Register a group with `(jid, admin)` members.
    pub fn with_group(self, jid: &str, subject: &str, members: &[(&str, Option<&str>)]) -> Self {
        let participants = members
            .iter()
            .map(|(id, admin)| Participant {
                id: id.to_string(),
                admin: admin.map(str::to_string),
            })
            .collect();
        self.groups.lock().unwrap().insert(
            jid.to_string(),
            GroupMetadata {
                id: jid.to_string(),
                subject: subject.to_string(),
                participants,
            },
        );
        self
    }

    /// Bytes returned by `download_media`.
    pub fn with_media(self, bytes: impl Into<Vec<u8>>) -> Self {
        *self.media.lock().unwrap() = bytes.into();
        self
    }

    /// Make every `group_participants_update` fail (after recording it).
    pub fn failing_participant_updates(self) -> Self {
        *self.fail_participants.lock().unwrap() = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Only the messages sent, in order.
    pub fn sent(&self) -> Vec<(String, OutgoingMessage)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { jid, message } => Some((jid, message)),
                _ => None,
            })
            .collect()
    }

    /// Calls that change something (sends, settings, membership).
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    Call::Send { .. } | Call::Setting { .. } | Call::Participants { .. }
                )
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl WaClient for FakeClient {
    async fn send_message(&self, jid: &str, message: OutgoingMessage) -> Result<(), ClientError> {
        self.record(Call::Send {
            jid: jid.to_string(),
            message,
        });
        Ok(())
    }

    async fn group_setting_update(&self, jid: &str, setting: GroupSetting) -> Result<(), ClientError> {
        self.record(Call::Setting {
            jid: jid.to_string(),
            setting,
        });
        Ok(())
    }

    async fn group_participants_update(
        &self,
        jid: &str,
        participants: &[String],
        action: ParticipantAction,
    ) -> Result<(), ClientError> {
        self.record(Call::Participants {
            jid: jid.to_string(),
            participants: participants.to_vec(),
            action,
        });
        if *self.fail_participants.lock().unwrap() {
            return Err(ClientError::Unavailable("participant update rejected".to_string()));
        }
        Ok(())
    }

    async fn group_metadata(&self, jid: &str) -> Result<GroupMetadata, ClientError> {
        self.record(Call::Metadata {
            jid: jid.to_string(),
        });
        self.groups
            .lock()
            .unwrap()
            .get(jid)
            .cloned()
            .ok_or_else(|| ClientError::Unavailable(format!("unknown group {}", jid)))
    }

    async fn download_media(&self, _document: &DocumentMessage) -> Result<Vec<u8>, ClientError> {
        self.record(Call::Download);
        Ok(self.media.lock().unwrap().clone())
    }

    async fn request_pairing_code(&self, number: &str) -> Result<String, ClientError> {
        self.record(Call::PairingCode {
            number: number.to_string(),
        });
        Ok(self.pairing_code.lock().unwrap().clone())
    }
}

/// Connector that hands out one shared [`FakeClient`] and keeps the event senders so tests can
/// inject events.
pub struct FakeConnector {
    pub client: Arc<FakeClient>,
    connects: AtomicUsize,
    fail_version: bool,
    /// When true, connect reports the session as already linked.
    registered_on_connect: bool,
    /// `connect` for this number never returns.
    hang_for: Option<String>,
    options: Mutex<Vec<ConnectOptions>>,
    senders: Mutex<HashMap<String, mpsc::Sender<WaEvent>>>,
}

impl FakeConnector {
    pub fn new(client: Arc<FakeClient>) -> Self {
        Self {
            client,
            connects: AtomicUsize::new(0),
            fail_version: false,
            registered_on_connect: false,
            hang_for: None,
            options: Mutex::new(Vec::new()),
            senders: Mutex::new(HashMap::new()),
        }
    }

    pub fn failing_version(mut self) -> Self {
        self.fail_version = true;
        self
    }

    pub fn registered_on_connect(mut self) -> Self {
        self.registered_on_connect = true;
        self
    }

    pub fn hanging_for(mut self, number: &str) -> Self {
        self.hang_for = Some(number.to_string());
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn connect_options(&self) -> Vec<ConnectOptions> {
        self.options.lock().unwrap().clone()
    }

    /// Push an event into the session for `number`. Panics if it was never connected.
    pub async fn emit(&self, number: &str, event: WaEvent) {
        let tx = self
            .senders
            .lock()
            .unwrap()
            .get(number)
            .cloned()
            .expect("session not connected");
        tx.send(event).await.expect("session event loop stopped");
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn fetch_latest_version(&self) -> Result<ClientVersion, ClientError> {
        if self.fail_version {
            return Err(ClientError::Unavailable("version endpoint down".to_string()));
        }
        Ok(ClientVersion("2.3000.0".to_string()))
    }

    async fn connect(&self, options: ConnectOptions) -> Result<Connection, ClientError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.hang_for.as_deref() == Some(options.number.as_str()) {
            std::future::pending::<()>().await;
        }
        let mut credentials: Credentials = options.credentials.clone();
        credentials.instance = Some(options.number.clone());
        if self.registered_on_connect {
            credentials.registered = true;
        }
        let (tx, rx) = mpsc::channel(16);
        self.senders
            .lock()
            .unwrap()
            .insert(options.number.clone(), tx);
        self.options.lock().unwrap().push(options);
        Ok(Connection {
            client: self.client.clone(),
            credentials,
            events: rx,
        })
    }
}
