//! Messaging client seam.
//!
//! The protocol stack (pairing, session crypto, framing) lives outside this crate. The bot talks
//! to it through [`Connector`] (open a session for a number) and [`WaClient`] (the per-session
//! action surface). Events flow back on the `mpsc` receiver returned in [`Connection`].

pub mod evolution;
#[cfg(test)]
pub mod fake;
mod message;

pub use evolution::{EvolutionConnector, WebhookRouter};
pub use message::{ContextInfo, DocumentMessage, ExtendedText, MessageContent, MessageKey, WaMessage};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Errors from the messaging client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} returned {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("client unavailable: {0}")]
    Unavailable(String),
}

/// Persisted per-number credentials. The store treats this as opaque JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// True once the number has been linked (pairing completed).
    #[serde(default)]
    pub registered: bool,
    /// Instance name on the bridge.
    #[serde(default)]
    pub instance: Option<String>,
    /// Per-instance secret issued at creation.
    #[serde(default)]
    pub token: Option<String>,
    /// The linked account's own JID, once known.
    #[serde(default)]
    pub me: Option<String>,
}

/// Client identity announced to the platform: (name, browser, version).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserIdentity(pub String, pub String, pub String);

impl Default for BrowserIdentity {
    fn default() -> Self {
        Self("TECHWOLF".to_string(), "Chrome".to_string(), "1.0".to_string())
    }
}

/// Protocol/client version reported by the connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientVersion(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// Events emitted by a live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum WaEvent {
    /// Credentials changed and should be persisted.
    CredsUpdate(Credentials),
    ConnectionUpdate(ConnectionState),
    /// A batch of inbound messages (only the first is dispatched).
    MessagesUpsert(Vec<WaMessage>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSetting {
    /// Only admins may post.
    Announcement,
    /// Everyone may post.
    NotAnnouncement,
}

impl GroupSetting {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupSetting::Announcement => "announcement",
            GroupSetting::NotAnnouncement => "not_announcement",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}

impl ParticipantAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ParticipantAction::Add => "add",
            ParticipantAction::Remove => "remove",
            ParticipantAction::Promote => "promote",
            ParticipantAction::Demote => "demote",
        }
    }
}

/// Group member record. `admin` is `None` for plain members, `Some("admin" | "superadmin")` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(default)]
    pub admin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

/// Outgoing message body.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingMessage {
    Text {
        text: String,
        mentions: Vec<String>,
    },
    Document {
        bytes: Vec<u8>,
        mimetype: String,
        file_name: String,
    },
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        OutgoingMessage::Text {
            text: text.into(),
            mentions: Vec::new(),
        }
    }
}

/// Action surface of one live session.
#[async_trait]
pub trait WaClient: Send + Sync {
    async fn send_message(&self, jid: &str, message: OutgoingMessage) -> Result<(), ClientError>;

    async fn group_setting_update(&self, jid: &str, setting: GroupSetting) -> Result<(), ClientError>;

    async fn group_participants_update(
        &self,
        jid: &str,
        participants: &[String],
        action: ParticipantAction,
    ) -> Result<(), ClientError>;

    async fn group_metadata(&self, jid: &str) -> Result<GroupMetadata, ClientError>;

    async fn download_media(&self, document: &DocumentMessage) -> Result<Vec<u8>, ClientError>;

    /// Ask the platform for a code that links `number` to this session.
    async fn request_pairing_code(&self, number: &str) -> Result<String, ClientError>;
}

/// Options for opening one session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub number: String,
    pub version: ClientVersion,
    pub credentials: Credentials,
    pub browser: BrowserIdentity,
}

/// A live session: the action surface, the credentials as the client sees them after
/// attaching, and the event stream.
pub struct Connection {
    pub client: std::sync::Arc<dyn WaClient>,
    pub credentials: Credentials,
    pub events: mpsc::Receiver<WaEvent>,
}

/// Opens sessions against the messaging platform.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn fetch_latest_version(&self) -> Result<ClientVersion, ClientError>;

    async fn connect(&self, options: ConnectOptions) -> Result<Connection, ClientError>;
}
