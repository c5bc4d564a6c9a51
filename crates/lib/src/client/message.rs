//! Inbound message model.
//!
//! Webhook payloads carry the messaging library's JSON message shape. It is decoded once into
//! [`WaMessage`], whose body is a closed [`MessageContent`] variant resolved by ordered fallback
//! (plain conversation text, then extended text, then anything else). Mentions and quoted
//! content are read from the extended text regardless of which field supplied the body.

use serde::{Deserialize, Serialize};

/// Addressing for one message: origin chat, author flag, and (in groups) the sending participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default)]
    pub remote_jid: String,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub participant: Option<String>,
}

/// A document attachment referenced by a quoted message.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMessage {
    pub file_name: Option<String>,
    pub mimetype: Option<String>,
    /// Id of the message that carried the document (the quote's stanza id).
    pub message_id: Option<String>,
    /// The quoted message as received; adapters use it to fetch media.
    pub raw: serde_json::Value,
}

/// Metadata attached to an extended text message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextInfo {
    pub mentioned_jid: Vec<String>,
    pub quoted_document: Option<DocumentMessage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedText {
    pub text: String,
    pub context: ContextInfo,
}

/// Text-bearing shape of a message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Conversation(String),
    ExtendedText(ExtendedText),
    /// Media, reactions, protocol messages: nothing the dispatcher reads.
    Other,
}

/// One inbound message. `content` is `None` when the event carried no message payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawWaMessage")]
pub struct WaMessage {
    pub key: MessageKey,
    pub push_name: Option<String>,
    pub content: Option<MessageContent>,
}

impl WaMessage {
    /// Text body, or "" when the payload has no text field.
    pub fn text(&self) -> &str {
        match &self.content {
            Some(MessageContent::Conversation(t)) => t,
            Some(MessageContent::ExtendedText(e)) => &e.text,
            _ => "",
        }
    }

    pub fn context(&self) -> Option<&ContextInfo> {
        match &self.content {
            Some(MessageContent::ExtendedText(e)) => Some(&e.context),
            _ => None,
        }
    }

    /// Identities tagged in the message (empty for plain conversation text).
    pub fn mentioned(&self) -> &[String] {
        self.context()
            .map(|c| c.mentioned_jid.as_slice())
            .unwrap_or(&[])
    }

    /// Document attachment on the quoted message, if any.
    pub fn quoted_document(&self) -> Option<&DocumentMessage> {
        self.context().and_then(|c| c.quoted_document.as_ref())
    }

    /// Sender identity: the participant in groups, the chat itself in individual chats.
    pub fn sender(&self) -> &str {
        self.key
            .participant
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.key.remote_jid)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWaMessage {
    #[serde(default)]
    key: MessageKey,
    #[serde(default)]
    push_name: Option<String>,
    #[serde(default)]
    message: Option<RawContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContent {
    #[serde(default)]
    conversation: Option<String>,
    #[serde(default)]
    extended_text_message: Option<RawExtendedText>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExtendedText {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    context_info: Option<RawContextInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContextInfo {
    #[serde(default)]
    mentioned_jid: Option<Vec<String>>,
    #[serde(default)]
    stanza_id: Option<String>,
    #[serde(default)]
    quoted_message: Option<serde_json::Value>,
}

impl From<RawContextInfo> for ContextInfo {
    fn from(raw: RawContextInfo) -> Self {
        let quoted_document = raw.quoted_message.and_then(|quoted| {
            let doc = quoted.get("documentMessage")?.as_object()?;
            let field = |name: &str| doc.get(name).and_then(|v| v.as_str()).map(str::to_string);
            Some(DocumentMessage {
                file_name: field("fileName"),
                mimetype: field("mimetype"),
                message_id: raw.stanza_id.clone(),
                raw: quoted.clone(),
            })
        });
        Self {
            mentioned_jid: raw.mentioned_jid.unwrap_or_default(),
            quoted_document,
        }
    }
}

impl From<RawContent> for MessageContent {
    fn from(raw: RawContent) -> Self {
        let conversation = raw.conversation.filter(|t| !t.is_empty());
        match (conversation, raw.extended_text_message) {
            (Some(text), Some(ext)) => MessageContent::ExtendedText(ExtendedText {
                text,
                context: ext.context_info.map(ContextInfo::from).unwrap_or_default(),
            }),
            (Some(text), None) => MessageContent::Conversation(text),
            (None, Some(ext)) => MessageContent::ExtendedText(ExtendedText {
                text: ext.text.unwrap_or_default(),
                context: ext.context_info.map(ContextInfo::from).unwrap_or_default(),
            }),
            (None, None) => MessageContent::Other,
        }
    }
}

impl From<RawWaMessage> for WaMessage {
    fn from(raw: RawWaMessage) -> Self {
        Self {
            key: raw.key,
            push_name: raw.push_name,
            content: raw.message.map(MessageContent::from),
        }
    }
}
