//! Evolution API bridge: REST calls out, webhooks in.
//!
//! The bridge wraps the WhatsApp multi-device library and exposes one "instance" per linked
//! number. Actions are plain REST calls authenticated with the `apikey` header; events are POSTed
//! by the bridge to the gateway (`/webhook/{number}`) and forwarded to the session through
//! [`WebhookRouter`].

use super::{
    ClientError, ClientVersion, ConnectOptions, Connection, ConnectionState, Connector, Credentials,
    DocumentMessage, GroupMetadata, GroupSetting, OutgoingMessage, ParticipantAction, WaClient,
    WaEvent, WaMessage,
};
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

const INTEGRATION: &str = "WHATSAPP-BAILEYS";
const EVENT_BUFFER: usize = 64;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Routes decoded webhook events to the session that owns the instance.
pub struct WebhookRouter {
    inner: RwLock<HashMap<String, mpsc::Sender<WaEvent>>>,
}

impl Default for WebhookRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookRouter {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the event sender for an instance.
    pub async fn register(&self, instance: impl Into<String>, tx: mpsc::Sender<WaEvent>) {
        self.inner.write().await.insert(instance.into(), tx);
    }

    /// Forward events to the instance's session. False when no live session owns the instance.
    pub async fn deliver(&self, instance: &str, events: Vec<WaEvent>) -> bool {
        let tx = match self.inner.read().await.get(instance) {
            Some(tx) => tx.clone(),
            None => return false,
        };
        for event in events {
            if tx.send(event).await.is_err() {
                log::debug!("webhook: session for {} is gone", instance);
                return false;
            }
        }
        true
    }
}

/// Decode one bridge webhook payload into session events. Unknown events decode to nothing.
pub fn parse_webhook(payload: &Value) -> Vec<WaEvent> {
    let event = payload["event"]
        .as_str()
        .unwrap_or("")
        .to_ascii_lowercase()
        .replace('_', ".");
    let data = &payload["data"];
    match event.as_str() {
        "connection.update" => match data["state"].as_str().unwrap_or("") {
            "open" => {
                let creds = Credentials {
                    registered: true,
                    instance: payload["instance"].as_str().map(str::to_string),
                    token: payload["apikey"].as_str().map(str::to_string),
                    me: data["wuid"].as_str().map(str::to_string),
                };
                vec![
                    WaEvent::ConnectionUpdate(ConnectionState::Open),
                    WaEvent::CredsUpdate(creds),
                ]
            }
            "connecting" => vec![WaEvent::ConnectionUpdate(ConnectionState::Connecting)],
            "close" => vec![WaEvent::ConnectionUpdate(ConnectionState::Close)],
            _ => Vec::new(),
        },
        "messages.upsert" => {
            let raw: Vec<&Value> = if let Some(arr) = data.as_array() {
                arr.iter().collect()
            } else if let Some(arr) = data["messages"].as_array() {
                arr.iter().collect()
            } else {
                vec![data]
            };
            let messages: Vec<WaMessage> = raw
                .into_iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect();
            if messages.is_empty() {
                Vec::new()
            } else {
                vec![WaEvent::MessagesUpsert(messages)]
            }
        }
        _ => Vec::new(),
    }
}

/// Opens bridge instances and wires their webhooks into a [`WebhookRouter`].
pub struct EvolutionConnector {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    webhook_base_url: String,
    router: Arc<WebhookRouter>,
}

impl EvolutionConnector {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        webhook_base_url: impl Into<String>,
        router: Arc<WebhookRouter>,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            webhook_base_url: webhook_base_url.into().trim_end_matches('/').to_string(),
            router,
        }
    }

    fn client_for(&self, instance: &str) -> EvolutionClient {
        EvolutionClient {
            http: self.http.clone(),
            api_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
            instance: instance.to_string(),
        }
    }

    /// Create the bridge instance for a number; an existing instance is reused.
    async fn create_instance(&self, number: &str, token: &str) -> Result<Option<String>, ClientError> {
        let url = format!("{}/instance/create", self.api_url);
        let body = json!({
            "instanceName": number,
            "token": token,
            "number": number,
            "integration": INTEGRATION,
            "qrcode": false,
            "webhook": {
                "url": format!("{}/webhook/{}", self.webhook_base_url, number),
                "byEvents": false,
                "base64": false,
                "events": ["CONNECTION_UPDATE", "MESSAGES_UPSERT"],
            }
        });
        let res = self
            .http
            .post(&url)
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = res.status();
        let text = res.text().await.unwrap_or_default();
        if !status.is_success() {
            if text.contains("already in use") || text.contains("exists") {
                log::info!("evolution: instance {} already exists, reusing", number);
                return Ok(None);
            }
            return Err(ClientError::Status {
                operation: "instance/create",
                status: status.as_u16(),
                body: text,
            });
        }
        let v: Value = serde_json::from_str(&text).map_err(|e| ClientError::Decode(e.to_string()))?;
        let issued = v["hash"]
            .as_str()
            .or_else(|| v["hash"]["apikey"].as_str())
            .map(str::to_string);
        Ok(issued)
    }
}

#[async_trait]
impl Connector for EvolutionConnector {
    /// The bridge reports the library version it runs; sessions are opened against that.
    async fn fetch_latest_version(&self) -> Result<ClientVersion, ClientError> {
        let url = format!("{}/", self.api_url);
        let v = check(
            "version",
            self.http.get(&url).header("apikey", &self.api_key).send().await?,
        )
        .await?;
        v["version"]
            .as_str()
            .map(|s| ClientVersion(s.to_string()))
            .ok_or_else(|| ClientError::Decode("bridge did not report a version".to_string()))
    }

    async fn connect(&self, options: ConnectOptions) -> Result<Connection, ClientError> {
        let ConnectOptions {
            number,
            version,
            mut credentials,
            browser,
        } = options;
        log::debug!(
            "evolution: opening {} (bridge {}, client {} / {} / {})",
            number,
            version.0,
            browser.0,
            browser.1,
            browser.2
        );

        if credentials.instance.is_none() {
            let token = credentials
                .token
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
            let issued = self.create_instance(&number, &token).await?;
            credentials.instance = Some(number.clone());
            credentials.token = Some(issued.unwrap_or(token));
        }
        let instance = credentials.instance.clone().unwrap_or_else(|| number.clone());
        let client = self.client_for(&instance);

        if client.connection_state().await? == ConnectionState::Open {
            credentials.registered = true;
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.router.register(number, tx).await;

        Ok(Connection {
            client: Arc::new(client),
            credentials,
            events: rx,
        })
    }
}

/// REST client for one bridge instance.
pub struct EvolutionClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    instance: String,
}

impl EvolutionClient {
    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.api_url, path, self.instance)
    }

    async fn post(
        &self,
        operation: &'static str,
        path: &str,
        query: &[(&str, &str)],
        body: Value,
    ) -> Result<Value, ClientError> {
        let res = self
            .http
            .post(self.url(path))
            .query(query)
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;
        check(operation, res).await
    }

    async fn get(
        &self,
        operation: &'static str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, ClientError> {
        let res = self
            .http
            .get(self.url(path))
            .query(query)
            .header("apikey", &self.api_key)
            .send()
            .await?;
        check(operation, res).await
    }

    async fn connection_state(&self) -> Result<ConnectionState, ClientError> {
        let v = self
            .get("connectionState", "instance/connectionState", &[])
            .await?;
        let state = v["instance"]["state"]
            .as_str()
            .or_else(|| v["state"].as_str())
            .unwrap_or("");
        Ok(match state {
            "open" => ConnectionState::Open,
            "connecting" => ConnectionState::Connecting,
            _ => ConnectionState::Close,
        })
    }
}

/// Fail on non-2xx, otherwise parse the body as JSON (empty body => null).
async fn check(operation: &'static str, res: reqwest::Response) -> Result<Value, ClientError> {
    let status = res.status();
    let text = res.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(ClientError::Status {
            operation,
            status: status.as_u16(),
            body: text,
        });
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| ClientError::Decode(format!("{}: {}", operation, e)))
}

#[async_trait]
impl WaClient for EvolutionClient {
    async fn send_message(&self, jid: &str, message: OutgoingMessage) -> Result<(), ClientError> {
        match message {
            OutgoingMessage::Text { text, mentions } => {
                let mut body = json!({ "number": jid, "text": text });
                if !mentions.is_empty() {
                    body["mentioned"] = json!(mentions);
                }
                self.post("sendText", "message/sendText", &[], body).await?;
            }
            OutgoingMessage::Document {
                bytes,
                mimetype,
                file_name,
            } => {
                let media = base64::engine::general_purpose::STANDARD.encode(&bytes);
                let body = json!({
                    "number": jid,
                    "mediatype": "document",
                    "mimetype": mimetype,
                    "media": media,
                    "fileName": file_name,
                });
                self.post("sendMedia", "message/sendMedia", &[], body).await?;
            }
        }
        Ok(())
    }

    async fn group_setting_update(&self, jid: &str, setting: GroupSetting) -> Result<(), ClientError> {
        self.post(
            "updateSetting",
            "group/updateSetting",
            &[("groupJid", jid)],
            json!({ "action": setting.as_str() }),
        )
        .await?;
        Ok(())
    }

    async fn group_participants_update(
        &self,
        jid: &str,
        participants: &[String],
        action: ParticipantAction,
    ) -> Result<(), ClientError> {
        self.post(
            "updateParticipant",
            "group/updateParticipant",
            &[("groupJid", jid)],
            json!({ "action": action.as_str(), "participants": participants }),
        )
        .await?;
        Ok(())
    }

    async fn group_metadata(&self, jid: &str) -> Result<GroupMetadata, ClientError> {
        let v = self
            .get("findGroupInfos", "group/findGroupInfos", &[("groupJid", jid)])
            .await?;
        serde_json::from_value(v).map_err(|e| ClientError::Decode(format!("group metadata: {}", e)))
    }

    async fn download_media(&self, document: &DocumentMessage) -> Result<Vec<u8>, ClientError> {
        let body = json!({
            "message": {
                "key": { "id": document.message_id },
                "message": document.raw,
            },
            "convertToMp4": false,
        });
        let v = self
            .post("getBase64FromMediaMessage", "chat/getBase64FromMediaMessage", &[], body)
            .await?;
        let encoded = v["base64"]
            .as_str()
            .ok_or_else(|| ClientError::Decode("media response has no base64 field".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| ClientError::Decode(format!("media base64: {}", e)))
    }

    async fn request_pairing_code(&self, number: &str) -> Result<String, ClientError> {
        let v = self
            .get("connect", "instance/connect", &[("number", number)])
            .await?;
        v["pairingCode"]
            .as_str()
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ClientError::Decode("bridge returned no pairing code".to_string()))
    }
}
