//! Command dispatcher: classify one inbound message and perform at most one action.
//!
//! Filter chain, in order: no payload, own message, no command prefix. A recognized command
//! then checks its preconditions (group chat, admin sender, quoted document); a failed
//! precondition is a silent no-op. Every command returns a [`CommandOutcome`] or a
//! [`CommandError`]; errors stop at the dispatcher and are logged.

mod bulk_add;
mod invocation;
mod vcard;

pub use bulk_add::{add_all, BulkAddReport};
pub use invocation::{Command, Invocation};
pub use vcard::{build_vcf, extract_waids, VCF_FILE_NAME, VCF_MIMETYPE};

use crate::client::{
    ClientError, GroupMetadata, GroupSetting, OutgoingMessage, Participant, ParticipantAction,
    WaClient, WaMessage,
};
use crate::jid;
use std::time::Duration;

/// Where the sender stands in the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderRole {
    /// Participant record with a non-null admin marker.
    Admin,
    /// Participant record without an admin marker.
    Member,
    /// No participant record (or not a group chat).
    NotParticipant,
}

impl SenderRole {
    pub fn resolve(participants: &[Participant], sender: &str) -> Self {
        match participants.iter().find(|p| p.id == sender) {
            Some(p) if p.admin.is_some() => SenderRole::Admin,
            Some(_) => SenderRole::Member,
            None => SenderRole::NotParticipant,
        }
    }
}

/// Why a message never reached a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    NoPayload,
    FromMe,
    NoPrefix,
    UnknownCommand(String),
}

/// Why a recognized command did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotGroup,
    NotAdmin,
    NoMentions,
    NoQuotedDocument,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The action ran (and its reply, if any, was sent).
    Completed,
    Skipped(SkipReason),
    BulkAdd(BulkAddReport),
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{action}: {source}")]
    Client {
        action: &'static str,
        #[source]
        source: ClientError,
    },
}

fn client_err(action: &'static str) -> impl FnOnce(ClientError) -> CommandError {
    move |source| CommandError::Client { action, source }
}

/// Result of dispatching one message.
#[derive(Debug)]
pub enum Dispatch {
    Ignored(IgnoreReason),
    Handled(Command, CommandOutcome),
    Failed(Command, CommandError),
}

/// Everything a command handler sees for one message.
struct CommandContext<'a> {
    client: &'a dyn WaClient,
    message: &'a WaMessage,
    origin: &'a str,
    is_group: bool,
}

/// Routes prefixed messages to the command table.
pub struct Dispatcher {
    prefix: String,
    bot_name: String,
    add_delay: Duration,
}

impl Dispatcher {
    pub fn new(prefix: impl Into<String>, bot_name: impl Into<String>, add_delay: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            bot_name: bot_name.into(),
            add_delay,
        }
    }

    pub fn from_config(config: &crate::config::BotConfig) -> Self {
        Self::new(
            config.prefix.clone(),
            config.name.clone(),
            Duration::from_millis(config.add_delay_ms),
        )
    }

    /// Classify `message` and run at most one command against `client`.
    pub async fn dispatch(&self, client: &dyn WaClient, message: &WaMessage) -> Dispatch {
        if message.content.is_none() {
            return Dispatch::Ignored(IgnoreReason::NoPayload);
        }
        if message.key.from_me {
            return Dispatch::Ignored(IgnoreReason::FromMe);
        }
        let origin = message.key.remote_jid.as_str();
        let Some(invocation) = Invocation::parse(message.text(), &self.prefix) else {
            return Dispatch::Ignored(IgnoreReason::NoPrefix);
        };
        let Some(command) = Command::from_name(&invocation.name) else {
            log::debug!("ignoring unknown command {:?} from {}", invocation.name, origin);
            return Dispatch::Ignored(IgnoreReason::UnknownCommand(invocation.name));
        };

        log::debug!(
            "{} from {} ({}) in {}",
            command.name(),
            message.sender(),
            message.push_name.as_deref().unwrap_or("unknown"),
            origin
        );

        let ctx = CommandContext {
            client,
            message,
            origin,
            is_group: jid::is_group(origin),
        };
        match self.run(command, &ctx).await {
            Ok(outcome) => {
                match &outcome {
                    CommandOutcome::BulkAdd(r) => log::info!(
                        "addall in {}: {} attempted, {} added, {} failed",
                        origin,
                        r.attempted,
                        r.added,
                        r.failed
                    ),
                    CommandOutcome::Skipped(reason) => {
                        log::debug!("{} in {} skipped: {:?}", command.name(), origin, reason)
                    }
                    CommandOutcome::Completed => log::debug!("{} in {} done", command.name(), origin),
                }
                Dispatch::Handled(command, outcome)
            }
            Err(e) => {
                log::warn!("command {} in {} failed: {}", command.name(), origin, e);
                Dispatch::Failed(command, e)
            }
        }
    }

    async fn run(&self, command: Command, ctx: &CommandContext<'_>) -> Result<CommandOutcome, CommandError> {
        let group = if command.requires_group() {
            if !ctx.is_group {
                return Ok(CommandOutcome::Skipped(SkipReason::NotGroup));
            }
            let meta = ctx
                .client
                .group_metadata(ctx.origin)
                .await
                .map_err(client_err("fetching group metadata"))?;
            if command.requires_admin()
                && SenderRole::resolve(&meta.participants, ctx.message.sender()) != SenderRole::Admin
            {
                return Ok(CommandOutcome::Skipped(SkipReason::NotAdmin));
            }
            Some(meta)
        } else {
            None
        };

        match (command, group) {
            (Command::Ping, _) => self.reply(ctx, "Pong 🏓").await,
            (Command::Alive, _) => {
                let text = format!("{} is active ✅", self.bot_name);
                self.reply(ctx, text).await
            }
            (Command::Menu, _) => self.reply(ctx, self.menu_text()).await,
            (Command::Open, Some(_)) => {
                self.set_posting(ctx, GroupSetting::NotAnnouncement, "Group opened.")
                    .await
            }
            (Command::Close, Some(_)) => {
                self.set_posting(ctx, GroupSetting::Announcement, "Group closed.")
                    .await
            }
            (Command::Group, Some(meta)) => {
                let text = format!("Name: {}\nMembers: {}", meta.subject, meta.participants.len());
                self.reply(ctx, text).await
            }
            (Command::TagAll, Some(meta)) => tag_all(ctx, &meta).await,
            (Command::Kick, Some(_)) => update_mentioned(ctx, ParticipantAction::Remove).await,
            (Command::Promote, Some(_)) => update_mentioned(ctx, ParticipantAction::Promote).await,
            (Command::Demote, Some(_)) => update_mentioned(ctx, ParticipantAction::Demote).await,
            (Command::Vcf, Some(meta)) => export_vcf(ctx, &meta).await,
            (Command::AddAll, Some(_)) => self.bulk_add(ctx).await,
            // Group commands always carry metadata past the precondition block.
            (_, None) => Ok(CommandOutcome::Skipped(SkipReason::NotGroup)),
        }
    }

    fn menu_text(&self) -> String {
        let mut text = format!("\n{} MENU\n\n", self.bot_name);
        for c in Command::ALL.iter().filter(|c| **c != Command::Menu) {
            text.push_str(&self.prefix);
            text.push_str(c.name());
            text.push('\n');
        }
        text
    }

    async fn reply(
        &self,
        ctx: &CommandContext<'_>,
        text: impl Into<String>,
    ) -> Result<CommandOutcome, CommandError> {
        ctx.client
            .send_message(ctx.origin, OutgoingMessage::text(text))
            .await
            .map_err(client_err("sending reply"))?;
        Ok(CommandOutcome::Completed)
    }

    async fn set_posting(
        &self,
        ctx: &CommandContext<'_>,
        setting: GroupSetting,
        confirmation: &str,
    ) -> Result<CommandOutcome, CommandError> {
        ctx.client
            .group_setting_update(ctx.origin, setting)
            .await
            .map_err(client_err("updating group setting"))?;
        self.reply(ctx, confirmation).await
    }

    async fn bulk_add(&self, ctx: &CommandContext<'_>) -> Result<CommandOutcome, CommandError> {
        let Some(document) = ctx.message.quoted_document() else {
            return Ok(CommandOutcome::Skipped(SkipReason::NoQuotedDocument));
        };
        let bytes = ctx
            .client
            .download_media(document)
            .await
            .map_err(client_err("downloading attachment"))?;
        let numbers = extract_waids(&String::from_utf8_lossy(&bytes));
        let report = add_all(ctx.client, ctx.origin, &numbers, self.add_delay).await;
        self.reply(ctx, "Finished adding members.").await?;
        Ok(CommandOutcome::BulkAdd(report))
    }
}

async fn tag_all(ctx: &CommandContext<'_>, meta: &GroupMetadata) -> Result<CommandOutcome, CommandError> {
    let mut text = String::from("Tagging All:\n\n");
    let mut mentions = Vec::with_capacity(meta.participants.len());
    for p in &meta.participants {
        text.push('@');
        text.push_str(jid::user_part(&p.id));
        text.push('\n');
        mentions.push(p.id.clone());
    }
    ctx.client
        .send_message(ctx.origin, OutgoingMessage::Text { text, mentions })
        .await
        .map_err(client_err("sending tag-all"))?;
    Ok(CommandOutcome::Completed)
}

async fn update_mentioned(
    ctx: &CommandContext<'_>,
    action: ParticipantAction,
) -> Result<CommandOutcome, CommandError> {
    let mentioned = ctx.message.mentioned();
    if mentioned.is_empty() {
        return Ok(CommandOutcome::Skipped(SkipReason::NoMentions));
    }
    ctx.client
        .group_participants_update(ctx.origin, mentioned, action)
        .await
        .map_err(client_err("updating participants"))?;
    Ok(CommandOutcome::Completed)
}

async fn export_vcf(ctx: &CommandContext<'_>, meta: &GroupMetadata) -> Result<CommandOutcome, CommandError> {
    let vcf = build_vcf(&meta.participants);
    ctx.client
        .send_message(
            ctx.origin,
            OutgoingMessage::Document {
                bytes: vcf.into_bytes(),
                mimetype: VCF_MIMETYPE.to_string(),
                file_name: VCF_FILE_NAME.to_string(),
            },
        )
        .await
        .map_err(client_err("sending contacts file"))?;
    Ok(CommandOutcome::Completed)
}
