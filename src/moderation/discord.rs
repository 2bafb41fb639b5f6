//! Discord-backed implementations of the pipeline's boundary traits
//!
//! The muted role is resolved per guild (created on first use, with
//! send permissions denied everywhere) and remembered in the guild
//! config; forcebans map to platform bans.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::all::{
    ChannelId, CreateEmbed, CreateMessage, GuildId, Http, PermissionOverwrite,
    PermissionOverwriteType, Permissions, RoleId, UserId,
};
use serenity::builder::EditRole;
use serenity::model::guild::audit_log::{Action, MemberAction, RoleAction};
use tracing::{info, warn};

use crate::MODLOG_TARGET;
use crate::data::Data;
use crate::moderation::error::{ModerationError, ModerationResult};
use crate::moderation::events::{
    ActionKind, AuditEntry, AuditFeed, AuditSink, Enforcer, ModLogEntry, Subject,
};
use crate::moderation::restriction::RestrictionKind;

/// Name of the restrictive role created when a guild has none configured
pub const MUTED_ROLE_NAME: &str = "Muted";

/// Convert a snowflake timestamp into the pipeline's clock type
pub(crate) fn to_utc(ts: serenity::model::Timestamp) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(ts.unix_timestamp(), 0).unwrap_or_else(Utc::now)
}

/// Classify a serenity failure into the pipeline's error taxonomy
fn map_platform_error(err: serenity::Error, subject: Subject) -> ModerationError {
    if let serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(resp)) = &err {
        match resp.status_code.as_u16() {
            403 => return ModerationError::PermissionDenied(err.to_string()),
            404 => return ModerationError::SubjectGone(subject),
            _ => {}
        }
    }
    ModerationError::Api(err.to_string())
}

/// Role/ban mutation API backed by the Discord HTTP client
pub struct DiscordEnforcer {
    http: Arc<Http>,
    data: Data,
}

impl DiscordEnforcer {
    #[must_use]
    pub fn new(http: Arc<Http>, data: Data) -> Self {
        Self { http, data }
    }

    /// Resolve the guild's muted role, creating it on first use
    async fn muted_role(&self, guild_id: GuildId, subject: Subject) -> ModerationResult<RoleId> {
        if let Some(config) = self.data.get_guild_config(guild_id) {
            if let Some(role_id) = config.muted_role_id {
                return Ok(RoleId::new(role_id));
            }
        }

        let guild = guild_id
            .to_partial_guild(&*self.http)
            .await
            .map_err(|e| map_platform_error(e, subject))?;

        let role_id = match guild.roles.values().find(|r| r.name == MUTED_ROLE_NAME) {
            Some(role) => role.id,
            None => {
                let role = guild_id
                    .create_role(
                        &*self.http,
                        EditRole::new()
                            .name(MUTED_ROLE_NAME)
                            .permissions(Permissions::empty()),
                    )
                    .await
                    .map_err(|e| map_platform_error(e, subject))?;
                info!(guild_id = guild_id.get(), role_id = role.id.get(), "created muted role");

                // Deny sending in every channel; best-effort per channel.
                if let Ok(channels) = guild_id.channels(&*self.http).await {
                    let overwrite = |role_id| PermissionOverwrite {
                        allow: Permissions::empty(),
                        deny: Permissions::SEND_MESSAGES,
                        kind: PermissionOverwriteType::Role(role_id),
                    };
                    for channel in channels.values() {
                        if let Err(e) =
                            channel.create_permission(&*self.http, overwrite(role.id)).await
                        {
                            warn!(
                                channel_id = channel.id.get(),
                                error = %e,
                                "could not deny send permission for muted role"
                            );
                        }
                    }
                }
                role.id
            }
        };

        self.data.set_muted_role(guild_id, role_id.get());
        if let Err(e) = self.data.save().await {
            warn!(error = %e, "could not persist muted role id");
        }
        Ok(role_id)
    }
}

#[async_trait]
impl Enforcer for DiscordEnforcer {
    async fn grant_restrictive_role(&self, subject: Subject) -> ModerationResult<()> {
        let guild_id = GuildId::new(subject.guild_id);
        let role_id = self.muted_role(guild_id, subject).await?;
        self.http
            .add_member_role(
                guild_id,
                UserId::new(subject.user_id),
                role_id,
                Some("chat-warden enforcement"),
            )
            .await
            .map_err(|e| map_platform_error(e, subject))
    }

    async fn revoke_restrictive_role(&self, subject: Subject) -> ModerationResult<()> {
        let guild_id = GuildId::new(subject.guild_id);
        let role_id = self.muted_role(guild_id, subject).await?;
        self.http
            .remove_member_role(
                guild_id,
                UserId::new(subject.user_id),
                role_id,
                Some("chat-warden enforcement lifted"),
            )
            .await
            .map_err(|e| map_platform_error(e, subject))
    }

    async fn reject_ingress(&self, subject: Subject) -> ModerationResult<()> {
        GuildId::new(subject.guild_id)
            .ban_with_reason(
                &*self.http,
                UserId::new(subject.user_id),
                0,
                "chat-warden forceban",
            )
            .await
            .map_err(|e| map_platform_error(e, subject))
    }

    async fn restore_ingress(&self, subject: Subject) -> ModerationResult<()> {
        GuildId::new(subject.guild_id)
            .unban(&*self.http, UserId::new(subject.user_id))
            .await
            .map_err(|e| map_platform_error(e, subject))
    }

    async fn is_restricted(
        &self,
        subject: Subject,
        kind: RestrictionKind,
    ) -> ModerationResult<bool> {
        let guild_id = GuildId::new(subject.guild_id);
        match kind {
            RestrictionKind::Mute => {
                let role_id = self.muted_role(guild_id, subject).await?;
                let member = guild_id
                    .member(&*self.http, UserId::new(subject.user_id))
                    .await
                    .map_err(|e| map_platform_error(e, subject))?;
                Ok(member.roles.contains(&role_id))
            }
            RestrictionKind::Forceban => {
                match self
                    .http
                    .get_ban(guild_id, UserId::new(subject.user_id))
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(err) => match map_platform_error(err, subject) {
                        // No ban entry for the subject.
                        ModerationError::SubjectGone(_) => Ok(false),
                        other => Err(other),
                    },
                }
            }
        }
    }
}

/// Audit retrieval backed by the Discord audit-log endpoint
pub struct DiscordAuditFeed {
    http: Arc<Http>,
}

impl DiscordAuditFeed {
    #[must_use]
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    fn action_filter(kind: ActionKind) -> Action {
        match kind {
            ActionKind::Kick => Action::Member(MemberAction::Kick),
            ActionKind::Ban => Action::Member(MemberAction::BanAdd),
            ActionKind::RoleCreate => Action::Role(RoleAction::Create),
            ActionKind::RoleDelete => Action::Role(RoleAction::Delete),
        }
    }

    /// Whether the actor holds administrative privilege in the guild
    async fn actor_is_admin(
        &self,
        guild: &serenity::model::guild::PartialGuild,
        actor_id: UserId,
    ) -> bool {
        if guild.owner_id == actor_id {
            return true;
        }
        match guild.member(&*self.http, actor_id).await {
            Ok(member) => member.roles.iter().any(|role_id| {
                guild
                    .roles
                    .get(role_id)
                    .is_some_and(|role| role.permissions.administrator())
            }),
            // An actor we cannot resolve is not treated as trusted.
            Err(_) => false,
        }
    }
}

#[async_trait]
impl AuditFeed for DiscordAuditFeed {
    async fn fetch_recent_entries(
        &self,
        guild_id: u64,
        kind: ActionKind,
        limit: u8,
    ) -> ModerationResult<Vec<AuditEntry>> {
        let guild_id = GuildId::new(guild_id);
        let probe = Subject::new(guild_id.get(), 0);

        let logs = guild_id
            .audit_logs(
                &*self.http,
                Some(Self::action_filter(kind)),
                None,
                None,
                Some(limit),
            )
            .await
            .map_err(|e| map_platform_error(e, probe))?;

        let guild = guild_id
            .to_partial_guild(&*self.http)
            .await
            .map_err(|e| map_platform_error(e, probe))?;

        // Resolve each distinct actor's privilege once per fetch.
        let mut admin_by_actor: HashMap<UserId, bool> = HashMap::new();
        let mut entries = Vec::with_capacity(logs.entries.len());
        for entry in &logs.entries {
            let actor_is_admin = match admin_by_actor.get(&entry.user_id) {
                Some(known) => *known,
                None => {
                    let is_admin = self.actor_is_admin(&guild, entry.user_id).await;
                    admin_by_actor.insert(entry.user_id, is_admin);
                    is_admin
                }
            };
            entries.push(AuditEntry {
                id: entry.id.get(),
                actor_id: entry.user_id.get(),
                target_id: entry.target_id.map(|t| t.get()),
                actor_is_admin,
                created_at: to_utc(entry.id.created_at()),
            });
        }
        Ok(entries)
    }
}

/// Audit-trail sink: durable JSON log line plus a best-effort embed in
/// the guild's configured log channel
pub struct DiscordAuditSink {
    http: Arc<Http>,
    data: Data,
}

impl DiscordAuditSink {
    #[must_use]
    pub fn new(http: Arc<Http>, data: Data) -> Self {
        Self { http, data }
    }
}

#[async_trait]
impl AuditSink for DiscordAuditSink {
    async fn append(&self, entry: &ModLogEntry) -> ModerationResult<()> {
        // The rolling JSON file layer makes this the durable record.
        info!(
            target: MODLOG_TARGET,
            actor_id = entry.actor_id,
            guild_id = entry.subject.guild_id,
            user_id = entry.subject.user_id,
            action = %entry.action,
            reason = %entry.reason,
            evidence_count = entry.evidence_count,
            "moderation action recorded"
        );

        let Some(channel_id) = self
            .data
            .get_guild_config(GuildId::new(entry.subject.guild_id))
            .and_then(|config| config.log_channel_id)
        else {
            return Ok(());
        };

        let embed = CreateEmbed::new()
            .title(format!("Moderation | {}", entry.action))
            .colour(0x00FF_0000)
            .field("User", format!("<@{}>", entry.subject.user_id), true)
            .field("By", format!("<@{}>", entry.actor_id), true)
            .field("Reason", entry.reason.clone(), false)
            .field("Evidence count", entry.evidence_count.to_string(), true)
            .timestamp(serenity::model::Timestamp::now());

        if let Err(err) = ChannelId::new(channel_id)
            .send_message(&*self.http, CreateMessage::new().embed(embed))
            .await
        {
            // The durable line above already landed; the embed is
            // best-effort for human eyes.
            warn!(channel_id, error = %err, "could not post mod-log embed");
        }
        Ok(())
    }
}
