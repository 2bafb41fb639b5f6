use std::sync::Arc;

use poise::{command, serenity_prelude as serenity};

use crate::moderation::discord::{DiscordAuditSink, DiscordEnforcer};
use crate::moderation::{
    AuditSink, EnforcementCoordinator, LiftOutcome, ModLogEntry, Outcome, RestrictionKind, Subject,
};
use crate::{Context, Error};

/// Coordinator over the shared restriction store, built per invocation
fn coordinator(ctx: &Context<'_>) -> EnforcementCoordinator<DiscordEnforcer, DiscordAuditSink> {
    let http = Arc::clone(&ctx.serenity_context().http);
    let data = ctx.data().clone();
    EnforcementCoordinator::new(
        Arc::clone(&data.restrictions),
        DiscordEnforcer::new(Arc::clone(&http), data.clone()),
        DiscordAuditSink::new(http, data),
    )
}

/// Basic ping command
/// This command is used to check if the bot is responsive.
#[command(prefix_command, slash_command, guild_only)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Pong!").await?;
    Ok(())
}

/// Mute a user
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR"
)]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "User to mute"] user: serenity::User,
    #[description = "Reason for the mute"] reason: Option<String>,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };
    let subject = Subject::new(guild_id.get(), user.id.get());
    let reason = reason.unwrap_or_else(|| "muted by moderator".to_string());

    let outcome = coordinator(&ctx)
        .impose(subject, RestrictionKind::Mute, ctx.author().id.get(), &reason, 1)
        .await;
    match outcome {
        Outcome::Applied => ctx.say(format!("Muted <@{}>.", user.id)).await?,
        Outcome::SkippedAlreadyActive => {
            ctx.say(format!("<@{}> is already muted.", user.id)).await?
        }
        Outcome::Failed => {
            ctx.say(format!("Could not mute <@{}>; see logs.", user.id))
                .await?
        }
    };
    Ok(())
}

/// Unmute a user
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR"
)]
pub async fn unmute(
    ctx: Context<'_>,
    #[description = "User to unmute"] user: serenity::User,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };
    let subject = Subject::new(guild_id.get(), user.id.get());

    let outcome = coordinator(&ctx)
        .lift(subject, RestrictionKind::Mute, ctx.author().id.get())
        .await?;
    match outcome {
        LiftOutcome::Lifted => ctx.say(format!("Unmuted <@{}>.", user.id)).await?,
        LiftOutcome::NotFound => ctx.say(format!("<@{}> is not muted.", user.id)).await?,
    };
    Ok(())
}

/// Forceban a user; bans them and drops any message they send
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR"
)]
pub async fn forceban(
    ctx: Context<'_>,
    #[description = "User to forceban"] user: serenity::User,
    #[description = "Reason for the ban"] reason: Option<String>,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };
    let subject = Subject::new(guild_id.get(), user.id.get());
    let reason = reason.unwrap_or_else(|| "forcebanned by moderator".to_string());

    let outcome = coordinator(&ctx)
        .impose(
            subject,
            RestrictionKind::Forceban,
            ctx.author().id.get(),
            &reason,
            1,
        )
        .await;
    match outcome {
        Outcome::Applied => ctx.say(format!("Forcebanned <@{}>.", user.id)).await?,
        Outcome::SkippedAlreadyActive => {
            ctx.say(format!("<@{}> is already forcebanned.", user.id))
                .await?
        }
        Outcome::Failed => {
            ctx.say(format!("Could not forceban <@{}>; see logs.", user.id))
                .await?
        }
    };
    Ok(())
}

/// Lift a forceban
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR"
)]
pub async fn unban(
    ctx: Context<'_>,
    #[description = "User to unban"] user: serenity::User,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };
    let subject = Subject::new(guild_id.get(), user.id.get());

    let outcome = coordinator(&ctx)
        .lift(subject, RestrictionKind::Forceban, ctx.author().id.get())
        .await?;
    match outcome {
        LiftOutcome::Lifted => ctx.say(format!("Unbanned <@{}>.", user.id)).await?,
        LiftOutcome::NotFound => {
            ctx.say(format!("<@{}> is not forcebanned.", user.id)).await?
        }
    };
    Ok(())
}

/// Warn a user; warnings are recorded but carry no automatic enforcement
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR"
)]
pub async fn warn(
    ctx: Context<'_>,
    #[description = "User to warn"] user: serenity::User,
    #[description = "Reason for the warning"] reason: String,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };
    let data = ctx.data();
    let record = data.add_warn(
        user.id.get(),
        ctx.author().id.get(),
        guild_id.get(),
        reason.clone(),
    );
    data.save().await?;

    let total = data.warns_for(guild_id.get(), user.id.get()).len();
    let sink = DiscordAuditSink::new(
        Arc::clone(&ctx.serenity_context().http),
        data.clone(),
    );
    sink.append(&ModLogEntry {
        actor_id: record.issuer_id,
        subject: Subject::new(guild_id.get(), user.id.get()),
        action: "warn".to_string(),
        reason,
        evidence_count: total as u64,
        timestamp: chrono::Utc::now(),
    })
    .await?;

    ctx.say(format!(
        "Warned <@{}>. They now have {total} warning(s).",
        user.id
    ))
    .await?;
    Ok(())
}

/// List a user's warnings
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR"
)]
pub async fn warns(
    ctx: Context<'_>,
    #[description = "User to look up"] user: serenity::User,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };
    let records = ctx.data().warns_for(guild_id.get(), user.id.get());
    if records.is_empty() {
        ctx.say(format!("<@{}> has no warnings.", user.id)).await?;
        return Ok(());
    }

    let mut reply = format!("<@{}> has {} warning(s):\n", user.id, records.len());
    for record in records {
        reply.push_str(&format!("- {} ({})\n", record.reason, record.timestamp));
    }
    ctx.say(reply).await?;
    Ok(())
}

/// Set the channel that receives moderation embeds
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR"
)]
pub async fn logchannel(
    ctx: Context<'_>,
    #[description = "Channel for moderation logs"] channel: serenity::GuildChannel,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };
    let data = ctx.data();
    data.set_log_channel(guild_id, channel.id.get());
    data.save().await?;
    ctx.say(format!("Moderation logs will go to <#{}>.", channel.id))
        .await?;
    Ok(())
}
