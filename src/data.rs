use std::{
    default::Default,
    fmt::{Display, Formatter},
    ops::Deref,
    sync::Arc,
};

use dashmap::DashMap;
use poise::serenity_prelude as serenity;
use serde::{Deserialize, Serialize};
use serenity::prelude::TypeMapKey;

use crate::moderation::{
    AuditLogCorrelator, ModerationResult, RestrictionStore, RuleConfig, ViolationClassifier,
};

const CONFIG_FILE: &str = "data/bot_config.yaml";
const WARNS_FILE: &str = "data/warns.yaml";
const RULES_FILE: &str = "data/rules.yaml";
const RESTRICTIONS_FILE: &str = "data/restrictions.yaml";

/// Guild configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildConfig {
    // The ID of the guild
    pub guild_id: u64,
    // Channel that receives moderation embeds
    pub log_channel_id: Option<u64>,
    // Role granted to muted members; created on first mute if unset
    pub muted_role_id: Option<u64>,
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            guild_id: 0,
            log_channel_id: None,
            muted_role_id: None,
        }
    }
}

/// A moderator-issued warning on record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarnRecord {
    pub id: String,
    pub user_id: u64,
    pub issuer_id: u64,
    pub guild_id: u64,
    pub reason: String,
    pub timestamp: String, // RFC3339
}

impl Display for WarnRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "Warn ID: {}. User ID: {}. Issuer ID: {}. Guild ID: {}. Reason: {}. Timestamp: {}.",
            self.id, self.user_id, self.issuer_id, self.guild_id, self.reason, self.timestamp
        ))
    }
}

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("guild_configs", &self.guild_configs)
            .field("warns", &self.warns)
            .field("restrictions", &self.restrictions.path())
            .finish_non_exhaustive()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    /// Load all persisted state from the data directory
    ///
    /// # Errors
    /// Returns an error when the restriction store exists but cannot be
    /// read or parsed. Missing config/warn/rule files are not errors.
    pub async fn load() -> ModerationResult<Self> {
        Ok(Self(Arc::new(DataInner::load().await?)))
    }

    /// Get the guild configuration for a specific guild
    #[must_use]
    pub fn get_guild_config(&self, guild_id: serenity::GuildId) -> Option<GuildConfig> {
        self.0
            .guild_configs
            .get(&guild_id)
            .map(|entry| entry.value().clone())
    }

    /// Remember the guild's muted role
    pub fn set_muted_role(&self, guild_id: serenity::GuildId, role_id: u64) {
        let mut config = self
            .0
            .guild_configs
            .entry(guild_id)
            .or_insert_with(|| GuildConfig {
                guild_id: guild_id.get(),
                ..Default::default()
            });
        config.muted_role_id = Some(role_id);
    }

    /// Set the channel that receives moderation embeds
    pub fn set_log_channel(&self, guild_id: serenity::GuildId, channel_id: u64) {
        let mut config = self
            .0
            .guild_configs
            .entry(guild_id)
            .or_insert_with(|| GuildConfig {
                guild_id: guild_id.get(),
                ..Default::default()
            });
        config.log_channel_id = Some(channel_id);
    }

    /// Record a warning and return it
    pub fn add_warn(&self, user_id: u64, issuer_id: u64, guild_id: u64, reason: String) -> WarnRecord {
        let record = WarnRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            issuer_id,
            guild_id,
            reason,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        self.0.warns.insert(record.id.clone(), record.clone());
        record
    }

    /// All warnings on record for a user in a guild, oldest first
    #[must_use]
    pub fn warns_for(&self, guild_id: u64, user_id: u64) -> Vec<WarnRecord> {
        let mut records: Vec<WarnRecord> = self
            .0
            .warns
            .iter()
            .filter(|entry| {
                entry.value().guild_id == guild_id && entry.value().user_id == user_id
            })
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        records
    }

    /// Save config and warn state to YAML files
    ///
    /// The restriction store persists itself on every mutation and is
    /// not written here.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be created or a
    /// file cannot be serialized or written.
    pub async fn save(&self) -> ModerationResult<()> {
        self.0.save().await
    }
}

/// Main centralized data structure for the bot
pub struct DataInner {
    // Map of guild_id -> guild configuration
    pub guild_configs: DashMap<serenity::GuildId, GuildConfig>,
    // Map of warn_id -> warn record
    pub warns: DashMap<String, WarnRecord>,
    // Durable restriction state, shared with the coordinator
    pub restrictions: Arc<RestrictionStore>,
    // Sliding-window rule evaluation
    pub classifier: ViolationClassifier,
    // Audit-trail attribution state
    pub correlator: AuditLogCorrelator,
}

impl DataInner {
    /// Load data from the YAML files under data/
    pub async fn load() -> ModerationResult<Self> {
        let guild_configs = DashMap::new();
        if let Ok(file_content) = tokio::fs::read_to_string(CONFIG_FILE).await {
            if let Ok(configs) = serde_yaml::from_str::<Vec<GuildConfig>>(&file_content) {
                for config in configs {
                    let guild_id = serenity::GuildId::new(config.guild_id);
                    guild_configs.insert(guild_id, config);
                }
            }
        }

        let warns = DashMap::new();
        if let Ok(file_content) = tokio::fs::read_to_string(WARNS_FILE).await {
            if let Ok(records) = serde_yaml::from_str::<Vec<WarnRecord>>(&file_content) {
                for record in records {
                    warns.insert(record.id.clone(), record);
                }
            }
        }

        // Detection rules are operator-tunable but optional on disk.
        let rules = match tokio::fs::read_to_string(RULES_FILE).await {
            Ok(file_content) => {
                serde_yaml::from_str::<RuleConfig>(&file_content).unwrap_or_default()
            }
            Err(_) => RuleConfig::default(),
        };

        let restrictions = Arc::new(RestrictionStore::open(RESTRICTIONS_FILE).await?);

        Ok(Self {
            guild_configs,
            warns,
            restrictions,
            classifier: ViolationClassifier::new(rules),
            correlator: AuditLogCorrelator::new(),
        })
    }

    /// Save config and warn state to YAML files
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be created or a
    /// file cannot be serialized or written.
    pub async fn save(&self) -> ModerationResult<()> {
        if !std::path::Path::new("data").exists() {
            tokio::fs::create_dir_all("data").await?;
        }

        let mut configs: Vec<GuildConfig> = self
            .guild_configs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        configs.sort_by_key(|config| config.guild_id);
        let yaml = serde_yaml::to_string(&configs)?;
        tokio::fs::write(CONFIG_FILE, yaml).await?;

        let mut records: Vec<WarnRecord> = self
            .warns
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let warns_yaml = serde_yaml::to_string(&records)?;
        tokio::fs::write(WARNS_FILE, warns_yaml).await?;

        Ok(())
    }
}
