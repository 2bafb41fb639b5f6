pub mod commands;
pub mod data;
pub mod handlers;
pub mod logging;
pub mod moderation;

// Customize these constants for your bot
pub const BOT_NAME: &str = "chat_warden";
pub const COMMAND_TARGET: &str = "chat_warden::command";
pub const ERROR_TARGET: &str = "chat_warden::error";
pub const EVENT_TARGET: &str = "chat_warden::handlers";
pub const MODLOG_TARGET: &str = "chat_warden::modlog";
pub const CONSOLE_TARGET: &str = "chat_warden";

pub use data::{Data, DataInner, GuildConfig, WarnRecord};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
