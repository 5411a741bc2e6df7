//! Command line and environment configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::http::Uri;
use tracing::level_filters::LevelFilter;

use crate::lifecycle::{EntryMode, MatchId, DEFAULT_GAME};
use crate::session::DEFAULT_REQUEST_TIMEOUT;

pub const DEFAULT_SERVER: &str = "ws://127.0.0.1:14200";
const CREATOR_NAME: &str = "player1";
const GUEST_NAME: &str = "player2";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unsupported server host `{0}`: expected a ws:// or wss:// url")]
    UnsupportedServer(String),
    #[error("invalid server url `{url}`: {reason}")]
    InvalidServer { url: String, reason: String },
    #[error("both a match to join ({join}) and a match to spectate ({spectate}) were given")]
    JoinAndSpectate { join: String, spectate: String },
}

#[derive(clap::Parser, Debug, Clone, Serialize, Deserialize)]
pub struct ConfigArgs {
    /// Websocket endpoint of the game server.
    #[clap(long, default_value = DEFAULT_SERVER, env = "CHIMERA_SERVER")]
    pub server: String,

    /// Game to create or join.
    #[clap(long, default_value = DEFAULT_GAME, env = "CHIMERA_GAME")]
    pub game: String,

    /// Name to play under. Defaults to `player1` when creating a match and
    /// `player2` otherwise.
    #[clap(long, env = "CHIMERA_PLAYER_NAME")]
    pub player_name: Option<String>,

    /// Join an existing match instead of creating one.
    #[clap(long, value_name = "MATCH", conflicts_with = "spectate", env = "CHIMERA_JOIN")]
    pub join: Option<String>,

    /// Watch an existing match without playing.
    #[clap(long, value_name = "MATCH", env = "CHIMERA_SPECTATE")]
    pub spectate: Option<String>,

    /// How long a request may stay unanswered before it is failed locally.
    #[serde(with = "serde_duration")]
    #[clap(long, default_value = "30s", value_parser = parse_duration, env = "CHIMERA_REQUEST_TIMEOUT")]
    pub request_timeout: Duration,

    #[serde(with = "serde_level_filter")]
    #[clap(long, default_value = "info", env = "CHIMERA_LOG_LEVEL")]
    pub log_level: LevelFilter,
}

impl Default for ConfigArgs {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_owned(),
            game: DEFAULT_GAME.to_owned(),
            player_name: None,
            join: None,
            spectate: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            log_level: LevelFilter::INFO,
        }
    }
}

impl ConfigArgs {
    /// Validates the arguments and resolves the defaults that depend on the
    /// entry mode.
    pub fn build(self) -> Result<Config, ConfigError> {
        check_server(&self.server)?;
        let entry = match (self.join, self.spectate) {
            (Some(join), Some(spectate)) => {
                return Err(ConfigError::JoinAndSpectate { join, spectate })
            }
            (Some(id), None) => EntryMode::Join(MatchId::from(id)),
            (None, Some(id)) => EntryMode::Spectate(MatchId::from(id)),
            (None, None) => EntryMode::Create,
        };
        let player_name = self.player_name.unwrap_or_else(|| {
            match entry {
                EntryMode::Create => CREATOR_NAME,
                EntryMode::Join(_) | EntryMode::Spectate(_) => GUEST_NAME,
            }
            .to_owned()
        });
        Ok(Config {
            server: self.server,
            game: self.game,
            player_name,
            entry,
            request_timeout: self.request_timeout,
            log_level: self.log_level,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: String,
    pub game: String,
    pub player_name: String,
    pub entry: EntryMode,
    pub request_timeout: Duration,
    pub log_level: LevelFilter,
}

fn check_server(url: &str) -> Result<(), ConfigError> {
    let uri = url.parse::<Uri>().map_err(|e| ConfigError::InvalidServer {
        url: url.to_owned(),
        reason: e.to_string(),
    })?;
    match uri.scheme_str() {
        Some("ws") | Some("wss") if uri.host().is_some_and(|h| !h.is_empty()) => Ok(()),
        _ => Err(ConfigError::UnsupportedServer(url.to_owned())),
    }
}

fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s.trim())
}

mod serde_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

mod serde_level_filter {
    use serde::{Deserialize, Deserializer, Serializer};
    use tracing::level_filters::LevelFilter;

    pub fn serialize<S>(level: &LevelFilter, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&level.to_string().to_lowercase())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level = String::deserialize(deserializer)?;
        level
            .trim()
            .parse::<LevelFilter>()
            .map_err(|_| serde::de::Error::custom(format!("unknown log level: {level}")))
    }
}
