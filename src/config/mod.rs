//! Settings for the server and the operator commands.

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "yatube";
const ENV_PREFIX: &str = "YATUBE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_UPLOAD_DIR: &str = "media";
const DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_INDEX_CACHE_TTL_SECS: u64 = 20;
const DEFAULT_CACHE_MAX_ENTRIES: usize = 200;
const DEFAULT_USER_HEADER: &str = "x-remote-user";

/// Command-line arguments for the Yatube binary.
#[derive(Debug, Parser)]
#[command(name = "yatube", version, about = "Yatube blogging server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "YATUBE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP server.
    Serve(Box<ServeArgs>),
    /// Register a user account.
    #[command(name = "create-user")]
    CreateUser(CreateUserArgs),
    /// Register a post group.
    #[command(name = "create-group")]
    CreateGroup(CreateGroupArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the header carrying the authenticated username.
    #[arg(long = "server-user-header", value_name = "HEADER")]
    pub server_user_header: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the uploads directory.
    #[arg(long = "uploads-directory", value_name = "PATH")]
    pub uploads_directory: Option<PathBuf>,

    /// Override the maximum request size for uploads in bytes.
    #[arg(long = "uploads-max-request-bytes", value_name = "BYTES")]
    pub uploads_max_request_bytes: Option<u64>,

    /// Toggle the index page cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override how long a cached index page stays fresh.
    #[arg(long = "cache-index-ttl-seconds", value_name = "SECONDS")]
    pub cache_index_ttl_seconds: Option<u64>,

    /// Override how many pages the cache holds before evicting the least recent.
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct CreateUserArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Login name of the new user.
    #[arg(value_name = "USERNAME")]
    pub username: String,

    #[arg(long = "first-name", default_value = "")]
    pub first_name: String,

    #[arg(long = "last-name", default_value = "")]
    pub last_name: String,
}

#[derive(Debug, Args, Clone)]
pub struct CreateGroupArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Display title of the group.
    #[arg(value_name = "TITLE")]
    pub title: String,

    /// URL slug; derived from the title when omitted.
    #[arg(long)]
    pub slug: Option<String>,

    #[arg(long, default_value = "")]
    pub description: String,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub uploads: UploadSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    /// Lowercased request header naming the signed-in user.
    pub user_header: String,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub directory: PathBuf,
    pub max_request_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub index_ttl: Duration,
    pub max_entries: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Resolve settings: `config/default.*`, then `yatube.*`, then `--config-file`,
/// then `YATUBE__*` variables, then command-line overrides.
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let explicit = cli
        .config_file
        .as_deref()
        .map(|path| File::from(path).required(true));

    let mut raw: RawSettings = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false))
        .add_source(explicit.into_iter().collect::<Vec<_>>())
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?
        .try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::CreateUser(args)) => raw.apply_database_override(&args.database),
        Some(Command::CreateGroup(args)) => raw.apply_database_override(&args.database),
        None => {}
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    uploads: RawUploadSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, o: &ServeOverrides) {
        overlay(&mut self.server.host, &o.server_host);
        overlay(&mut self.server.port, &o.server_port);
        overlay(
            &mut self.server.graceful_shutdown_seconds,
            &o.server_graceful_shutdown_seconds,
        );
        overlay(&mut self.server.user_header, &o.server_user_header);
        overlay(&mut self.logging.level, &o.log_level);
        overlay(&mut self.logging.json, &o.log_json);
        overlay(&mut self.database.url, &o.database_url);
        overlay(&mut self.database.max_connections, &o.database_max_connections);
        overlay(&mut self.uploads.directory, &o.uploads_directory);
        overlay(&mut self.uploads.max_request_bytes, &o.uploads_max_request_bytes);
        overlay(&mut self.cache.enabled, &o.cache_enabled);
        overlay(&mut self.cache.index_ttl_seconds, &o.cache_index_ttl_seconds);
        overlay(&mut self.cache.max_entries, &o.cache_max_entries);
    }

    fn apply_database_override(&mut self, o: &DatabaseOverride) {
        overlay(&mut self.database.url, &o.database_url);
    }
}

/// A value given on the command line replaces whatever the files and environment said.
fn overlay<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        slot.clone_from(value);
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            server: raw.server.resolve()?,
            logging: raw.logging.resolve()?,
            database: raw.database.resolve()?,
            uploads: raw.uploads.resolve()?,
            cache: raw.cache.resolve()?,
        })
    }
}

impl RawServerSettings {
    fn resolve(self) -> Result<ServerSettings, LoadError> {
        let port = self.port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(LoadError::invalid("server.port", "must be greater than zero"));
        }
        let host = self.host.as_deref().unwrap_or(DEFAULT_HOST);
        let addr = format!("{host}:{port}")
            .parse::<SocketAddr>()
            .map_err(|err| {
                LoadError::invalid("server.addr", format!("`{host}:{port}`: {err}"))
            })?;

        let graceful_shutdown = positive_secs(
            self.graceful_shutdown_seconds
                .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS),
            "server.graceful_shutdown_seconds",
        )?;

        let user_header = match self.user_header {
            Some(value) => value.trim().to_ascii_lowercase(),
            None => DEFAULT_USER_HEADER.to_string(),
        };
        if let Err(err) = axum::http::HeaderName::from_str(&user_header) {
            return Err(LoadError::invalid(
                "server.user_header",
                format!("invalid header name: {err}"),
            ));
        }

        Ok(ServerSettings {
            addr,
            graceful_shutdown,
            user_header,
        })
    }
}

impl RawLoggingSettings {
    fn resolve(self) -> Result<LoggingSettings, LoadError> {
        let level = self
            .level
            .as_deref()
            .map(LevelFilter::from_str)
            .transpose()
            .map_err(|err| LoadError::invalid("logging.level", err.to_string()))?
            .unwrap_or(LevelFilter::INFO);
        let format = match self.json {
            Some(true) => LogFormat::Json,
            _ => LogFormat::Compact,
        };
        Ok(LoggingSettings { level, format })
    }
}

impl RawDatabaseSettings {
    fn resolve(self) -> Result<DatabaseSettings, LoadError> {
        let url = self
            .url
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let max_connections =
            NonZeroU32::new(self.max_connections.unwrap_or(DEFAULT_DB_MAX_CONNECTIONS))
                .ok_or_else(|| {
                    LoadError::invalid("database.max_connections", "must be greater than zero")
                })?;
        Ok(DatabaseSettings {
            url,
            max_connections,
        })
    }
}

impl RawUploadSettings {
    fn resolve(self) -> Result<UploadSettings, LoadError> {
        let directory = self
            .directory
            .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR));
        if directory.as_os_str().is_empty() {
            return Err(LoadError::invalid("uploads.directory", "must not be empty"));
        }

        let limit = self
            .max_request_bytes
            .unwrap_or(DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES);
        let max_request_bytes = NonZeroU64::new(limit)
            .filter(|limit| usize::try_from(limit.get()).is_ok())
            .ok_or_else(|| {
                LoadError::invalid(
                    "uploads.max_request_bytes",
                    format!("{limit} is not a usable request size"),
                )
            })?;

        Ok(UploadSettings {
            directory,
            max_request_bytes,
        })
    }
}

impl RawCacheSettings {
    fn resolve(self) -> Result<CacheSettings, LoadError> {
        let enabled = self.enabled.unwrap_or(true);
        let ttl_seconds = self
            .index_ttl_seconds
            .unwrap_or(DEFAULT_INDEX_CACHE_TTL_SECS);
        if enabled && ttl_seconds == 0 {
            return Err(LoadError::invalid(
                "cache.index_ttl_seconds",
                "must be greater than zero while the cache is enabled",
            ));
        }

        let max_entries = NonZeroUsize::new(
            self.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
        )
        .ok_or_else(|| LoadError::invalid("cache.max_entries", "must be greater than zero"))?;

        Ok(CacheSettings {
            enabled,
            index_ttl: Duration::from_secs(ttl_seconds),
            max_entries,
        })
    }
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    user_header: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUploadSettings {
    directory: Option<PathBuf>,
    max_request_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    index_ttl_seconds: Option<u64>,
    max_entries: Option<usize>,
}

/// Parse the process arguments and resolve settings from them.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    load(&args).map(|settings| (args, settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
        assert_eq!(settings.server.user_header, DEFAULT_USER_HEADER);
        assert!(settings.cache.enabled);
        assert_eq!(settings.cache.index_ttl, Duration::from_secs(20));
        assert_eq!(settings.cache.max_entries.get(), DEFAULT_CACHE_MAX_ENTRIES);
        assert_eq!(
            settings.uploads.max_request_bytes.get(),
            DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES
        );
        assert!(settings.database.url.is_none());
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());
        raw.cache.index_ttl_seconds = Some(60);

        let overrides = ServeOverrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            cache_index_ttl_seconds: Some(5),
            ..Default::default()
        };
        raw.apply_serve_overrides(&overrides);

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(settings.cache.index_ttl, Duration::from_secs(5));
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        raw.apply_serve_overrides(&ServeOverrides {
            log_json: Some(true),
            ..Default::default()
        });
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn invalid_values_name_their_key() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(0);
        match Settings::from_raw(raw) {
            Err(LoadError::Invalid { key, .. }) => assert_eq!(key, "server.port"),
            other => panic!("expected invalid port, got {other:?}"),
        }

        let mut raw = RawSettings::default();
        raw.cache.index_ttl_seconds = Some(0);
        assert!(Settings::from_raw(raw).is_err());

        let mut raw = RawSettings::default();
        raw.cache.enabled = Some(false);
        raw.cache.index_ttl_seconds = Some(0);
        assert!(Settings::from_raw(raw).is_ok());

        let mut raw = RawSettings::default();
        raw.server.user_header = Some("not a header".to_string());
        assert!(Settings::from_raw(raw).is_err());

        let mut raw = RawSettings::default();
        raw.cache.max_entries = Some(0);
        match Settings::from_raw(raw) {
            Err(LoadError::Invalid { key, .. }) => assert_eq!(key, "cache.max_entries"),
            other => panic!("expected invalid cache size, got {other:?}"),
        }
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["yatube"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_create_user_arguments() {
        let args = CliArgs::parse_from([
            "yatube",
            "create-user",
            "leo",
            "--first-name",
            "Leo",
            "--database-url",
            "postgres://example",
        ]);
        match args.command.expect("create-user command") {
            Command::CreateUser(user) => {
                assert_eq!(user.username, "leo");
                assert_eq!(user.first_name, "Leo");
                assert_eq!(user.last_name, "");
                assert_eq!(
                    user.database.database_url.as_deref(),
                    Some("postgres://example")
                );
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_create_group_arguments() {
        let args = CliArgs::parse_from(["yatube", "create-group", "Cats", "--slug", "cats"]);
        match args.command.expect("create-group command") {
            Command::CreateGroup(group) => {
                assert_eq!(group.title, "Cats");
                assert_eq!(group.slug.as_deref(), Some("cats"));
                assert_eq!(group.description, "");
            }
            _ => panic!("wrong command parsed"),
        }
    }
}
