use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the authcache binary.
#[derive(Debug, Parser)]
#[command(
    name = "authcache",
    version,
    about = "Session-aware query cache client"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "AUTHCACHE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Resolve and print the current session.
    Status(StatusArgs),
    /// Log in, then print the refreshed session.
    Login(LoginArgs),
    /// Create an account, then print the refreshed session.
    Register(RegisterArgs),
    /// Log out, reset the cache and print the session.
    Logout(LogoutArgs),
}

impl Command {
    pub fn overrides(&self) -> &ClientOverrides {
        match self {
            Command::Status(args) => &args.overrides,
            Command::Login(args) => &args.overrides,
            Command::Register(args) => &args.overrides,
            Command::Logout(args) => &args.overrides,
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub overrides: ClientOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct LoginArgs {
    #[command(flatten)]
    pub overrides: ClientOverrides,

    #[command(flatten)]
    pub credentials: CredentialArgs,

    /// Log out again after printing the session.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub then_logout: bool,
}

#[derive(Debug, Args, Clone)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub overrides: ClientOverrides,

    /// Display name for the new account.
    #[arg(long, value_name = "NAME")]
    pub name: String,

    #[command(flatten)]
    pub credentials: CredentialArgs,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LogoutArgs {
    #[command(flatten)]
    pub overrides: ClientOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct CredentialArgs {
    /// Account email address.
    #[arg(long, value_name = "EMAIL")]
    pub email: String,

    /// Account password.
    #[arg(
        long,
        env = "AUTHCACHE_PASSWORD",
        hide_env_values = true,
        value_name = "PASSWORD"
    )]
    pub password: Option<String>,

    /// Read the password from a file; takes precedence over --password.
    #[arg(long = "password-file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub password_file: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ClientOverrides {
    /// Override the API base URL.
    #[arg(long = "api-base-url", value_name = "URL")]
    pub api_base_url: Option<String>,

    /// Override the request timeout in milliseconds.
    #[arg(long = "api-timeout-ms", value_name = "MILLIS")]
    pub api_timeout_ms: Option<u64>,

    /// Override the cache entry limit.
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<u64>,

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
}
