use std::{fs, path::PathBuf, process};

use authcache::{
    application::{
        auth::AuthClient,
        error::{AppError, ErrorReport},
        session::SessionState,
    },
    config::{self, Command, CredentialArgs},
    infra::telemetry,
};
use authcache_api_types::{Envelope, LoginRequest, RegisterRequest};
use serde::Serialize;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = ErrorReport::from_error("authcache::main", error);
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?report.messages, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?report.messages, "application error");
    });
}

#[derive(Debug, Serialize)]
struct CommandOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    session: SessionState,
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    let command = cli_args
        .command
        .unwrap_or(Command::Status(config::StatusArgs::default()));

    telemetry::init(&settings.logging)?;
    info!(
        base_url = %settings.api.base_url,
        timeout_ms = settings.api.timeout.as_millis() as u64,
        "authcache starting"
    );

    let client = AuthClient::from_settings(&settings)?;
    // Subscribed for the whole run so mutations re-fetch it instead of evicting it.
    let mut session = client.session();

    match command {
        Command::Status(_) => {
            let state = session.resolved().await;
            print_json(&CommandOutput {
                message: None,
                session: state,
            })
        }
        Command::Login(args) => {
            session.resolved().await;
            let request = LoginRequest {
                email: args.credentials.email.clone(),
                password: read_password(&args.credentials)?,
            };
            let envelope = client.login(&request).await?;
            print_json(&output(envelope, session.state()))?;

            if args.then_logout {
                let envelope = client.logout().await?;
                print_json(&output(envelope, session.resolved().await))?;
            }
            Ok(())
        }
        Command::Register(args) => {
            session.resolved().await;
            let request = RegisterRequest {
                name: args.name.clone(),
                email: args.credentials.email.clone(),
                password: read_password(&args.credentials)?,
            };
            let envelope = client.register(&request).await?;
            print_json(&output(envelope, session.state()))
        }
        Command::Logout(_) => {
            let envelope = client.logout().await?;
            print_json(&output(envelope, session.resolved().await))
        }
    }
}

fn output(envelope: Envelope, session: SessionState) -> CommandOutput {
    CommandOutput {
        message: envelope.message,
        session,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::unexpected(format!("failed to render output: {e}")))?;
    println!("{out}");
    Ok(())
}

/// The password file wins over `--password` / `AUTHCACHE_PASSWORD`.
fn read_password(credentials: &CredentialArgs) -> Result<String, AppError> {
    read_secret(
        credentials.password.clone(),
        credentials.password_file.clone(),
    )
}

fn read_secret(value: Option<String>, file: Option<PathBuf>) -> Result<String, AppError> {
    let secret = if let Some(path) = file {
        fs::read_to_string(&path).map_err(|err| {
            AppError::invalid_input(format!("failed to read {}: {err}", path.display()))
        })?
    } else if let Some(value) = value {
        value
    } else {
        return Err(AppError::invalid_input(
            "password required (use --password-file or AUTHCACHE_PASSWORD)",
        ));
    };

    let trimmed = secret.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        return Err(AppError::invalid_input("password must not be empty"));
    }
    Ok(trimmed.to_string())
}
