use std::error::Error as StdError;

use thiserror::Error;

use crate::{config::LoadError, infra::error::InfraError};

use super::{endpoints::EndpointError, transport::RequestError};

/// An error with its full source chain flattened for reporting.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error("unknown endpoint `{0}`")]
    UnknownEndpoint(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// The request error behind this failure, if any.
    pub fn request_error(&self) -> Option<&RequestError> {
        match self {
            AppError::Request(error) => Some(error),
            _ => None,
        }
    }

    /// Process exit code for the command-line client.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Request(RequestError::Server { .. }) => 3,
            AppError::Request(RequestError::Network { .. }) => 4,
            AppError::Config(_) | AppError::InvalidInput(_) => 2,
            AppError::Endpoint(_)
            | AppError::Infra(_)
            | AppError::UnknownEndpoint(_)
            | AppError::Unexpected(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_flattens_source_chain() {
        let error = AppError::Infra(InfraError::http_client("tls backend unavailable"));
        let report = ErrorReport::from_error("test", &error);

        assert_eq!(
            report.messages[0],
            "http client error: tls backend unavailable"
        );
    }

    #[test]
    fn request_errors_map_to_distinct_exit_codes() {
        assert_eq!(
            AppError::from(RequestError::server(401, None)).exit_code(),
            3
        );
        assert_eq!(
            AppError::from(RequestError::network("refused")).exit_code(),
            4
        );
        assert_eq!(AppError::invalid_input("missing password").exit_code(), 2);
    }
}
