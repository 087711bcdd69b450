//! reqwest implementation of the request adapter.
//!
//! Two clients are kept: one with a cookie store for credentialed requests
//! and one without. Non-2xx responses and `success: false` envelopes become
//! [`RequestError::Server`]; transport failures become
//! [`RequestError::Network`].

use async_trait::async_trait;
use authcache_api_types::{Envelope, ErrorBody};
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::application::transport::{HttpMethod, RequestAdapter, RequestDescriptor, RequestError};
use crate::config::ApiSettings;

use super::error::InfraError;

#[derive(Clone, Debug)]
pub struct HttpAdapter {
    base: String,
    credentialed: Client,
    anonymous: Client,
    send_credentials: bool,
}

impl HttpAdapter {
    pub fn new(settings: &ApiSettings) -> Result<Self, InfraError> {
        let build = |cookies: bool| {
            Client::builder()
                .user_agent(Self::user_agent())
                .timeout(settings.timeout)
                .cookie_store(cookies)
                .build()
                .map_err(|err| InfraError::http_client(err.to_string()))
        };

        Ok(Self {
            base: settings.base_url.as_str().trim_end_matches('/').to_string(),
            credentialed: build(true)?,
            anonymous: build(false)?,
            send_credentials: settings.with_credentials,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("authcache/", env!("CARGO_PKG_VERSION"))
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base, path)
        } else {
            format!("{}/{}", self.base, path)
        }
    }

    fn client(&self) -> &Client {
        if self.send_credentials {
            &self.credentialed
        } else {
            &self.anonymous
        }
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn network_error(err: &reqwest::Error) -> RequestError {
    if err.is_timeout() {
        RequestError::network("request timed out")
    } else if err.is_connect() {
        RequestError::network(format!("connection failed: {err}"))
    } else {
        RequestError::network(err.to_string())
    }
}

#[async_trait]
impl RequestAdapter for HttpAdapter {
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    async fn call(&self, request: RequestDescriptor) -> Result<Envelope, RequestError> {
        let mut builder = self
            .client()
            .request(method(request.method), self.url(&request.path));
        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|err| network_error(&err))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|err| network_error(&err))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&bytes)
                .ok()
                .and_then(|body| body.message);
            debug!(status = status.as_u16(), "Request rejected");
            return Err(RequestError::server(status.as_u16(), message));
        }

        if bytes.is_empty() {
            return Ok(Envelope::ok(Value::Null));
        }

        let envelope: Envelope = serde_json::from_slice(&bytes).map_err(|err| {
            RequestError::server(
                status.as_u16(),
                Some(format!("malformed response envelope: {err}")),
            )
        })?;

        if !envelope.success {
            return Err(RequestError::server(status.as_u16(), envelope.message));
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use url::Url;

    use super::*;

    fn adapter(base: &str) -> HttpAdapter {
        HttpAdapter::new(&ApiSettings {
            base_url: Url::parse(base).expect("valid url"),
            timeout: Duration::from_secs(1),
            with_credentials: true,
        })
        .expect("client builds")
    }

    #[test]
    fn url_joins_base_and_path() {
        let adapter = adapter("http://localhost:5000/api/v1/");
        assert_eq!(
            adapter.url("/users/me"),
            "http://localhost:5000/api/v1/users/me"
        );
        assert_eq!(
            adapter.url("auth/login"),
            "http://localhost:5000/api/v1/auth/login"
        );
    }

    #[test]
    fn user_agent_carries_version() {
        assert!(HttpAdapter::user_agent().starts_with("authcache/"));
    }
}
