//! Fetcher for declared query endpoints.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use url::form_urlencoded;

use crate::cache::{CacheKey, Fetcher, Tag};

use super::endpoints::QueryEndpoint;
use super::transport::{HttpMethod, RequestAdapter, RequestDescriptor, RequestError};

/// Issues one query endpoint with fixed arguments through the adapter.
pub struct QueryFetcher {
    adapter: Arc<dyn RequestAdapter>,
    endpoint: QueryEndpoint,
    args: Value,
}

impl QueryFetcher {
    pub fn new(adapter: Arc<dyn RequestAdapter>, endpoint: QueryEndpoint, args: Value) -> Self {
        Self {
            adapter,
            endpoint,
            args,
        }
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.endpoint.name, &self.args)
    }

    /// GET and DELETE carry their arguments in the query string, other
    /// methods send them as the JSON body. Object arguments become one pair
    /// per field; any other value travels as a single `args` parameter.
    pub fn descriptor(&self) -> RequestDescriptor {
        let request = RequestDescriptor::new(self.endpoint.method, self.endpoint.path);
        let query = match (self.endpoint.method, &self.args) {
            (_, Value::Null) => return request,
            (HttpMethod::Get | HttpMethod::Delete, Value::Object(map)) => {
                let mut pairs: Vec<_> = map.iter().collect();
                pairs.sort_by(|(a, _), (b, _)| a.cmp(b));

                let mut query = form_urlencoded::Serializer::new(String::new());
                for (name, value) in pairs {
                    if !value.is_null() {
                        query.append_pair(name, &query_value(value));
                    }
                }
                query.finish()
            }
            (HttpMethod::Get | HttpMethod::Delete, args) => {
                form_urlencoded::Serializer::new(String::new())
                    .append_pair(ARGS_PARAM, &query_value(args))
                    .finish()
            }
            (_, args) => return request.with_body(args.clone()),
        };

        if query.is_empty() {
            request
        } else {
            RequestDescriptor {
                path: format!("{}?{query}", self.endpoint.path),
                ..request
            }
        }
    }
}

const ARGS_PARAM: &str = "args";

fn query_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Fetcher for QueryFetcher {
    async fn fetch(&self) -> Result<Value, RequestError> {
        self.adapter
            .call(self.descriptor())
            .await
            .map(|envelope| envelope.data)
    }

    fn provides(&self) -> BTreeSet<Tag> {
        self.endpoint.provided_tags()
    }
}
