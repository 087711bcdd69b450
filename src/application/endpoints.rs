//! Endpoint tables.
//!
//! Queries and mutations are declared statically and validated once when the
//! registry is built: every tag must be a declared tag type, names are unique
//! across both tables and exactly one query provides the session tag.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::cache::{DEFAULT_SESSION_TAG, Tag};

use super::transport::HttpMethod;

pub const SESSION_TAG: &str = DEFAULT_SESSION_TAG;
pub const TAG_TYPES: &[&str] = &[SESSION_TAG];

pub const CURRENT_USER: &str = "current-user";
pub const REGISTER: &str = "register";
pub const LOGIN: &str = "login";
pub const LOGOUT: &str = "logout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryEndpoint {
    pub name: &'static str,
    pub method: HttpMethod,
    pub path: &'static str,
    pub provides: &'static [&'static str],
}

impl QueryEndpoint {
    pub fn provided_tags(&self) -> BTreeSet<Tag> {
        self.provides.iter().map(|tag| Tag::from(*tag)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationEndpoint {
    pub name: &'static str,
    pub method: HttpMethod,
    pub path: &'static str,
    pub invalidates: &'static [&'static str],
    /// Success ends the session: the whole cache is reset.
    pub resets_cache: bool,
}

impl MutationEndpoint {
    pub fn invalidated_tags(&self) -> BTreeSet<Tag> {
        self.invalidates.iter().map(|tag| Tag::from(*tag)).collect()
    }
}

pub const QUERIES: &[QueryEndpoint] = &[QueryEndpoint {
    name: CURRENT_USER,
    method: HttpMethod::Get,
    path: "/users/me",
    provides: &[SESSION_TAG],
}];

pub const MUTATIONS: &[MutationEndpoint] = &[
    MutationEndpoint {
        name: REGISTER,
        method: HttpMethod::Post,
        path: "/auth/register",
        invalidates: &[SESSION_TAG],
        resets_cache: false,
    },
    MutationEndpoint {
        name: LOGIN,
        method: HttpMethod::Post,
        path: "/auth/login",
        invalidates: &[SESSION_TAG],
        resets_cache: false,
    },
    MutationEndpoint {
        name: LOGOUT,
        method: HttpMethod::Post,
        path: "/auth/logout",
        invalidates: &[SESSION_TAG],
        resets_cache: true,
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("endpoint `{endpoint}` references undeclared tag `{tag}`")]
    UnknownTag { endpoint: String, tag: String },
    #[error("tag types must be non-empty")]
    EmptyTag,
    #[error("endpoint name `{0}` is declared more than once")]
    Duplicate(String),
    #[error("session query `{0}` is not declared")]
    MissingSessionQuery(String),
    #[error("session query `{query}` does not provide tag `{tag}`")]
    SessionTagNotProvided { query: String, tag: String },
}

/// Validated endpoint tables.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    queries: HashMap<&'static str, QueryEndpoint>,
    mutations: HashMap<&'static str, MutationEndpoint>,
    session_query: QueryEndpoint,
}

impl EndpointRegistry {
    pub fn new(
        tag_types: &[&str],
        queries: &[QueryEndpoint],
        mutations: &[MutationEndpoint],
        session_query: &str,
    ) -> Result<Self, EndpointError> {
        if tag_types.iter().any(|tag| tag.trim().is_empty()) {
            return Err(EndpointError::EmptyTag);
        }
        let declared: BTreeSet<Tag> = tag_types.iter().map(|tag| Tag::from(*tag)).collect();

        let check_tags = |endpoint: &str, tags: &[&str]| {
            tags.iter()
                .find(|tag| !declared.contains(&Tag::from(**tag)))
                .map_or(Ok(()), |tag| {
                    Err(EndpointError::UnknownTag {
                        endpoint: endpoint.to_string(),
                        tag: tag.to_string(),
                    })
                })
        };

        let mut names = BTreeSet::new();
        let mut query_map = HashMap::new();
        for query in queries {
            if !names.insert(query.name) {
                return Err(EndpointError::Duplicate(query.name.to_string()));
            }
            check_tags(query.name, query.provides)?;
            query_map.insert(query.name, *query);
        }

        let mut mutation_map = HashMap::new();
        for mutation in mutations {
            if !names.insert(mutation.name) {
                return Err(EndpointError::Duplicate(mutation.name.to_string()));
            }
            check_tags(mutation.name, mutation.invalidates)?;
            mutation_map.insert(mutation.name, *mutation);
        }

        let session = query_map
            .get(session_query)
            .copied()
            .ok_or_else(|| EndpointError::MissingSessionQuery(session_query.to_string()))?;
        if !session.provides.contains(&SESSION_TAG) {
            return Err(EndpointError::SessionTagNotProvided {
                query: session_query.to_string(),
                tag: SESSION_TAG.to_string(),
            });
        }

        Ok(Self {
            queries: query_map,
            mutations: mutation_map,
            session_query: session,
        })
    }

    /// The account endpoints: register, login, logout and current-user.
    pub fn auth() -> Result<Self, EndpointError> {
        Self::new(TAG_TYPES, QUERIES, MUTATIONS, CURRENT_USER)
    }

    pub fn query(&self, name: &str) -> Option<&QueryEndpoint> {
        self.queries.get(name)
    }

    pub fn mutation(&self, name: &str) -> Option<&MutationEndpoint> {
        self.mutations.get(name)
    }

    pub fn session_query(&self) -> &QueryEndpoint {
        &self.session_query
    }
}
