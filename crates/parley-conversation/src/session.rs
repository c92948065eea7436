//! Session identity carried in the page address.
//!
//! The identifier lives in a query parameter so reloading the same address
//! resumes the same conversation. When absent, one is generated and written
//! back without navigating.

use std::sync::{Mutex, OnceLock};

use chrono::Utc;
use url::Url;

use parley_core::config::SessionConfig;
use parley_core::error::{ParleyError, Result};
use parley_core::types::Session;

/// The client's navigable address.
pub trait Location: Send + Sync {
    fn href(&self) -> Url;

    /// Swap the current address for `url` in place, without navigating.
    fn replace(&self, url: Url);
}

/// A location held in memory, as used by the terminal client and tests.
#[derive(Debug)]
pub struct InMemoryLocation {
    url: Mutex<Url>,
}

impl InMemoryLocation {
    pub fn new(url: Url) -> Self {
        Self {
            url: Mutex::new(url),
        }
    }

    pub fn parse(url: &str) -> Result<Self> {
        Ok(Self::new(Url::parse(url)?))
    }
}

impl Location for InMemoryLocation {
    fn href(&self) -> Url {
        match self.url.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, url: Url) {
        match self.url.lock() {
            Ok(mut guard) => *guard = url,
            Err(poisoned) => *poisoned.into_inner() = url,
        }
    }
}

/// Derives the conversation identifier once per page lifetime.
#[derive(Debug)]
pub struct SessionIdentity {
    query_param: String,
    session: OnceLock<Session>,
}

impl SessionIdentity {
    pub fn new(query_param: impl Into<String>) -> Self {
        Self {
            query_param: query_param.into(),
            session: OnceLock::new(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        if config.query_param.trim().is_empty() {
            return Err(ParleyError::Config(
                "session.query_param must not be empty".to_string(),
            ));
        }
        Ok(Self::new(config.query_param.clone()))
    }

    /// Return the session for `location`, creating and recording one if the
    /// address does not carry it yet.
    pub fn ensure_session(&self, location: &dyn Location) -> Session {
        self.session
            .get_or_init(|| {
                let href = location.href();
                if let Some(existing) = read_param(&href, &self.query_param) {
                    tracing::info!(session_id = %existing, "Resuming session from address");
                    return Session::new(existing);
                }

                let session = Session::new(generate_id());
                location.replace(with_param(&href, &self.query_param, session.id()));
                tracing::info!(session_id = %session, "Created new session");
                session
            })
            .clone()
    }
}

fn read_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, value)| key == name && !value.trim().is_empty())
        .map(|(_, value)| value.into_owned())
}

/// Set `name=value` on `url`, keeping every other query pair in order.
fn with_param(url: &Url, name: &str, value: &str) -> Url {
    let others: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut rewritten = url.clone();
    rewritten
        .query_pairs_mut()
        .clear()
        .extend_pairs(others)
        .append_pair(name, value);
    rewritten
}

/// Millisecond timestamp plus a random suffix. Unique enough, not secret.
fn generate_id() -> String {
    format!(
        "{}-{:08x}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_session_is_idempotent() {
        let location = InMemoryLocation::parse("http://localhost:8000/").unwrap();
        let identity = SessionIdentity::new("session_id");

        let first = identity.ensure_session(&location);
        let second = identity.ensure_session(&location);

        assert_eq!(first, second);
        assert_eq!(
            read_param(&location.href(), "session_id").as_deref(),
            Some(first.id())
        );
    }

    #[test]
    fn test_existing_param_reused() {
        let location =
            InMemoryLocation::parse("http://localhost:8000/?session_id=abc-123").unwrap();
        let session = SessionIdentity::new("session_id").ensure_session(&location);
        assert_eq!(session.id(), "abc-123");
        assert_eq!(
            location.href().as_str(),
            "http://localhost:8000/?session_id=abc-123"
        );
    }

    #[test]
    fn test_reload_of_rewritten_address_resumes() {
        let location = InMemoryLocation::parse("http://localhost:8000/chat").unwrap();
        let created = SessionIdentity::new("session_id").ensure_session(&location);

        let reloaded = InMemoryLocation::new(location.href());
        let resumed = SessionIdentity::new("session_id").ensure_session(&reloaded);
        assert_eq!(created, resumed);
    }

    #[test]
    fn test_rewrite_keeps_other_params() {
        let location = InMemoryLocation::parse("http://localhost:8000/?lang=en&session_id=")
            .unwrap();
        let session = SessionIdentity::new("session_id").ensure_session(&location);

        let href = location.href();
        assert_eq!(read_param(&href, "lang").as_deref(), Some("en"));
        assert_eq!(href.query_pairs().filter(|(k, _)| k == "session_id").count(), 1);
        assert_eq!(read_param(&href, "session_id").as_deref(), Some(session.id()));
    }

    #[test]
    fn test_generated_ids_differ() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        let (millis, suffix) = a.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 8);
    }

    #[test]
    fn test_empty_query_param_rejected() {
        let config = SessionConfig {
            query_param: " ".to_string(),
            ..SessionConfig::default()
        };
        assert!(SessionIdentity::from_config(&config).is_err());
    }
}
