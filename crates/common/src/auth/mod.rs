//! Session authentication
//!
//! Provides:
//! - Credential check against the configured operator account
//! - In-memory server-side session store keyed by a random cookie value
//! - Middleware guarding the story and voice routes

use crate::config::AuthConfig;
use crate::errors::{AppError, Result};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Server-side login sessions
pub struct SessionStore {
    sessions: RwLock<HashMap<String, DateTime<Utc>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Start a session and return its id
    pub async fn create(&self) -> String {
        let id = Uuid::new_v4().simple().to_string();
        let expires_at = Utc::now() + self.ttl;
        self.sessions.write().await.insert(id.clone(), expires_at);
        id
    }

    /// True when the session exists and has not expired.
    /// Expired entries are dropped on lookup.
    pub async fn is_valid(&self, id: &str) -> bool {
        let now = Utc::now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(id) {
                Some(expires_at) if *expires_at > now => return true,
                Some(_) => {}
                None => return false,
            }
        }
        self.sessions.write().await.remove(id);
        false
    }

    pub async fn revoke(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }

    /// Remove every expired session, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, expires_at| *expires_at > now);
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// SHA-256 hex digest used for credential comparison
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a login attempt against the configured account.
///
/// An empty configured password disables login entirely.
pub fn verify_credentials(config: &AuthConfig, username: &str, password: &str) -> bool {
    if config.password.is_empty() {
        return false;
    }
    hash_secret(username) == hash_secret(&config.username)
        && hash_secret(password) == hash_secret(&config.password)
}

/// Value for the `Set-Cookie` header issued after a successful login
pub fn session_cookie(name: &str, id: &str, ttl_secs: u64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        name, id, ttl_secs
    )
}

/// Find the named cookie across all `Cookie` headers
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// State for [`require_login`]
#[derive(Clone)]
pub struct SessionGuard {
    pub store: Arc<SessionStore>,
    pub cookie_name: String,
    pub enabled: bool,
}

impl SessionGuard {
    pub fn new(store: Arc<SessionStore>, config: &AuthConfig) -> Self {
        Self {
            store,
            cookie_name: config.session_cookie.clone(),
            enabled: config.require_login,
        }
    }

    /// Check the request's session cookie
    pub async fn check(&self, headers: &HeaderMap) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let Some(id) = cookie_value(headers, &self.cookie_name) else {
            return Err(AppError::Unauthorized {
                message: "missing session cookie".to_string(),
            });
        };

        if !self.store.is_valid(id).await {
            debug!("Rejected unknown or expired session");
            return Err(AppError::Unauthorized {
                message: "session expired or unknown".to_string(),
            });
        }

        Ok(())
    }
}

/// Middleware rejecting requests without a live session
pub async fn require_login(
    State(guard): State<SessionGuard>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    guard.check(request.headers()).await?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn auth_config(password: &str) -> AuthConfig {
        AuthConfig {
            username: "admin".to_string(),
            password: password.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_hash_secret() {
        let hash = hash_secret("open sesame");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_secret("open sesame"));
        assert_ne!(hash, hash_secret("open sesame!"));
    }

    #[test]
    fn test_verify_credentials() {
        let config = auth_config("s3cret");
        assert!(verify_credentials(&config, "admin", "s3cret"));
        assert!(!verify_credentials(&config, "admin", "wrong"));
        assert!(!verify_credentials(&config, "root", "s3cret"));
    }

    #[test]
    fn test_empty_password_disables_login() {
        let config = auth_config("");
        assert!(!verify_credentials(&config, "admin", ""));
    }

    #[test]
    fn test_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark; session=abc123"));
        headers.append(header::COOKIE, HeaderValue::from_static("other=1"));

        assert_eq!(cookie_value(&headers, "session"), Some("abc123"));
        assert_eq!(cookie_value(&headers, "other"), Some("1"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_session_cookie_format() {
        let cookie = session_cookie("session", "abc", 60);
        assert!(cookie.starts_with("session=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=60"));
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = SessionStore::new(3600);
        let id = store.create().await;

        assert!(store.is_valid(&id).await);
        assert!(!store.is_valid("forged").await);

        store.revoke(&id).await;
        assert!(!store.is_valid(&id).await);
    }

    #[tokio::test]
    async fn test_expired_sessions_are_rejected() {
        let store = SessionStore::new(0);
        let id = store.create().await;

        assert!(!store.is_valid(&id).await);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = SessionStore::new(0);
        store.create().await;
        store.create().await;
        assert_eq!(store.purge_expired().await, 2);
    }

    #[tokio::test]
    async fn test_guard() {
        let store = Arc::new(SessionStore::new(3600));
        let guard = SessionGuard::new(store.clone(), &auth_config("pw"));
        let id = store.create().await;

        let mut headers = HeaderMap::new();
        assert!(guard.check(&headers).await.is_err());

        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("session={}", id)).unwrap(),
        );
        assert!(guard.check(&headers).await.is_ok());

        let open = SessionGuard {
            enabled: false,
            ..guard
        };
        assert!(open.check(&HeaderMap::new()).await.is_ok());
    }
}
