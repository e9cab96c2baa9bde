//! Bearer token resolution for the agent service.
//!
//! Token acquisition against the identity platform happens outside this
//! tool. A token is taken from the config/environment, or read from a token
//! cache file written by other tooling. Two cache shapes are accepted:
//!
//! - `{"access_token": "..."}`
//! - a serialized MSAL cache: `{"AccessToken": {"<key>": {"secret": "...", ...}}}`
//!
//! MSAL entries are narrowed to the configured app client id and tenant
//! (`client_id` / `realm`); among the matches the latest `expires_on` wins.

use crate::config::{expand_path, AgentConfig};
use crate::error::{BenchError, Result};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub enum TokenProvider {
    Static(String),
    CacheFile {
        path: PathBuf,
        client_id: Option<String>,
        tenant_id: Option<String>,
    },
}

impl TokenProvider {
    pub fn static_token(token: impl Into<String>) -> Self {
        Self::Static(token.into())
    }

    /// A configured token wins over a token cache file.
    pub fn from_config(agent: &AgentConfig) -> Result<Self> {
        if let Some(token) = agent.token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(Self::Static(token.to_string()));
        }
        if let Some(path) = &agent.token_cache {
            return Ok(Self::CacheFile {
                path: expand_path(path),
                client_id: agent.app_client_id.clone(),
                tenant_id: agent.tenant_id.clone(),
            });
        }
        Err(BenchError::Auth {
            message: format!(
                "no bearer token configured; set {} or {}",
                crate::config::ENV_TOKEN,
                crate::config::ENV_TOKEN_CACHE
            ),
        })
    }

    pub fn resolve(&self) -> Result<String> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::CacheFile {
                path,
                client_id,
                tenant_id,
            } => {
                let contents = std::fs::read_to_string(path).map_err(|e| BenchError::Auth {
                    message: format!("reading token cache {}: {e}", path.display()),
                })?;
                let json: Value =
                    serde_json::from_str(&contents).map_err(|e| BenchError::Auth {
                        message: format!("parsing token cache {}: {e}", path.display()),
                    })?;
                token_from_cache(&json, client_id.as_deref(), tenant_id.as_deref()).ok_or_else(|| BenchError::Auth {
                    message: format!("no access token in {}", path.display()),
                })
            }
        }
    }
}

fn token_from_cache(
    json: &Value,
    client_id: Option<&str>,
    tenant_id: Option<&str>,
) -> Option<String> {
    if let Some(token) = json.get("access_token").and_then(Value::as_str) {
        return Some(token.to_string());
    }
    let field_is = |entry: &Value, key: &str, wanted: Option<&str>| match wanted {
        Some(wanted) => entry
            .get(key)
            .and_then(Value::as_str)
            .is_some_and(|v| v.eq_ignore_ascii_case(wanted)),
        None => true,
    };
    json.get("AccessToken")?
        .as_object()?
        .values()
        .filter(|entry| field_is(*entry, "client_id", client_id))
        .filter(|entry| field_is(*entry, "realm", tenant_id))
        .filter_map(|entry| {
            let secret = entry.get("secret").and_then(Value::as_str)?;
            Some((expires_on(entry), secret))
        })
        .max_by_key(|(expires, _)| *expires)
        .map(|(_, secret)| secret.to_string())
}

/// MSAL stores `expires_on` as epoch seconds in a string.
fn expires_on(entry: &Value) -> u64 {
    match entry.get("expires_on") {
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn static_token_wins() {
        let agent = AgentConfig {
            token: Some("tok".into()),
            token_cache: Some("/nonexistent".into()),
            ..AgentConfig::default()
        };
        let provider = TokenProvider::from_config(&agent).unwrap();
        assert_eq!(provider.resolve().unwrap(), "tok");
    }

    #[test]
    fn missing_token_is_auth_error() {
        let err = TokenProvider::from_config(&AgentConfig::default()).unwrap_err();
        assert!(matches!(err, BenchError::Auth { .. }));
    }

    #[test]
    fn reads_plain_cache_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("token.json");
        std::fs::write(&path, json!({"access_token": "abc"}).to_string()).unwrap();
        let provider = TokenProvider::CacheFile {
            path,
            client_id: None,
            tenant_id: None,
        };
        assert_eq!(provider.resolve().unwrap(), "abc");
    }

    #[test]
    fn reads_msal_cache_shape() {
        let cache = json!({
            "Account": {},
            "AccessToken": {
                "uid-env-accesstoken-client-tenant-scope": {"secret": "msal-secret", "target": "x"}
            }
        });
        assert_eq!(
            token_from_cache(&cache, None, None).as_deref(),
            Some("msal-secret")
        );
    }

    #[test]
    fn msal_entry_chosen_by_client_and_tenant() {
        let cache = json!({
            "AccessToken": {
                "other-app": {"secret": "wrong-app", "client_id": "app-2", "realm": "tenant-a", "expires_on": "9999999999"},
                "other-tenant": {"secret": "wrong-tenant", "client_id": "app-1", "realm": "tenant-b", "expires_on": "9999999999"},
                "stale": {"secret": "stale", "client_id": "app-1", "realm": "tenant-a", "expires_on": "1700000000"},
                "fresh": {"secret": "fresh", "client_id": "APP-1", "realm": "tenant-a", "expires_on": "1800000000"}
            }
        });
        assert_eq!(
            token_from_cache(&cache, Some("app-1"), Some("tenant-a")).as_deref(),
            Some("fresh")
        );
        assert_eq!(token_from_cache(&cache, Some("app-3"), None), None);
    }

    #[test]
    fn cache_provider_carries_configured_ids() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("msal.json");
        let cache = json!({
            "AccessToken": {
                "a": {"secret": "for-app-1", "client_id": "app-1", "realm": "t"},
                "b": {"secret": "for-app-2", "client_id": "app-2", "realm": "t"}
            }
        });
        std::fs::write(&path, cache.to_string()).unwrap();
        let agent = AgentConfig {
            token_cache: Some(path.display().to_string()),
            app_client_id: Some("app-2".into()),
            tenant_id: Some("t".into()),
            ..AgentConfig::default()
        };
        let provider = TokenProvider::from_config(&agent).unwrap();
        assert_eq!(provider.resolve().unwrap(), "for-app-2");
    }

    #[test]
    fn empty_cache_reports_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.json");
        std::fs::write(&path, "{}").unwrap();
        let err = TokenProvider::CacheFile {
            path,
            client_id: None,
            tenant_id: None,
        }
        .resolve()
        .unwrap_err();
        assert!(err.to_string().contains("empty.json"));
    }
}
