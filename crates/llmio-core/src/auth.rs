use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::Rng;
use time::OffsetDateTime;
use tokio::sync::OnceCell;
use tracing::warn;

use llmio_storage::{AuthKeyRow, Storage};

use crate::error::DispatchError;
use crate::principal::Principal;

const KEY_PREFIX: &str = "sk-llmio-";
const KEY_RANDOM_LEN: usize = 36;

type SharedLookup = Arc<OnceCell<Option<AuthKeyRow>>>;

/// Token → principal resolution. Concurrent lookups for the same token
/// collapse into one DB round trip (which also stamps `last_used_at`); the
/// usage counter is bumped on a detached task so authorization never waits
/// on the extra write.
pub struct AuthService {
    storage: Arc<dyn Storage>,
    admin_token: Option<String>,
    inflight: Mutex<HashMap<String, SharedLookup>>,
}

impl AuthService {
    pub fn new(storage: Arc<dyn Storage>, admin_token: Option<String>) -> Self {
        Self {
            storage,
            admin_token,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }

    pub async fn authorize(&self, raw_token: Option<&str>) -> Result<Principal, DispatchError> {
        match &self.admin_token {
            // No token configured: the gateway is open and every caller is
            // the admin principal.
            None => return Ok(Principal::admin()),
            Some(admin) if raw_token == Some(admin.as_str()) => return Ok(Principal::admin()),
            Some(_) => {}
        }

        let token = raw_token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(DispatchError::Unauthorized)?;

        let row = self
            .lookup_shared(token)
            .await?
            .ok_or(DispatchError::Unauthorized)?;
        if !row.enabled {
            return Err(DispatchError::Unauthorized);
        }
        if let Some(expires_at) = row.expires_at
            && expires_at < OffsetDateTime::now_utc()
        {
            return Err(DispatchError::Unauthorized);
        }

        let storage = self.storage.clone();
        let key_id = row.id;
        tokio::spawn(async move {
            if let Err(err) = storage.bump_auth_key_usage(key_id).await {
                warn!(event = "auth_usage_bump_failed", key_id, error = %err);
            }
        });

        Ok(Principal {
            auth_key_id: row.id,
            allow_all: row.allow_all,
            allow_models: row.allow_models.into_iter().collect(),
        })
    }

    async fn lookup_shared(
        &self,
        token: &str,
    ) -> Result<Option<AuthKeyRow>, DispatchError> {
        let cell = {
            let Ok(mut inflight) = self.inflight.lock() else {
                // Degenerate case: fall back to an unshared lookup.
                return Ok(self
                    .storage
                    .touch_auth_key(token, OffsetDateTime::now_utc())
                    .await?);
            };
            inflight
                .entry(token.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell
            .get_or_try_init(|| async {
                self.storage
                    .touch_auth_key(token, OffsetDateTime::now_utc())
                    .await
            })
            .await
            .map(Clone::clone);

        if let Ok(mut inflight) = self.inflight.lock() {
            inflight.remove(token);
        }
        Ok(result?)
    }
}

/// `sk-llmio-` + 36 characters from `[0-9A-Za-z]`.
pub fn generate_auth_key() -> String {
    let random: String = rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(KEY_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("{KEY_PREFIX}{random}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_prefix_and_charset() {
        let key = generate_auth_key();
        assert!(key.starts_with(KEY_PREFIX));
        let random = &key[KEY_PREFIX.len()..];
        assert_eq!(random.len(), KEY_RANDOM_LEN);
        assert!(random.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_auth_key(), key);
    }
}
