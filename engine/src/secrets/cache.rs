use crate::secrets::string::SecretString;
use crate::secrets::SecretManager;
use sdk::errors::EngineError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// In-memory cache in front of [`SecretManager`].
///
/// Provider clients are rebuilt per process, not per turn, but `doctor`
/// and `serve` both resolve the same keys more than once during startup.
#[derive(Clone)]
pub struct SecretCache {
    manager: Arc<SecretManager>,
    cache: Arc<RwLock<HashMap<String, SecretString>>>,
}

impl SecretCache {
    pub fn new(manager: Arc<SecretManager>) -> Self {
        Self {
            manager,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Resolve a secret, consulting the cache first.
    ///
    /// Returns `Ok(None)` when neither the environment nor the keychain holds it.
    pub fn get_secret(&self, key: &str) -> Result<Option<SecretString>, EngineError> {
        if let Ok(cache) = self.cache.read() {
            if let Some(secret) = cache.get(key) {
                return Ok(Some(secret.clone()));
            }
        }

        let Some(raw) = self.manager.get_secret(key)? else {
            return Ok(None);
        };
        let secret = SecretString::new(raw);

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key.to_string(), secret.clone());
        }

        Ok(Some(secret))
    }
}
