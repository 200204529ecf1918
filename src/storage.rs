use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

pub const KEY_AUTH_TOKEN: &str = "auth_token";
pub const KEY_USER_ID: &str = "user_id";
pub const KEY_ANONYMOUS_USES: &str = "anonymous_uses";
pub const KEY_SELECTED_STYLE: &str = "selected_style";
pub const KEY_SELECTED_PLATFORM: &str = "selected_platform";

const DEFAULT_STYLE: &str = "balanced";

/// Persisted local key-value state (auth token, anonymous usage counter,
/// last-selected style/platform). Reads and writes never fail from the
/// caller's point of view; storage trouble is logged and absorbed.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.remove(key);
        }
    }
}

/// OS secure storage backed by the platform keyring; one entry per key
/// under a fixed service name.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Option<keyring::Entry> {
        match keyring::Entry::new(&self.service, key) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("failed to open secure storage entry for {key}: {err}");
                None
            }
        }
    }
}

impl StateStore for KeyringStore {
    fn get(&self, key: &str) -> Option<String> {
        let entry = self.entry(key)?;
        match entry.get_password() {
            Ok(value) => Some(value),
            Err(err) => {
                if !is_not_found_error(&err.to_string()) {
                    warn!("failed to read {key} from secure storage: {err}");
                }
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) {
        let Some(entry) = self.entry(key) else {
            return;
        };
        if value.trim().is_empty() {
            if let Err(err) = entry.delete_credential() {
                if !is_not_found_error(&err.to_string()) {
                    warn!("failed to clear {key} in secure storage: {err}");
                }
            }
            return;
        }
        if let Err(err) = entry.set_password(value) {
            warn!("failed to save {key} in secure storage: {err}");
        }
    }

    fn remove(&self, key: &str) {
        let Some(entry) = self.entry(key) else {
            return;
        };
        if let Err(err) = entry.delete_credential() {
            if !is_not_found_error(&err.to_string()) {
                warn!("failed to remove {key} from secure storage: {err}");
            }
        }
    }
}

fn is_not_found_error(message: &str) -> bool {
    let normalized = message.to_lowercase();
    normalized.contains("no entry")
        || normalized.contains("not found")
        || normalized.contains("no matching entry")
}

/// Typed accessors over the raw store for the profile data the
/// orchestrator's eligibility check needs.
#[derive(Clone)]
pub struct ProfileStore {
    store: Arc<dyn StateStore>,
}

impl ProfileStore {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn auth_token(&self) -> Option<String> {
        self.store
            .get(KEY_AUTH_TOKEN)
            .filter(|token| !token.trim().is_empty())
    }

    pub fn user_id(&self) -> Option<String> {
        self.store
            .get(KEY_USER_ID)
            .filter(|id| !id.trim().is_empty())
    }

    pub fn anonymous_uses(&self) -> u32 {
        self.store
            .get(KEY_ANONYMOUS_USES)
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn record_anonymous_use(&self) -> u32 {
        let next = self.anonymous_uses().saturating_add(1);
        self.store.set(KEY_ANONYMOUS_USES, &next.to_string());
        next
    }

    pub fn selected_style(&self) -> String {
        self.store
            .get(KEY_SELECTED_STYLE)
            .filter(|style| !style.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_STYLE.to_string())
    }

    pub fn selected_platform(&self) -> Option<String> {
        self.store
            .get(KEY_SELECTED_PLATFORM)
            .filter(|platform| !platform.trim().is_empty())
    }
}
