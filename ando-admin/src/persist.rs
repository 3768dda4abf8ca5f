//! File-based persistence for standalone mode.
//!
//! On every write (PUT/DELETE api/policy/consumer) the current in-memory
//! state is serialized to a JSON file. On startup the file is loaded back
//! and used to seed the registries/stores, so data survives restarts.
//!
//! The file is written atomically: first to a `.tmp` sibling, then renamed
//! over the final path, so a crash mid-write never corrupts the stored
//! state.
//!
//! `save_state` is a no-op when `AdminState::state_file` is `None` (e.g. in
//! unit tests that build an `AdminState` without specifying a path).

use crate::server::AdminState;
use ando_core::consumer::Consumer;
use ando_core::policy::Policy;
use ando_core::spec::ApiSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The shape serialized to / deserialized from the state file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub api_specs: Vec<ApiSpec>,
    #[serde(default)]
    pub policies: Vec<Policy>,
    #[serde(default)]
    pub consumers: Vec<Consumer>,
}

/// Snapshot `state`'s registries/stores and write them to `path`.
pub fn save_state(state: &AdminState, path: &Path) -> std::io::Result<()> {
    let persisted = PersistedState {
        api_specs: state.spec_registry.all().iter().map(|s| (**s).clone()).collect(),
        policies: state.policy_store.all(),
        consumers: state.consumer_store.all(),
    };

    let json = serde_json::to_string_pretty(&persisted)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)?;

    tracing::debug!(path = %path.display(), "persist: state saved");
    Ok(())
}

/// Load a previously saved state file.
///
/// Returns an empty `PersistedState` (first run) if the file doesn't exist
/// or is malformed -- a missing or corrupt state file must never block
/// startup.
pub fn load_state(path: &Path) -> PersistedState {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "persist: no state file found, starting fresh");
        return PersistedState::default();
    }

    let data = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "persist: failed to read state file");
            return PersistedState::default();
        }
    };

    match serde_json::from_str::<PersistedState>(&data) {
        Ok(persisted) => {
            tracing::info!(
                apis = persisted.api_specs.len(),
                policies = persisted.policies.len(),
                consumers = persisted.consumers.len(),
                path = %path.display(),
                "persist: state restored from file"
            );
            persisted
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "persist: state file is malformed, ignoring");
            PersistedState::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ando_core::spec::{AuthMethods, CorsConfig, MiddlewareBundle, Protocol, StorageProvider, VersionData};
    use tempfile::tempdir;

    fn spec(id: &str) -> ApiSpec {
        ApiSpec {
            api_id: id.into(),
            org_id: "org1".into(),
            listen_path: "/foo".into(),
            domain: String::new(),
            target_url: "http://backend".into(),
            protocol: Protocol::Http,
            auth: AuthMethods::default(),
            cors: CorsConfig::default(),
            versions: VersionData::default(),
            session_lifetime: 0,
            storage_provider: StorageProvider::KeyValue,
            middleware: MiddlewareBundle::default(),
            strip_listen_path: false,
            enable_request_size_limit: false,
            request_size_limit: 0,
            enable_ip_allowlist: false,
            allowed_ips: Vec::new(),
            enable_ip_denylist: false,
            denied_ips: Vec::new(),
            active: true,
        }
    }

    #[test]
    fn round_trip_api_specs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let state = crate::server::test_support::test_state();
        state.spec_registry.insert(spec("api1"));

        save_state(&state, &path).unwrap();
        let loaded = load_state(&path);

        assert_eq!(loaded.api_specs.len(), 1);
        assert_eq!(loaded.api_specs[0].api_id, "api1");
    }

    #[test]
    fn load_missing_file_is_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.json");
        let loaded = load_state(&path);
        assert!(loaded.api_specs.is_empty());
    }

    #[test]
    fn load_malformed_file_is_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not valid json {{{{").unwrap();
        let loaded = load_state(&path);
        assert!(loaded.api_specs.is_empty());
    }
}
