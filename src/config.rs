//! Configuration intake (§12/§4.8/§6). `ConfigStore` is the trait boundary
//! mirroring the original's `cmap_get_string`/`cmap_get_uint32` calls;
//! `TomlConfigStore` backs it for standalone operation and tests via the
//! `toml`/`serde` idiom used elsewhere in the retrieved corpus.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::codec::options::TlsSupported;
use crate::error::ProcessError;

pub const DEFAULT_PORT: u16 = 5403;
pub const DEFAULT_NSSDB_DIR: &str = "/etc/corosync/qdevice/net/nssdb";
pub const DEFAULT_HEARTBEAT_MS: u32 = 10_000;
pub const DEFAULT_SYNC_HEARTBEAT_MS: u32 = 10_000;

/// Boundary over the cluster config map. `get_string`/`get_u32` return
/// `None` when the key is absent; a malformed present value is the
/// implementation's problem to reject before returning (so callers only
/// ever see "absent" or "valid").
pub trait ConfigStore {
    fn get_string(&self, key: &str) -> Option<String>;
    fn get_u32(&self, key: &str) -> Option<u32>;
}

/// Flat `key = "value"` TOML document, every value stored as a string and
/// parsed on demand — mirrors cmap's untyped value store more closely than
/// a strongly-typed serde struct would.
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfigStore {
    #[serde(flatten)]
    values: HashMap<String, toml::Value>,
}

impl TomlConfigStore {
    pub fn load(path: &Path) -> Result<Self, ProcessError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProcessError::Config(format!("can't read {}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| ProcessError::Config(format!("can't parse {}: {e}", path.display())))
    }
}

impl ConfigStore for TomlConfigStore {
    fn get_string(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            toml::Value::String(s) => Some(s.clone()),
            toml::Value::Integer(i) => Some(i.to_string()),
            toml::Value::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn get_u32(&self, key: &str) -> Option<u32> {
        match self.values.get(key)? {
            toml::Value::Integer(i) => u32::try_from(*i).ok(),
            toml::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Parses the `yes/no/on/off/0/1` bool-string family used by
/// `quorum.device.net.tls` (§6).
fn parse_bool_string(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "on" | "1" | "true" => Some(true),
        "no" | "off" | "0" | "false" => Some(false),
        _ => None,
    }
}

/// Fully validated device configuration, ready to seed a `Connection`
/// (§3). Every failure here is `ProcessError::Config`, matching the
/// original's `errx(1, ...)` one for one.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub node_id: u32,
    pub tls_supported: TlsSupported,
    pub host: String,
    pub port: u16,
    pub cluster_name: String,
    pub heartbeat_interval: Duration,
    pub sync_heartbeat_interval: Duration,
    pub nssdb_dir: std::path::PathBuf,
}

impl DeviceConfig {
    pub fn from_store(store: &dyn ConfigStore) -> Result<Self, ProcessError> {
        let model = store
            .get_string("quorum.device.model")
            .ok_or_else(|| ProcessError::Config("quorum.device.model is not set".into()))?;
        if model != "net" {
            return Err(ProcessError::Config(format!(
                "quorum.device.model is '{model}', expected 'net'"
            )));
        }

        let node_id = store
            .get_u32("runtime.votequorum.this_node_id")
            .ok_or_else(|| {
                ProcessError::Config("runtime.votequorum.this_node_id is not set".into())
            })?;

        let tls_supported = match store.get_string("quorum.device.net.tls") {
            None => TlsSupported::Unsupported,
            Some(raw) => {
                let enabled = parse_bool_string(&raw).ok_or_else(|| {
                    ProcessError::Config(format!("quorum.device.net.tls: invalid value '{raw}'"))
                })?;
                if enabled {
                    TlsSupported::Supported
                } else {
                    TlsSupported::Unsupported
                }
            }
        };

        let host = store
            .get_string("quorum.device.net.host")
            .ok_or_else(|| ProcessError::Config("quorum.device.net.host is not set".into()))?;

        let port = match store.get_string("quorum.device.net.port") {
            None => DEFAULT_PORT,
            Some(raw) => {
                let port: u32 = raw.parse().map_err(|_| {
                    ProcessError::Config(format!("quorum.device.net.port: invalid value '{raw}'"))
                })?;
                if port == 0 || port > 65535 {
                    return Err(ProcessError::Config(format!(
                        "quorum.device.net.port: {port} out of range 1..65535"
                    )));
                }
                port as u16
            }
        };

        let cluster_name = store
            .get_string("totem.cluster_name")
            .ok_or_else(|| ProcessError::Config("totem.cluster_name is not set".into()))?;

        let timeout_ms = store
            .get_u32("quorum.device.timeout")
            .unwrap_or(DEFAULT_HEARTBEAT_MS);
        let sync_timeout_ms = store
            .get_u32("quorum.device.sync_timeout")
            .unwrap_or(DEFAULT_SYNC_HEARTBEAT_MS);

        let nssdb_dir = store
            .get_string("quorum.device.net.nssdb_dir")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| std::path::PathBuf::from(DEFAULT_NSSDB_DIR));

        Ok(DeviceConfig {
            node_id,
            tls_supported,
            host,
            port,
            cluster_name,
            heartbeat_interval: scale_80_percent(timeout_ms),
            sync_heartbeat_interval: scale_80_percent(sync_timeout_ms),
            nssdb_dir,
        })
    }
}

/// Heartbeat interval is 80% of the configured timeout (glossary).
fn scale_80_percent(ms: u32) -> Duration {
    Duration::from_millis((ms as u64 * 8) / 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapStore(HashMap<&'static str, &'static str>);

    impl ConfigStore for MapStore {
        fn get_string(&self, key: &str) -> Option<String> {
            self.0.get(key).map(|s| s.to_string())
        }
        fn get_u32(&self, key: &str) -> Option<u32> {
            self.0.get(key).and_then(|s| s.parse().ok())
        }
    }

    fn base_store() -> MapStore {
        MapStore(HashMap::from([
            ("quorum.device.model", "net"),
            ("runtime.votequorum.this_node_id", "7"),
            ("quorum.device.net.host", "qnetd.example.org"),
            ("totem.cluster_name", "mycluster"),
        ]))
    }

    #[test]
    fn defaults_apply_when_optional_keys_absent() {
        let cfg = DeviceConfig::from_store(&base_store()).unwrap();
        assert_eq!(cfg.tls_supported, TlsSupported::Unsupported);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(
            cfg.heartbeat_interval,
            scale_80_percent(DEFAULT_HEARTBEAT_MS)
        );
    }

    #[test]
    fn wrong_model_is_fatal() {
        let mut store = base_store();
        store.0.insert("quorum.device.model", "disk");
        assert!(DeviceConfig::from_store(&store).is_err());
    }

    #[test]
    fn port_out_of_range_is_fatal() {
        let mut store = base_store();
        store.0.insert("quorum.device.net.port", "70000");
        assert!(DeviceConfig::from_store(&store).is_err());
    }

    #[test]
    fn tls_bool_string_variants_parse() {
        let mut store = base_store();
        store.0.insert("quorum.device.net.tls", "on");
        let cfg = DeviceConfig::from_store(&store).unwrap();
        assert_eq!(cfg.tls_supported, TlsSupported::Supported);
    }
}
