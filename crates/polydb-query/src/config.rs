//! Connection configuration and per-backend validation

use crate::error::{DataError, Result};
use crate::types::BackendKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Caller-supplied connection configuration
///
/// Deserializes from a flat mapping such as
/// `{"backend": "mysql", "host": "127.0.0.1", "user": "root", ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Backend type identifier
    pub backend: BackendKind,
    /// Backend-specific keys
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl ConnectionConfig {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            params: BTreeMap::new(),
        }
    }

    /// Parse a configuration from a JSON object
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            DataError::invalid_configuration(format!("Malformed connection config: {}", e))
        })
    }

    pub fn with_path(self, path: impl Into<String>) -> Self {
        self.with_option("path", path.into())
    }

    pub fn with_host(self, host: impl Into<String>) -> Self {
        self.with_option("host", host.into())
    }

    pub fn with_port(self, port: u16) -> Self {
        self.with_option("port", port)
    }

    pub fn with_user(self, user: impl Into<String>) -> Self {
        self.with_option("user", user.into())
    }

    pub fn with_password(self, password: impl Into<String>) -> Self {
        self.with_option("password", password.into())
    }

    pub fn with_database(self, database: impl Into<String>) -> Self {
        self.with_option("database", database.into())
    }

    pub fn with_option(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Value of `key` rendered as text; `None` when absent or null
    pub fn get(&self, key: &str) -> Option<String> {
        match self.params.get(key)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn is_blank(&self, key: &str) -> bool {
        self.get(key).map_or(true, |v| v.trim().is_empty())
    }

    /// Get connection string for display purposes (without password)
    pub fn connection_string(&self) -> String {
        if let Some(path) = self.get("path") {
            return format!("{}://{}", self.backend, path);
        }

        let mut parts = vec![format!("{}://", self.backend)];

        if let Some(user) = self.get("user") {
            parts.push(format!("{}@", user));
        }

        if let Some(host) = self.get("host") {
            parts.push(host);

            if let Some(port) = self.get("port") {
                parts.push(format!(":{}", port));
            }
        }

        if let Some(database) = self.get("database") {
            parts.push(format!("/{}", database));
        }

        parts.join("")
    }
}

/// Required keys and defaults for one backend
#[derive(Debug, Clone, Copy)]
pub struct ConfigSpec {
    pub backend: BackendKind,
    pub required: &'static [&'static str],
    /// Optional keys and the value used when they are absent or empty
    pub defaults: &'static [(&'static str, &'static str)],
}

impl ConfigSpec {
    /// Check `config` against these rules and apply defaults.
    ///
    /// Never touches the network or the filesystem.
    pub fn validate(&self, config: &ConnectionConfig) -> Result<ValidatedConfig> {
        if config.backend != self.backend {
            return Err(DataError::invalid_configuration(format!(
                "{} configuration handed to the {} adapter",
                config.backend, self.backend
            )));
        }

        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|key| config.is_blank(key))
            .map(|key| key.to_string())
            .collect();

        if !missing.is_empty() {
            return Err(DataError::MissingConfiguration {
                backend: self.backend.as_str(),
                keys: missing,
            });
        }

        let mut values: BTreeMap<String, String> = config
            .params
            .keys()
            .filter_map(|key| config.get(key).map(|value| (key.clone(), value)))
            .collect();

        for (key, default) in self.defaults {
            if config.is_blank(key) {
                values.insert(key.to_string(), default.to_string());
            }
        }

        let port = match values.get("port") {
            Some(raw) => Some(parse_port(self.backend, raw)?),
            None => None,
        };

        Ok(ValidatedConfig {
            backend: self.backend,
            values,
            port,
        })
    }
}

fn parse_port(backend: BackendKind, raw: &str) -> Result<u16> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(DataError::invalid_configuration(format!(
            "{}: port '{}' is not a valid TCP port",
            backend, raw
        ))),
    }
}

/// Configuration that passed [`ConfigSpec::validate`]; immutable
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    backend: BackendKind,
    values: BTreeMap<String, String>,
    port: Option<u16>,
}

impl ValidatedConfig {
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Value of a required or defaulted key, empty when absent
    pub fn value(&self, key: &str) -> &str {
        self.get(key).unwrap_or_default()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_SPEC: ConfigSpec = ConfigSpec {
        backend: BackendKind::MySql,
        required: &["host", "user", "password", "database"],
        defaults: &[("port", "3306")],
    };

    const DEFAULTED_SPEC: ConfigSpec = ConfigSpec {
        backend: BackendKind::Postgresql,
        required: &[],
        defaults: &[("database", "postgres"), ("host", "127.0.0.1")],
    };

    #[test]
    fn test_connection_config_creation() {
        let config = ConnectionConfig::new(BackendKind::MySql)
            .with_host("localhost")
            .with_port(3306)
            .with_database("mydb");

        assert_eq!(config.backend, BackendKind::MySql);
        assert_eq!(config.get("host"), Some("localhost".to_string()));
        assert_eq!(config.get("port"), Some("3306".to_string()));
        assert_eq!(config.get("database"), Some("mydb".to_string()));
    }

    #[test]
    fn test_connection_string_hides_password() {
        let config = ConnectionConfig::new(BackendKind::MySql)
            .with_host("localhost")
            .with_port(3306)
            .with_user("root")
            .with_password("secret")
            .with_database("mydb");

        let conn_str = config.connection_string();
        assert_eq!(conn_str, "mysql://root@localhost:3306/mydb");
        assert!(!conn_str.contains("secret"));
    }

    #[test]
    fn test_config_from_json() {
        let config =
            ConnectionConfig::from_json(r#"{"backend": "mongodb", "host": "db", "port": 27018}"#)
                .unwrap();
        assert_eq!(config.backend, BackendKind::MongoDb);
        assert_eq!(config.get("port"), Some("27018".to_string()));

        assert!(ConnectionConfig::from_json(r#"{"host": "db"}"#).is_err());
    }

    #[test]
    fn test_missing_keys_are_reported() {
        let config = ConnectionConfig::new(BackendKind::MySql)
            .with_host("localhost")
            .with_password("");

        let err = SERVER_SPEC.validate(&config).unwrap_err();
        match err {
            DataError::MissingConfiguration { backend, keys } => {
                assert_eq!(backend, "mysql");
                assert_eq!(keys, vec!["user", "password", "database"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_defaults_applied() {
        let config = ConnectionConfig::new(BackendKind::Postgresql).with_database("");
        let validated = DEFAULTED_SPEC.validate(&config).unwrap();

        assert_eq!(validated.value("database"), "postgres");
        assert_eq!(validated.value("host"), "127.0.0.1");
        assert_eq!(validated.get("user"), None);
    }

    #[test]
    fn test_backend_mismatch_rejected() {
        let config = ConnectionConfig::new(BackendKind::Sqlite).with_path("/tmp/x.db");
        assert!(matches!(
            SERVER_SPEC.validate(&config),
            Err(DataError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_port_validation() {
        let base = ConnectionConfig::new(BackendKind::MySql)
            .with_host("h")
            .with_user("u")
            .with_password("p")
            .with_database("d");

        let validated = SERVER_SPEC.validate(&base).unwrap();
        assert_eq!(validated.port(), Some(3306));

        let bad = base.with_option("port", "http");
        assert!(SERVER_SPEC.validate(&bad).is_err());
    }
}
