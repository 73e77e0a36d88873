use crate::app::config::ServerOverrides;
use std::collections::BTreeMap;

const UNKNOWN: &str = "unknown";

/// Server identification attached to every tailed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMetadata {
    pub server_name: String,
    pub host_name: String,
    pub public_ip: String,
    pub environment: String,
}

impl ServerMetadata {
    /// Detects the hostname; overrides win. There is no network lookup for
    /// the public IP, it is `"unknown"` unless configured.
    pub fn detect(overrides: &ServerOverrides, environment: &str) -> Self {
        let host_name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string());
        Self::with_host(overrides, environment, host_name)
    }

    pub fn with_host(overrides: &ServerOverrides, environment: &str, host_name: String) -> Self {
        Self {
            server_name: overrides.name.clone().unwrap_or_else(|| host_name.clone()),
            public_ip: overrides
                .public_ip
                .clone()
                .unwrap_or_else(|| UNKNOWN.to_string()),
            environment: environment.to_string(),
            host_name,
        }
    }

    pub fn apply(&self, fields: &mut BTreeMap<String, String>) {
        fields.insert("server.name".to_string(), self.server_name.clone());
        fields.insert("host.name".to_string(), self.host_name.clone());
        fields.insert("server.public_ip".to_string(), self.public_ip.clone());
        fields.insert("deployment.environment".to_string(), self.environment.clone());
    }
}
