//! Optional TOML registry of tenants and log sources.
//!
//! ```toml
//! prefix = "frappe"
//!
//! [[tenants]]
//! host = "tenant-a.example.com"
//! site = "tenant-a"
//!
//! [[sources]]
//! path = "/home/frappe/frappe-bench/logs/web.log"
//! tag = "frappe.web"
//! service = "frappe-web"
//! ```

use super::ConfigError;
use crate::collector::LogSource;
use crate::domain::TenantTable;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryFile {
    pub prefix: Option<String>,
    #[serde(default)]
    pub tenants: Vec<TenantEntry>,
    #[serde(default)]
    pub sources: Vec<LogSource>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantEntry {
    pub host: String,
    pub site: String,
}

impl RegistryFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Merges into the environment-derived tables. File entries win on
    /// duplicate hosts; the file prefix replaces the environment prefix.
    pub fn apply(self, tenants: &mut TenantTable, sources: &mut Vec<LogSource>) -> Result<(), ConfigError> {
        if let Some(prefix) = self.prefix.filter(|p| !p.trim().is_empty()) {
            tenants.set_prefix(prefix.trim());
        }
        for entry in self.tenants {
            if entry.host.trim().is_empty() || entry.site.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "Tenant entry {entry:?} needs a host and a site"
                )));
            }
            tenants.insert(&entry.host, entry.site.trim());
        }
        sources.extend(self.sources);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
prefix = "erp"

[[tenants]]
host = "tenant-a.example.com"
site = "tenant-a"

[[sources]]
path = "/var/log/bench/web.log"
tag = "frappe.web"
service = "frappe-web"
"#;

    #[test]
    fn registry_applies_prefix_tenants_and_sources() {
        let registry = RegistryFile::parse(SAMPLE).unwrap();
        let mut tenants = TenantTable::new("frappe").with_site("old.example.com", "old");
        let mut sources = Vec::new();
        registry.apply(&mut tenants, &mut sources).unwrap();

        assert_eq!(tenants.prefix(), "erp");
        assert_eq!(tenants.site_for_host("tenant-a.example.com"), Some("tenant-a"));
        assert_eq!(tenants.site_for_host("old.example.com"), Some("old"));
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].tag, "frappe.web");
        assert_eq!(sources[0].service, "frappe-web");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(RegistryFile::parse("colour = \"blue\"").is_err());
    }
}
