use super::{Config, ConfigError};
use crate::domain::TenantTable;
use http::{HeaderName, HeaderValue};
use std::collections::BTreeMap;
use url::Url;

/// Parses the collector URL; it must be an absolute http(s) URL.
pub fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid endpoint URL '{raw}': {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!(
            "Endpoint URL '{raw}' must use http or https"
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ConfigError::InvalidUrl(format!(
            "Endpoint URL '{raw}' has no host"
        )));
    }
    Ok(url)
}

/// Parses `key=value,key2=value2`. Blank segments are ignored; a segment
/// without `=` or with an empty key is an error. Values may contain `=`.
pub fn parse_headers(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut headers = BTreeMap::new();

    for item in raw.split(',') {
        if item.trim().is_empty() {
            continue;
        }
        let Some((key, value)) = item.split_once('=') else {
            return Err(ConfigError::InvalidHeaders(format!(
                "expected key=value, got '{}'",
                item.trim()
            )));
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            return Err(ConfigError::InvalidHeaders(format!(
                "empty header name in '{}'",
                item.trim()
            )));
        }
        HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| ConfigError::InvalidHeaders(format!("invalid header name '{key}': {e}")))?;
        HeaderValue::from_str(value).map_err(|e| {
            ConfigError::InvalidHeaders(format!("invalid value for header '{key}': {e}"))
        })?;
        headers.insert(key.to_string(), value.to_string());
    }

    Ok(headers)
}

/// Parses `host=site,...` into the tenant table.
pub fn parse_tenant_sites(raw: &str, tenants: &mut TenantTable) -> Result<(), ConfigError> {
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item.split_once('=') {
            Some((host, site)) if !host.trim().is_empty() && !site.trim().is_empty() => {
                tenants.insert(host.trim(), site.trim());
            }
            _ => {
                return Err(ConfigError::InvalidConfig(format!(
                    "Invalid tenant mapping '{item}', expected host=site"
                )));
            }
        }
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Service name must not be empty".to_string(),
            ));
        }

        // Validate batch size
        if self.export.batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Batch size must be greater than 0".to_string(),
            ));
        }

        // Validate buffer capacity
        if self.export.intake_capacity < self.export.batch_size {
            return Err(ConfigError::InvalidConfig(format!(
                "Intake capacity ({}) must be at least as large as batch size ({})",
                self.export.intake_capacity, self.export.batch_size
            )));
        }

        if self.export.max_pending_batches == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max pending batches must be greater than 0".to_string(),
            ));
        }

        // Validate timeouts
        if self.export.flush_interval.is_zero() || self.export.timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "Flush interval and export timeout must be greater than 0".to_string(),
            ));
        }

        if self.watch.poll_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "Watch poll interval must be greater than 0".to_string(),
            ));
        }

        // Validate retry config
        if self.export.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "Retry max attempts must be greater than 0".to_string(),
            ));
        }

        for source in &self.sources {
            if source.path.as_os_str().is_empty() || source.tag.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "Log source {source:?} needs a path and a tag"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_parse_and_trim() {
        let headers = parse_headers(" authorization = Bearer abc , x-team=core=1,").unwrap();
        assert_eq!(headers.get("authorization").map(String::as_str), Some("Bearer abc"));
        assert_eq!(headers.get("x-team").map(String::as_str), Some("core=1"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn empty_headers_are_allowed() {
        assert!(parse_headers("").unwrap().is_empty());
    }

    #[test]
    fn malformed_header_pairs_are_fatal() {
        assert!(parse_headers("authorization").is_err());
        assert!(parse_headers("=value").is_err());
        assert!(parse_headers("bad header=1").is_err());
    }

    #[test]
    fn endpoint_must_be_absolute_http() {
        assert!(parse_endpoint("https://otel.appz.studio").is_ok());
        assert!(parse_endpoint("otel.appz.studio").is_err());
        assert!(parse_endpoint("/v1/traces").is_err());
        assert!(parse_endpoint("ftp://otel.appz.studio").is_err());
    }

    #[test]
    fn tenant_sites_fill_the_table() {
        let mut table = TenantTable::new("frappe");
        parse_tenant_sites("a.example.com=a, b.example.com=b", &mut table).unwrap();
        assert_eq!(table.site_for_host("b.example.com"), Some("b"));
        assert!(parse_tenant_sites("a.example.com", &mut table).is_err());
    }
}
