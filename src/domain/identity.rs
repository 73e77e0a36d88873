use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// The (tenant, name, version, environment) tuple telemetry is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceIdentity {
    /// Site identifier; `None` for processes that are not tenant scoped.
    pub tenant: Option<String>,
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
}

/// Static host → site mapping for a multi-tenant bench.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantTable {
    prefix: String,
    sites: HashMap<String, String>,
}

impl TenantTable {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sites: HashMap::new(),
        }
    }

    pub fn with_site(mut self, host: &str, site: impl Into<String>) -> Self {
        self.insert(host, site);
        self
    }

    pub fn insert(&mut self, host: &str, site: impl Into<String>) {
        self.sites.insert(normalize_host(host), site.into());
    }

    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn site_for_host(&self, host: &str) -> Option<&str> {
        self.sites.get(&normalize_host(host)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    fn service_name_for(&self, site: &str) -> String {
        format!("{}-{}", self.prefix, site)
    }
}

/// Lowercases, trims a trailing dot and strips the port (IPv6 literals keep
/// their brackets).
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        }
    } else {
        host.split(':').next().unwrap_or(host)
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}

/// Resolves the identity a request or job is attributed to.
///
/// A pure function of its input and the static tenant table, so one instance
/// is shared by every concurrently running request.
#[derive(Debug, Clone)]
pub struct ServiceIdentityResolver {
    tenants: Arc<TenantTable>,
    default_service: String,
    service_version: String,
    environment: String,
}

impl ServiceIdentityResolver {
    pub fn new(
        tenants: TenantTable,
        default_service: impl Into<String>,
        service_version: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            tenants: Arc::new(tenants),
            default_service: default_service.into(),
            service_version: service_version.into(),
            environment: environment.into(),
        }
    }

    /// Maps a `Host` header (or URI authority) to an identity; unknown or
    /// missing hosts get the default service name.
    pub fn resolve(&self, host: Option<&str>) -> ServiceIdentity {
        let site = host.and_then(|h| self.tenants.site_for_host(h));
        self.identity_for_site(site)
    }

    /// Identity for work that already knows its site, such as a background job.
    pub fn resolve_site(&self, site: Option<&str>) -> ServiceIdentity {
        self.identity_for_site(site.filter(|s| !s.is_empty()))
    }

    pub fn default_identity(&self) -> ServiceIdentity {
        self.identity_for_site(None)
    }

    pub fn tenants(&self) -> &TenantTable {
        &self.tenants
    }

    fn identity_for_site(&self, site: Option<&str>) -> ServiceIdentity {
        let (tenant, service_name) = match site {
            Some(site) => (Some(site.to_string()), self.tenants.service_name_for(site)),
            None => (None, self.default_service.clone()),
        };
        ServiceIdentity {
            tenant,
            service_name,
            service_version: self.service_version.clone(),
            environment: self.environment.clone(),
        }
    }
}
