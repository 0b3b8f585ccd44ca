//! Shared types used across tenancy crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Placeholder replaced by the tenant id when rendering a schema name.
pub const TENANT_PLACEHOLDER: &str = "{tenant}";

/// Identifier of a tenant's isolated schema.
///
/// Syntax is validated upstream (request handling); everything in this
/// workspace treats it as an opaque, immutable key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render the schema name for this tenant from a template such as
    /// `"tenant_{tenant}"`. A template without the placeholder is used as-is.
    pub fn schema_name(&self, template: &str) -> String {
        template.replace(TENANT_PLACEHOLDER, &self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_name_from_default_template() {
        let id = TenantId::new("acme");
        assert_eq!(id.schema_name(TENANT_PLACEHOLDER), "acme");
    }

    #[test]
    fn schema_name_with_prefix() {
        let id = TenantId::from("acme");
        assert_eq!(id.schema_name("tenant_{tenant}"), "tenant_acme");
    }

    #[test]
    fn schema_name_without_placeholder() {
        let id = TenantId::from("acme");
        assert_eq!(id.schema_name("shared"), "shared");
    }

    #[test]
    fn display_and_ordering() {
        let a = TenantId::from("a");
        let b = TenantId::from(String::from("b"));
        assert_eq!(a.to_string(), "a");
        assert!(a < b);
    }

    #[test]
    fn serializes_transparently() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            tenant: TenantId,
        }
        let parsed: Wrapper = toml::from_str(r#"tenant = "globex""#).unwrap();
        assert_eq!(parsed.tenant.as_str(), "globex");
    }
}
