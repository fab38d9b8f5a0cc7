//! Compiler configuration (SPEC_FULL §4.7).
//!
//! Mirrors the configuration object named in spec §6: a caller-supplied,
//! serde-(de)serializable struct. Disk loading and dependency package
//! download are out of scope (§1) — this is the in-memory shape a caller
//! hands to [`crate::compiler::Compiler::compile`] after doing both itself.

use serde::{Deserialize, Serialize};

/// One `{packageId, version}` dependency to load into the definition store
/// before import (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyRef {
    pub package_id: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompilerConfig {
    /// Default canonical URL prefix for emitted artifacts.
    pub canonical: String,
    /// Default version stamp for artifacts.
    pub version: String,
    /// Declared target-format version(s).
    pub fhir_version: Vec<String>,
    /// Packages to load into the definition store before import.
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,
    /// When true, skip assembly of the implementation-guide resource;
    /// individual artifacts are still emitted.
    #[serde(default)]
    pub fsh_only: bool,
    /// Passthrough metadata stamped verbatim onto every artifact when
    /// present, following the shape of comparable project manifests
    /// (`status`/`copyright` alongside `canonical`/`version`).
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub copyright: Option<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            canonical: "http://example.org".to_string(),
            version: "0.1.0".to_string(),
            fhir_version: vec!["4.0.1".to_string()],
            dependencies: Vec::new(),
            fsh_only: false,
            status: None,
            copyright: None,
        }
    }
}

impl CompilerConfig {
    /// The canonical URL an artifact of `kind_segment` (e.g.
    /// `StructureDefinition`, `ValueSet`) and `id` is assigned when its
    /// author didn't set one with a `CaretValueRule` (§4.6 "id, url
    /// (derived from canonical + type + id)").
    pub fn canonical_url(&self, kind_segment: &str, id: &str) -> String {
        format!("{}/{kind_segment}/{id}", self.canonical.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = CompilerConfig::default();
        assert_eq!(config.canonical, "http://example.org");
        assert_eq!(config.version, "0.1.0");
        assert_eq!(config.fhir_version, vec!["4.0.1".to_string()]);
        assert!(!config.fsh_only);
    }

    #[test]
    fn builds_canonical_url() {
        let config = CompilerConfig::default();
        assert_eq!(
            config.canonical_url("StructureDefinition", "my-profile"),
            "http://example.org/StructureDefinition/my-profile"
        );
    }
}
