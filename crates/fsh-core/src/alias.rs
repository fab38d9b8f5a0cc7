//! Alias resolution (spec §3 "Alias", §4.2 "Aliases are resolved eagerly").
//!
//! An alias table is per-document: each source file gets its own, seeded by
//! that file's own `Alias: $name = target` lines before any rule value in
//! that file is constructed. Substitution happens once, at rule-construction
//! time, rather than being woven through every value parser (design notes,
//! "Alias substitution ... centralize into a single resolver").

use std::collections::HashMap;

use crate::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticCollector, Location};
use crate::model::Alias;

#[derive(Debug, Default)]
pub struct AliasTable {
    entries: HashMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every alias declared in one file. The first declaration of
    /// a given name wins; later ones are diagnosed at their own location
    /// and dropped, matching the metadata first-wins policy used
    /// throughout the importer.
    pub fn populate(&mut self, aliases: &[Alias], diags: &DiagnosticCollector) {
        for alias in aliases {
            if self.entries.contains_key(&alias.name) {
                diags.push(
                    Diagnostic::error(
                        DiagnosticCategory::DuplicateMetadata,
                        format!("duplicate alias '{}'", alias.name),
                    )
                    .at(alias.location.clone()),
                );
                continue;
            }
            self.entries.insert(alias.name.clone(), alias.target.clone());
        }
    }

    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Centralized substitution point: any SEQUENCE token text that
    /// exactly matches a known alias name is replaced by its target;
    /// anything else passes through unchanged.
    pub fn substitute(&self, text: &str) -> String {
        match self.resolve(text) {
            Some(target) => target.to_string(),
            None => text.to_string(),
        }
    }

    pub fn is_alias_name(&self, text: &str) -> bool {
        text.starts_with('$') && self.entries.contains_key(text)
    }
}

/// Record a single `Alias: $name = target` declaration, diagnosing the
/// common "missing space around `=`" mistake named in spec §4.1.
pub fn record_alias(
    name: String,
    raw_rhs: &str,
    location: Location,
    missing_space: bool,
    diags: &DiagnosticCollector,
) -> Alias {
    if missing_space {
        diags.push(
            Diagnostic::error(
                DiagnosticCategory::Syntax,
                "missing space around '=' in alias declaration",
            )
            .at(location.clone()),
        );
    }
    Alias {
        name,
        target: raw_rhs.trim().to_string(),
        location,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> Location {
        Location::new(None, 0, 0)
    }

    #[test]
    fn first_declaration_wins() {
        let diags = DiagnosticCollector::new();
        let mut table = AliasTable::new();
        table.populate(
            &[
                Alias {
                    name: "$SCT".into(),
                    target: "http://snomed.info/sct".into(),
                    location: loc(),
                },
                Alias {
                    name: "$SCT".into(),
                    target: "http://example.org/wrong".into(),
                    location: loc(),
                },
            ],
            &diags,
        );
        assert_eq!(table.resolve("$SCT"), Some("http://snomed.info/sct"));
        assert_eq!(diags.error_count(), 1);
    }

    #[test]
    fn substitute_passes_through_unknown() {
        let table = AliasTable::new();
        assert_eq!(table.substitute("bare-code"), "bare-code");
    }
}
