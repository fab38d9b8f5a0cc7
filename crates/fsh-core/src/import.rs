//! Importer (spec §4.2).
//!
//! Drives the parser over every source file in a document group, then
//! folds the resulting entities into a single namespace: name-collision
//! dedup per entity kind (first declaration wins, cross-kind collisions
//! allowed), soft-index resolution per entity, and the rule-set
//! definition table the expander consumes.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticCollector};
use crate::model::{Entity, EntityKind};
use crate::parser;
use crate::ruleset::RuleSetDef;
use crate::soft_index;

/// One `.fsh` source file handed to the importer.
pub struct SourceFile {
    pub path: Option<PathBuf>,
    pub text: String,
}

/// The importer's finalized, read-only entity namespace — the "tank"
/// named in §2/§6.
pub struct Tank {
    entities: Vec<Entity>,
    by_kind_name: HashMap<(EntityKind, String), usize>,
    pub rulesets: HashMap<String, RuleSetDef>,
}

impl Tank {
    /// Polymorphic lookup by bare name across every kind, first match
    /// wins in declaration order — used by the fisher when a reference's
    /// kind is not yet known.
    pub fn find_by_name(&self, name: &str) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.name() == name || e.header().id.as_deref() == Some(name))
    }

    pub fn find(&self, kind: EntityKind, name: &str) -> Option<&Entity> {
        self.by_kind_name
            .get(&(kind, name.to_string()))
            .map(|&i| &self.entities[i])
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(move |e| e.kind() == kind)
    }

    /// Second importer pass (§4.3 "expansion is performed during a second
    /// importer pass"): replace every `InsertRule` in every entity with the
    /// rules its rule-set body produces, then re-run soft-index resolution
    /// over the resulting sequence, since rules spliced in from a rule-set
    /// body carry their own unresolved `[+]`/`[=]` brackets that must slot
    /// into the entity's full document-order counters, not just the
    /// pre-expansion ones.
    pub fn expand_rulesets(&mut self, diags: &DiagnosticCollector) {
        let rulesets = &self.rulesets;
        let mut expander = crate::ruleset::RuleSetExpander::new(rulesets, diags);
        for entity in self.entities.iter_mut() {
            if let Some(rules) = entity.rules_mut() {
                let taken = std::mem::take(rules);
                let mut expanded = expander.expand_all(taken);
                soft_index::resolve_entity_rules(&mut expanded);
                *rules = expanded;
            }
        }
    }
}

/// Import every file in `sources` into a single [`Tank`], applying
/// name-collision dedup, alias substitution, and soft-index resolution.
/// Rule-set expansion itself is NOT performed here: it runs as a second
/// pass (see [`crate::ruleset`]) once every rule-set definition is known,
/// matching §4.3's "expansion is performed during a second importer pass".
pub fn import(sources: &[SourceFile], diags: &DiagnosticCollector) -> Tank {
    let mut entities = Vec::new();

    for source in sources {
        let parsed = parser::parse_source(source.path.clone(), &source.text, diags);
        entities.extend(parsed.entities);
    }

    let mut by_kind_name: HashMap<(EntityKind, String), usize> = HashMap::new();
    let mut deduped = Vec::with_capacity(entities.len());

    for entity in entities {
        let key = (entity.kind(), entity.name().to_string());
        if by_kind_name.contains_key(&key) {
            diags.push(
                Diagnostic::error(
                    DiagnosticCategory::NameCollision,
                    format!(
                        "duplicate {} '{}'",
                        entity.kind().as_str(),
                        entity.name()
                    ),
                )
                .at(entity.location().clone()),
            );
            continue;
        }
        by_kind_name.insert(key, deduped.len());
        deduped.push(entity);
    }

    for entity in deduped.iter_mut() {
        if let Some(rules) = entity.rules_mut() {
            soft_index::resolve_entity_rules(rules);
        }
    }

    let rulesets = collect_rulesets(&deduped);

    Tank {
        entities: deduped,
        by_kind_name,
        rulesets,
    }
}

fn collect_rulesets(entities: &[Entity]) -> HashMap<String, RuleSetDef> {
    let mut out = HashMap::new();
    for entity in entities {
        match entity {
            Entity::RuleSet(rs) => {
                out.insert(rs.header.name.clone(), RuleSetDef::Plain(rs.rules.clone()));
            }
            Entity::ParameterizedRuleSet(prs) => {
                out.insert(
                    prs.header.name.clone(),
                    RuleSetDef::Parameterized {
                        params: prs.params.clone(),
                        body_source: prs.body_source.clone(),
                        body_location: prs.body_location.clone(),
                    },
                );
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(text: &str) -> SourceFile {
        SourceFile {
            path: None,
            text: text.to_string(),
        }
    }

    #[test]
    fn duplicate_entity_names_within_a_kind_are_dropped() {
        let diags = DiagnosticCollector::new();
        let tank = import(
            &[source(
                "Profile: Dup\nParent: Observation\n* status MS\n\nProfile: Dup\nParent: Patient\n",
            )],
            &diags,
        );
        assert_eq!(tank.of_kind(EntityKind::Profile).count(), 1);
        assert_eq!(diags.error_count(), 1);
        let kept = tank.find(EntityKind::Profile, "Dup").unwrap();
        match kept {
            Entity::Profile(p) => assert_eq!(p.parent.as_deref(), Some("Observation")),
            _ => panic!("expected profile"),
        }
    }

    #[test]
    fn cross_kind_collisions_are_allowed() {
        let diags = DiagnosticCollector::new();
        let tank = import(
            &[source(
                "Profile: Thing\nParent: Observation\n\nInstance: Thing\nInstanceOf: Observation\n",
            )],
            &diags,
        );
        assert_eq!(diags.error_count(), 0);
        assert!(tank.find(EntityKind::Profile, "Thing").is_some());
        assert!(tank.find(EntityKind::Instance, "Thing").is_some());
    }
}
