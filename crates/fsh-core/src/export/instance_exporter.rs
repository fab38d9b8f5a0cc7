//! `Instance:` export (spec §4.6): starts from a bare `{"resourceType": ...}`
//! object and applies each `AssignmentRule` at its dotted path, creating
//! intermediate objects/arrays as needed. Unlike the structure exporters,
//! there is no base snapshot to walk — an instance's shape is whatever its
//! rules build.

use serde_json::{json, Map, Value};

use crate::config::CompilerConfig;
use crate::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticCollector};
use crate::fisher::Fisher;
use crate::model::{InstanceEntity, Path, Rule, Value as RuleValue};

use super::fhir_types::InstanceArtifact;
use super::value_json::value_to_json;

/// Rule-set-style recursion guard (spec §4.3's depth limit, reused here
/// since an inline instance may itself embed another inline instance).
const MAX_INLINE_DEPTH: usize = 10;

/// Build the free-form JSON resource for one `Instance:` entity, paired
/// with its declared `Usage` so the caller can classify where it's filed
/// (spec §4.6 "emit `usage` metadata ... controlling target directory
/// classification").
pub fn export_instance(
    entity: &InstanceEntity,
    fisher: &Fisher,
    config: &CompilerConfig,
    diags: &DiagnosticCollector,
) -> InstanceArtifact {
    InstanceArtifact {
        usage: entity.usage,
        resource: export_instance_body(entity, fisher, config, diags, 0),
    }
}

fn export_instance_body(
    entity: &InstanceEntity,
    fisher: &Fisher,
    config: &CompilerConfig,
    diags: &DiagnosticCollector,
    depth: usize,
) -> Map<String, Value> {
    let mut root = Value::Object(Map::new());

    let mut profile_url = None;
    let resource_type = match fisher.find_structure(&entity.instance_of) {
        Some(structure) => {
            if structure.derivation.as_deref() == Some("constraint") {
                profile_url = Some(structure.url);
            }
            structure.type_field
        }
        None => {
            diags.push(
                Diagnostic::warning(
                    DiagnosticCategory::UnknownReference,
                    format!("unknown InstanceOf target '{}'", entity.instance_of),
                )
                .at(entity.header.location.clone()),
            );
            entity.instance_of.clone()
        }
    };

    let obj = root.as_object_mut().expect("root is always an object");
    obj.insert("resourceType".to_string(), json!(resource_type));
    obj.insert("id".to_string(), json!(entity.header.id_or_name()));
    if let Some(url) = profile_url {
        obj.insert("meta".to_string(), json!({ "profile": [url] }));
    }

    for rule in &entity.rules {
        match rule {
            Rule::Assignment(assignment) => {
                let json_value = resolve_assignment_value(&assignment.value, fisher, config, diags, depth);
                match set_json_path(&mut root, &assignment.path) {
                    Some(slot) => *slot = json_value,
                    None => diags.push(
                        Diagnostic::error(
                            DiagnosticCategory::RuleApplicationFailure,
                            format!("unsupported path '{}' in instance assignment", assignment.path),
                        )
                        .at(assignment.location.clone()),
                    ),
                }
            }
            Rule::Path(_) | Rule::Insert(_) => {}
            _ => {
                diags.push(
                    Diagnostic::warning(DiagnosticCategory::RuleApplicationFailure, "rule not applicable to an Instance")
                        .at(rule.location().clone()),
                );
            }
        }
    }

    match root {
        Value::Object(map) => map,
        _ => unreachable!("root is always an object"),
    }
}

/// A bare identifier value that happens to name a known `Instance:` is
/// inlined as the full object that instance exports to, recursively; any
/// other value converts the ordinary way. Depth-limited the same way
/// rule-set expansion is, since two inline instances could name each
/// other.
fn resolve_assignment_value(
    value: &RuleValue,
    fisher: &Fisher,
    config: &CompilerConfig,
    diags: &DiagnosticCollector,
    depth: usize,
) -> Value {
    let name = match value {
        RuleValue::Identifier(name) | RuleValue::ResourceRef(name) => name,
        other => return value_to_json(other, fisher, &config.canonical),
    };

    if depth >= MAX_INLINE_DEPTH {
        return value_to_json(value, fisher, &config.canonical);
    }

    match fisher.find_instance(name) {
        Some(inline) => Value::Object(export_instance_body(inline, fisher, config, diags, depth + 1)),
        None => value_to_json(value, fisher, &config.canonical),
    }
}

/// Walk `path` inside `root`, creating objects/arrays along the way, and
/// return the final slot an assignment should overwrite. Named slices
/// (`path[sliceName]`) have no meaning on a raw JSON instance and are
/// reported as unsupported by returning `None`.
fn set_json_path<'v>(root: &'v mut Value, path: &Path) -> Option<&'v mut Value> {
    let mut current = root;
    for step in &path.steps {
        if step.slice_name().is_some() {
            return None;
        }
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = current
            .as_object_mut()
            .unwrap()
            .entry(step.name.clone())
            .or_insert(Value::Null);

        if let Some(index) = step.effective_index() {
            if !current.is_array() {
                *current = Value::Array(Vec::new());
            }
            let array = current.as_array_mut().unwrap();
            while array.len() <= index as usize {
                array.push(Value::Null);
            }
            current = &mut array[index as usize];
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defstore::DefinitionStore;
    use crate::fisher::{Fisher, LocalRegistry};
    use crate::import::{self, SourceFile};
    use crate::model::{Entity, InstanceUsage};

    fn source(text: &str) -> SourceFile {
        SourceFile { path: None, text: text.to_string() }
    }

    #[test]
    fn inline_instance_is_embedded_recursively() {
        let diags = DiagnosticCollector::new();
        let tank = import::import(
            &[source(
                "Instance: Inner\nInstanceOf: Patient\nUsage: #inline\n* active = true\n\nInstance: Outer\nInstanceOf: Bundle\n* entry[0].resource = Inner\n",
            )],
            &diags,
        );
        assert!(diags.is_empty());

        let defstore = DefinitionStore::new();
        let local = LocalRegistry::new();
        let fisher = Fisher::new(&tank, &defstore, &local);
        let config = CompilerConfig::default();

        let Some(Entity::Instance(outer)) = tank.find(crate::model::EntityKind::Instance, "Outer") else {
            panic!("expected Outer instance");
        };
        let artifact = export_instance(outer, &fisher, &config, &diags);
        assert_eq!(artifact.usage, InstanceUsage::Example);

        let embedded = artifact
            .resource
            .get("entry")
            .and_then(|e| e.get(0))
            .and_then(|e| e.get("resource"))
            .expect("embedded inline instance");
        assert_eq!(embedded.get("resourceType").and_then(|v| v.as_str()), Some("Patient"));
        assert_eq!(embedded.get("active").and_then(|v| v.as_bool()), Some(true));
    }

    #[test]
    fn bare_identifier_without_matching_instance_is_a_literal_string() {
        let diags = DiagnosticCollector::new();
        let tank = import::import(
            &[source("Instance: Lonely\nInstanceOf: Patient\n* maritalStatus = married\n")],
            &diags,
        );
        let defstore = DefinitionStore::new();
        let local = LocalRegistry::new();
        let fisher = Fisher::new(&tank, &defstore, &local);
        let config = CompilerConfig::default();
        let Some(Entity::Instance(inst)) = tank.find(crate::model::EntityKind::Instance, "Lonely") else {
            panic!("expected Lonely instance");
        };
        let artifact = export_instance(inst, &fisher, &config, &diags);
        assert_eq!(
            artifact.resource.get("maritalStatus").and_then(|v| v.as_str()),
            Some("married")
        );
    }
}
