//! Top-level orchestrator (spec §2 pipeline table, §6 external interfaces).
//!
//! Wires every pass named in the component table into one synchronous
//! entry point: dependency-package indexing, import, rule-set expansion,
//! per-kind export in the dependency-safe order §4.6 names, then package
//! assembly. Mirrors the teacher's own top-level `Compiler::compile` shape
//! that sequences its importer/exporter stages behind one call.

use rayon::prelude::*;

use crate::config::CompilerConfig;
use crate::defstore::DefinitionStore;
use crate::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticCollector};
use crate::error::CompileError;
use crate::export::fhir_types::{MappingResource, StructureDefinition};
use crate::export::{
    apply_mapping, export_code_system, export_extension, export_instance, export_logical,
    export_profile, export_resource, export_value_set,
};
use crate::fisher::{Fisher, LocalRegistry};
use crate::import::{self, SourceFile};
use crate::model::{Entity, EntityKind};
use crate::package::Package;
use crate::result::Result;

/// Stateless driver for a single compile invocation (spec §2/§6). All
/// state a compile needs is either an argument or created fresh inside
/// `compile`, so nothing here needs to be an instance method.
pub struct Compiler;

impl Compiler {
    /// Run the full pipeline over one source group.
    ///
    /// `dependency_documents` are already-fetched, already-parsed-as-JSON
    /// package contents — download and cache management are the external
    /// collaborator named in §1; this function only classifies and indexes
    /// what it is handed.
    ///
    /// Returns the assembled [`Package`] alongside the [`DiagnosticCollector`]
    /// that accumulated every pass's diagnostics, sorted deterministically
    /// via [`DiagnosticCollector::sorted`]. Only a condition that makes the
    /// whole compile meaningless (no source files) produces an `Err`.
    pub fn compile(
        sources: &[SourceFile],
        dependency_documents: &[serde_json::Value],
        config: &CompilerConfig,
    ) -> Result<(Package, DiagnosticCollector)> {
        if sources.is_empty() {
            return Err(CompileError::NoSources);
        }

        let diags = DiagnosticCollector::new();

        let mut defstore = DefinitionStore::new();
        for doc in dependency_documents {
            defstore.load_document(doc);
        }

        let mut tank = import::import(sources, &diags);
        tank.expand_rulesets(&diags);

        tracing::debug!(
            entities = tank.entities().len(),
            errors = diags.error_count(),
            "import and rule-set expansion complete"
        );

        let local = LocalRegistry::new();
        let fisher = Fisher::new(&tank, &defstore, &local);
        let mut package = Package::new();

        // §4.6 ordering: code systems and value sets first, since
        // BindingRule/ValueSetComponentRule on later kinds may reference
        // them by name.
        let code_systems: Vec<&Entity> = tank.of_kind(EntityKind::CodeSystem).collect();
        package.code_systems = code_systems
            .par_iter()
            .map(|entity| {
                let Entity::CodeSystem(term) = entity else {
                    unreachable!("of_kind(CodeSystem) only yields CodeSystem entities")
                };
                export_code_system(term, &fisher, config, &diags)
            })
            .collect();

        let value_sets: Vec<&Entity> = tank.of_kind(EntityKind::ValueSet).collect();
        package.value_sets = value_sets
            .par_iter()
            .map(|entity| {
                let Entity::ValueSet(term) = entity else {
                    unreachable!("of_kind(ValueSet) only yields ValueSet entities")
                };
                export_value_set(term, &fisher, config, &diags)
            })
            .collect();

        // Extensions next, so the structure-like kinds below can fish one
        // as an Only/Contains type and find it already exported locally.
        package.extensions = export_structures(&tank, EntityKind::Extension, |e| {
            export_extension(e, &fisher, config, &diags)
        });
        register_all(&local, &package.extensions);

        package.profiles = export_structures(&tank, EntityKind::Profile, |e| {
            export_profile(e, &fisher, config, &diags)
        });
        register_all(&local, &package.profiles);

        package.logicals = export_structures(&tank, EntityKind::Logical, |e| {
            export_logical(e, &fisher, config, &diags)
        });
        register_all(&local, &package.logicals);

        package.resources = export_structures(&tank, EntityKind::Resource, |e| {
            export_resource(e, &fisher, config, &diags)
        });
        register_all(&local, &package.resources);

        // Instances.
        let instance_entities: Vec<&Entity> = tank.of_kind(EntityKind::Instance).collect();
        package.instances = instance_entities
            .par_iter()
            .map(|entity| {
                let Entity::Instance(inst) = entity else {
                    unreachable!("of_kind(Instance) only yields Instance entities")
                };
                export_instance(inst, &fisher, config, &diags)
            })
            .collect();

        // Mappings run last (§4.6 ordering), mutating an already-exported
        // structure's `mapping[]` arrays in place.
        let mapping_entities: Vec<&Entity> = tank.of_kind(EntityKind::Mapping).collect();
        for entity in mapping_entities {
            let Entity::Mapping(mapping_entity) = entity else {
                unreachable!("of_kind(Mapping) only yields Mapping entities")
            };
            package.mappings.push(MappingResource {
                resource_type: "Mapping".to_string(),
                id: mapping_entity.header.id_or_name().to_string(),
                source: mapping_entity.source.clone(),
                target: mapping_entity.target.clone(),
            });

            let Some(source_name) = &mapping_entity.source else {
                diags.push(
                    Diagnostic::error(
                        DiagnosticCategory::MissingMetadata,
                        format!("mapping '{}' has no Source", mapping_entity.header.name),
                    )
                    .at(mapping_entity.header.location.clone()),
                );
                continue;
            };

            match find_structure_mut(&mut package, source_name) {
                Some(structure) => apply_mapping(mapping_entity, structure, &diags),
                None => diags.push(
                    Diagnostic::error(
                        DiagnosticCategory::UnknownReference,
                        format!("unknown mapping source '{source_name}'"),
                    )
                    .at(mapping_entity.header.location.clone()),
                ),
            }
        }

        tracing::debug!(
            profiles = package.profiles.len(),
            extensions = package.extensions.len(),
            logicals = package.logicals.len(),
            resources = package.resources.len(),
            value_sets = package.value_sets.len(),
            code_systems = package.code_systems.len(),
            instances = package.instances.len(),
            mappings = package.mappings.len(),
            errors = diags.error_count(),
            "package assembly complete"
        );

        Ok((package, diags))
    }
}

/// Export every entity of one structure-definition-like kind in parallel,
/// dropping the ones that failed catastrophically (already diagnosed by
/// the exporter itself per §4.6 "Failure semantics").
fn export_structures<'a, F>(
    tank: &'a crate::import::Tank,
    kind: EntityKind,
    export_one: F,
) -> Vec<StructureDefinition>
where
    F: Fn(&'a crate::model::StructureDefEntity) -> Option<StructureDefinition> + Sync,
{
    let entities: Vec<&Entity> = tank.of_kind(kind).collect();
    entities
        .par_iter()
        .filter_map(|entity| match entity {
            Entity::Profile(s) | Entity::Extension(s) | Entity::Logical(s) | Entity::Resource(s) => {
                export_one(s)
            }
            _ => unreachable!("of_kind({kind:?}) only yields structure-definition-like entities"),
        })
        .collect()
}

fn register_all(local: &LocalRegistry, structures: &[StructureDefinition]) {
    for structure in structures {
        local.insert(structure);
    }
}

fn find_structure_mut<'p>(package: &'p mut Package, name: &str) -> Option<&'p mut StructureDefinition> {
    package
        .profiles
        .iter_mut()
        .chain(package.extensions.iter_mut())
        .chain(package.logicals.iter_mut())
        .chain(package.resources.iter_mut())
        .find(|s| s.name == name || s.id.as_deref() == Some(name))
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

    fn observation_doc() -> serde_json::Value {
        serde_json::json!({
            "resourceType": "StructureDefinition",
            "id": "Observation",
            "url": "http://hl7.org/fhir/StructureDefinition/Observation",
            "name": "Observation",
            "status": "active",
            "kind": "resource",
            "abstract": false,
            "type": "Observation",
            "snapshot": {
                "element": [
                    {"path": "Observation"},
                    {"path": "Observation.status"},
                    {"path": "Observation.category"}
                ]
            }
        })
    }

    #[test]
    fn empty_source_list_is_a_compile_error() {
        let config = CompilerConfig::default();
        let result = Compiler::compile(&[], &[], &config);
        assert!(matches!(result, Err(CompileError::NoSources)));
    }

    #[test]
    fn simple_profile_end_to_end() {
        let config = CompilerConfig::default();
        let sources = [source(
            "Profile: ObservationProfile\nParent: Observation\n* category 1..5 MS\n",
        )];
        let (package, diags) = Compiler::compile(&sources, &[observation_doc()], &config).unwrap();
        assert_eq!(diags.error_count(), 0);
        assert_eq!(package.profiles.len(), 1);
        let profile = &package.profiles[0];
        assert_eq!(profile.base_definition.as_deref(), Some("http://hl7.org/fhir/StructureDefinition/Observation"));
        let category = profile
            .snapshot
            .as_ref()
            .unwrap()
            .element
            .iter()
            .find(|e| e.path == "Observation.category")
            .unwrap();
        assert_eq!(category.min, Some(1));
        assert_eq!(category.max.as_deref(), Some("5"));
        assert_eq!(category.must_support, Some(true));
    }
}
