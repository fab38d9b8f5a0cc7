//! `Mapping:` export (spec §4.6, §8 scenario 6): a `Mapping:` entity names
//! a source structure and a mapping target identity; each `MappingRule`
//! inside it maps one element path to a target expression via `->`. The
//! target format files these against the structure's own `mapping[]`
//! array rather than a standalone resource, so this module mutates the
//! already-exported [`StructureDefinition`] in place.

use crate::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticCollector};
use crate::model::MappingEntity;
use crate::path_resolver::PathResolver;

use super::fhir_types::{ElementDefinitionMapping, StructureDefinition};

/// Apply one `Mapping:` entity's rules onto the structure it targets.
/// The caller is responsible for matching `entity.source` against the
/// structure's own name/id before calling this; mapped elements land in
/// the snapshot only, since the differential has already been finalized
/// by the time mappings run.
pub fn apply_mapping(
    entity: &MappingEntity,
    structure: &mut StructureDefinition,
    diags: &DiagnosticCollector,
) {
    let identity = entity.header.id_or_name().to_string();
    let root_path = structure.type_field.clone();

    for rule in &entity.rules {
        let crate::model::Rule::Mapping(mapping) = rule else {
            continue;
        };
        let resolved = {
            let mut elements = std::mem::take(&mut structure.snapshot).map(|s| s.element).unwrap_or_default();
            let result = PathResolver::new(&mut elements, root_path.as_str()).resolve(&mapping.path);
            structure.snapshot = Some(super::fhir_types::StructureDefinitionSnapshot { element: elements });
            result
        };

        match resolved {
            Ok(idx) => {
                let element = &mut structure.snapshot.as_mut().unwrap().element[idx];
                element.mapping.get_or_insert_with(Vec::new).push(ElementDefinitionMapping {
                    identity: identity.clone(),
                    map: mapping.target.clone(),
                    comment: mapping.comment.clone(),
                    language: mapping.language.clone(),
                });
            }
            Err(err) => diags.push(
                Diagnostic::error(DiagnosticCategory::RuleApplicationFailure, format!("{err}"))
                    .at(mapping.location.clone()),
            ),
        }
    }
}
