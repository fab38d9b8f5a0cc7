//! `Resource:` export — structure engine with `DomainResource` as the
//! implicit parent and a specialization derivation that mints a brand-new
//! `type` (spec §4.6).

use crate::config::CompilerConfig;
use crate::diagnostics::DiagnosticCollector;
use crate::fisher::Fisher;
use crate::model::{EntityKind, StructureDefEntity};

use super::fhir_types::StructureDefinition;
use super::structure_exporter::export_structure;

pub fn export_resource(
    entity: &StructureDefEntity,
    fisher: &Fisher,
    config: &CompilerConfig,
    diags: &DiagnosticCollector,
) -> Option<StructureDefinition> {
    export_structure(entity, EntityKind::Resource, fisher, config, diags)
}
