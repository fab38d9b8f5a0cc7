//! `Extension:` export — structure engine with `Extension` as the implicit
//! parent (spec §4.6).

use crate::config::CompilerConfig;
use crate::diagnostics::DiagnosticCollector;
use crate::fisher::Fisher;
use crate::model::{EntityKind, StructureDefEntity};

use super::fhir_types::StructureDefinition;
use super::structure_exporter::export_structure;

pub fn export_extension(
    entity: &StructureDefEntity,
    fisher: &Fisher,
    config: &CompilerConfig,
    diags: &DiagnosticCollector,
) -> Option<StructureDefinition> {
    export_structure(entity, EntityKind::Extension, fisher, config, diags)
}
