//! `Profile:` export — a thin wrapper over the shared structure engine
//! (spec §4.6). Kept as its own module, matching the teacher's
//! one-exporter-per-entity-kind layout, even though the body is a single
//! delegating call.

use crate::config::CompilerConfig;
use crate::diagnostics::DiagnosticCollector;
use crate::fisher::Fisher;
use crate::model::{EntityKind, StructureDefEntity};

use super::fhir_types::StructureDefinition;
use super::structure_exporter::export_structure;

pub fn export_profile(
    entity: &StructureDefEntity,
    fisher: &Fisher,
    config: &CompilerConfig,
    diags: &DiagnosticCollector,
) -> Option<StructureDefinition> {
    export_structure(entity, EntityKind::Profile, fisher, config, diags)
}
