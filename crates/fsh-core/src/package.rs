//! Package Assembler (spec §2, §6): the final in-memory output object.

use crate::export::fhir_types::{CodeSystemResource, MappingResource, StructureDefinition, ValueSetResource};
use crate::export::fhir_types::InstanceArtifact;

/// Output of a compile: every exported artifact, grouped by kind exactly
/// as §6 names them.
#[derive(Debug, Clone, Default)]
pub struct Package {
    pub profiles: Vec<StructureDefinition>,
    pub extensions: Vec<StructureDefinition>,
    pub logicals: Vec<StructureDefinition>,
    pub resources: Vec<StructureDefinition>,
    pub code_systems: Vec<CodeSystemResource>,
    pub value_sets: Vec<ValueSetResource>,
    pub instances: Vec<InstanceArtifact>,
    pub mappings: Vec<MappingResource>,
}

impl Package {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory/filename pair per §6: `<kind>/<ResourceType>-<id>.json`.
    pub fn file_name(resource_type: &str, id: &str) -> String {
        format!("{resource_type}-{id}.json")
    }
}
