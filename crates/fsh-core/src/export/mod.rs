//! Exporters turn the entity/rule model into target-format JSON resources
//! (spec §4.6). Each entity kind gets its own thin module; the four
//! structure-definition-like kinds (Profile/Extension/Logical/Resource)
//! share [`structure_exporter`]'s rule-application engine.

pub mod codesystem_exporter;
pub mod differential;
pub mod extension_exporter;
pub mod fhir_types;
pub mod instance_exporter;
pub mod logical_exporter;
pub mod mapping_exporter;
pub mod profile_exporter;
pub mod resource_exporter;
pub mod structure_exporter;
pub mod value_json;
pub mod valueset_exporter;

pub use codesystem_exporter::export_code_system;
pub use extension_exporter::export_extension;
pub use instance_exporter::export_instance;
pub use logical_exporter::export_logical;
pub use mapping_exporter::apply_mapping;
pub use profile_exporter::export_profile;
pub use resource_exporter::export_resource;
pub use valueset_exporter::export_value_set;
