//! Fisher (spec §2, §4.6): the unified lookup exporters use to resolve
//! parent, type, and binding references across three sources, in
//! precedence order:
//!
//! 1. artifacts already exported earlier in this same compile (a profile
//!    deriving from another local profile);
//! 2. the definition store's external base definitions (§4.4);
//! 3. the importer's tank, for references that resolve to an entity still
//!    awaiting export (used for `InstanceOf`, `ObeysRule` invariants, and
//!    value-set/code-system names that are defined locally).
//!
//! Named after the identically-scoped lookup the teacher's own exporters
//! call through (`canonical::fishable::Fishable`), generalized here to
//! cover the three source tiers this spec's exporter actually needs.

use std::sync::Arc;

use dashmap::DashMap;

use crate::defstore::DefinitionStore;
use crate::export::fhir_types::StructureDefinition;
use crate::import::Tank;
use crate::model::{Entity, EntityKind, InstanceEntity, InvariantEntity};

/// Structure definitions finished by earlier export steps in this same
/// compile, indexed by every name an `OnlyRule`/`Parent` reference might
/// use. Populated incrementally as the structure-kind exporters run from
/// parallel `rayon` tasks (§5); three separate `DashMap`s (rather than one
/// map behind a single lock) give each lookup kind its own shard-striped
/// concurrent index, mirroring the teacher's own `by_name`/`by_url`/`by_id`
/// `DashMap` fields on `SymbolTable`.
#[derive(Default)]
pub struct LocalRegistry {
    by_name: DashMap<String, Arc<StructureDefinition>>,
    by_id: DashMap<String, Arc<StructureDefinition>>,
    by_url: DashMap<String, Arc<StructureDefinition>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, structure: &StructureDefinition) {
        let arc = Arc::new(structure.clone());
        self.by_name.insert(structure.name.clone(), Arc::clone(&arc));
        if let Some(id) = &structure.id {
            self.by_id.insert(id.clone(), Arc::clone(&arc));
        }
        self.by_url.insert(structure.url.clone(), arc);
    }

    pub fn get(&self, key: &str) -> Option<StructureDefinition> {
        self.by_name
            .get(key)
            .or_else(|| self.by_id.get(key))
            .or_else(|| self.by_url.get(key))
            .map(|entry| (**entry).clone())
    }
}

/// Unified lookup handed to every exporter (spec §2 "Fisher").
pub struct Fisher<'a> {
    pub tank: &'a Tank,
    pub defstore: &'a DefinitionStore,
    pub local: &'a LocalRegistry,
}

impl<'a> Fisher<'a> {
    pub fn new(tank: &'a Tank, defstore: &'a DefinitionStore, local: &'a LocalRegistry) -> Self {
        Self { tank, defstore, local }
    }

    /// Resolve a parent/type reference to its base structure definition,
    /// local artifacts first, then the definition store.
    pub fn find_structure(&self, key: &str) -> Option<StructureDefinition> {
        self.local.get(key).or_else(|| self.defstore.find(key))
    }

    pub fn find_invariant(&self, name: &str) -> Option<&'a InvariantEntity> {
        match self.tank.find(EntityKind::Invariant, name) {
            Some(Entity::Invariant(inv)) => Some(inv),
            _ => None,
        }
    }

    /// An `Instance:` entity by bare name, for recursively inlining a
    /// referenced instance into an assignment's value (spec §4.6
    /// "resolve inline instances recursively").
    pub fn find_instance(&self, name: &str) -> Option<&'a InstanceEntity> {
        match self.tank.find(EntityKind::Instance, name) {
            Some(Entity::Instance(inst)) => Some(inst),
            _ => None,
        }
    }

    /// Canonical URL for a value-set reference: a locally authored
    /// `ValueSet:` entity's own URL (by the config's canonical prefix), or
    /// an externally loaded value set's URL, or the bare reference
    /// unchanged if it is already a full URL.
    pub fn resolve_value_set_url(&self, reference: &str, canonical: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") || reference.starts_with("urn:") {
            return reference.to_string();
        }
        if let Some(url) = self.defstore.find_value_set_url(reference) {
            return url;
        }
        if self.tank.find(EntityKind::ValueSet, reference).is_some() {
            return format!("{}/ValueSet/{}", canonical.trim_end_matches('/'), reference);
        }
        reference.to_string()
    }

    pub fn resolve_code_system_url(&self, reference: &str, canonical: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") || reference.starts_with("urn:") {
            return reference.to_string();
        }
        if let Some(url) = self.defstore.find_code_system_url(reference) {
            return url;
        }
        if self.tank.find(EntityKind::CodeSystem, reference).is_some() {
            return format!("{}/CodeSystem/{}", canonical.trim_end_matches('/'), reference);
        }
        reference.to_string()
    }

    /// Canonical URL for a Reference/Canonical/ResourceRef value naming
    /// another entity by bare name: a profile/extension/logical/resource's
    /// own exported URL when known locally, else a best-effort canonical
    /// URL under the compile's own prefix.
    pub fn resolve_entity_url(&self, name: &str, canonical: &str) -> String {
        if name.starts_with("http://") || name.starts_with("https://") || name.starts_with("urn:") {
            return name.to_string();
        }
        if let Some(structure) = self.local.get(name) {
            return structure.url;
        }
        if let Some(structure) = self.defstore.find(name) {
            return structure.url;
        }
        format!("{}/StructureDefinition/{}", canonical.trim_end_matches('/'), name)
    }
}
