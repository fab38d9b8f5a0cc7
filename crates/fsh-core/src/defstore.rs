//! Definition Store (spec §4.4): an in-memory, immutable-after-load index
//! of external base definitions loaded from dependency packages.
//!
//! Classification on insert mirrors a three-tier fishing pattern similar
//! to the teacher's own `FshTank`/`CanonicalFacade` split (`semantic::fishing`):
//! resources, types, extensions, and value-sets each get their own index,
//! and `find` walks them in that declared precedence order.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::export::fhir_types::{ElementDefinition, StructureDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Bucket {
    Resources,
    Types,
    Extensions,
    ValueSets,
}

/// One base structure definition as loaded from a dependency package,
/// stored pre-parsed into the target-format struct so lookups can return
/// cheap clones.
#[derive(Debug, Clone)]
pub struct StoredDefinition {
    pub structure: StructureDefinition,
}

#[derive(Default)]
pub struct DefinitionStore {
    by_id: HashMap<String, (Bucket, usize)>,
    by_url: HashMap<String, (Bucket, usize)>,
    buckets: HashMap<Bucket, Vec<StoredDefinition>>,
    /// External ValueSet/CodeSystem documents from dependency packages,
    /// kept as raw JSON since this compiler never needs to mutate them —
    /// only to read `url` off them when a BindingRule or ValueSetComponentRule
    /// references one by id/name that isn't defined in this compile.
    external_value_sets: HashMap<String, Json>,
    external_code_systems: HashMap<String, Json>,
}

impl DefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load one already-parsed dependency package document (an opaque
    /// external JSON document per §6) into the store. `StructureDefinition`
    /// documents are classified per §4.4; `ValueSet`/`CodeSystem` documents
    /// are kept separately so external terminology can still be resolved by
    /// id or canonical URL.
    pub fn load_document(&mut self, doc: &Json) {
        let Some(resource_type) = doc.get("resourceType").and_then(Json::as_str) else {
            return;
        };
        match resource_type {
            "StructureDefinition" => {
                if let Ok(mut structure) = serde_json::from_value::<StructureDefinition>(doc.clone()) {
                    default_missing_element_ids(&mut structure);
                    let bucket = classify(&structure);
                    self.insert(bucket, structure);
                }
            }
            "ValueSet" => index_external(&mut self.external_value_sets, doc),
            "CodeSystem" => index_external(&mut self.external_code_systems, doc),
            _ => {}
        }
    }

    /// The canonical URL of an external value set, looked up by id, name,
    /// or the URL itself.
    pub fn find_value_set_url(&self, key: &str) -> Option<String> {
        self.external_value_sets
            .get(key)
            .and_then(|doc| doc.get("url"))
            .and_then(Json::as_str)
            .map(str::to_string)
    }

    pub fn find_code_system_url(&self, key: &str) -> Option<String> {
        self.external_code_systems
            .get(key)
            .and_then(|doc| doc.get("url"))
            .and_then(Json::as_str)
            .map(str::to_string)
    }

    fn insert(&mut self, bucket: Bucket, structure: StructureDefinition) {
        let id = structure.id.clone();
        let url = structure.url.clone();
        let list = self.buckets.entry(bucket).or_default();
        let index = list.len();
        list.push(StoredDefinition { structure });
        if let Some(id) = id {
            self.by_id.insert(id, (bucket, index));
        }
        self.by_url.insert(url, (bucket, index));
    }

    fn get(&self, bucket: Bucket, index: usize) -> Option<&StoredDefinition> {
        self.buckets.get(&bucket).and_then(|v| v.get(index))
    }

    /// Look up by id, then by canonical URL, returning a deep copy so the
    /// caller may mutate it freely (§4.4 "every lookup returns a deep
    /// copy").
    pub fn find_by_id(&self, id: &str) -> Option<StructureDefinition> {
        self.by_id
            .get(id)
            .and_then(|&(b, i)| self.get(b, i))
            .map(|d| d.structure.clone())
    }

    pub fn find_by_url(&self, url: &str) -> Option<StructureDefinition> {
        self.by_url
            .get(url)
            .and_then(|&(b, i)| self.get(b, i))
            .map(|d| d.structure.clone())
    }

    /// Polymorphic lookup by either id or canonical URL, searching
    /// resources, types, extensions, then value-sets, in that order
    /// (§4.4's declared precedence).
    pub fn find(&self, key: &str) -> Option<StructureDefinition> {
        for bucket in [Bucket::Resources, Bucket::Types, Bucket::Extensions, Bucket::ValueSets] {
            if let Some((b, i)) = self.by_id.get(key).copied().filter(|(b, _)| *b == bucket) {
                return self.get(b, i).map(|d| d.structure.clone());
            }
            if let Some((b, i)) = self.by_url.get(key).copied().filter(|(b, _)| *b == bucket) {
                return self.get(b, i).map(|d| d.structure.clone());
            }
        }
        None
    }
}

fn index_external(map: &mut HashMap<String, Json>, doc: &Json) {
    let id = doc.get("id").and_then(Json::as_str).map(str::to_string);
    let url = doc.get("url").and_then(Json::as_str).map(str::to_string);
    let name = doc.get("name").and_then(Json::as_str).map(str::to_string);
    if let Some(id) = id {
        map.insert(id, doc.clone());
    }
    if let Some(url) = url {
        map.insert(url, doc.clone());
    }
    if let Some(name) = name {
        map.insert(name, doc.clone());
    }
}

fn classify(structure: &StructureDefinition) -> Bucket {
    use crate::export::fhir_types::StructureDefinitionKind as Kind;
    if structure.type_field == "Extension" && structure.base_definition.as_deref() != Some("http://hl7.org/fhir/StructureDefinition/Element") {
        return Bucket::Extensions;
    }
    match structure.kind {
        Kind::PrimitiveType | Kind::ComplexType => Bucket::Types,
        Kind::Resource => {
            if structure.type_field == "ValueSet" {
                Bucket::ValueSets
            } else {
                Bucket::Resources
            }
        }
        Kind::Logical => Bucket::Types,
    }
}

/// Legacy base definitions loaded from older packages sometimes omit
/// element `id`; default each to its `path` (§4.4).
fn default_missing_element_ids(structure: &mut StructureDefinition) {
    for collection in [
        structure.snapshot.as_mut().map(|s| &mut s.element),
        structure.differential.as_mut().map(|d| &mut d.element),
    ]
    .into_iter()
    .flatten()
    {
        for element in collection.iter_mut() {
            default_element_id(element);
        }
    }
}

fn default_element_id(element: &mut ElementDefinition) {
    if element.id.is_none() {
        element.id = Some(element.path.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation_doc() -> Json {
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
    fn loads_and_finds_by_id_and_url() {
        let mut store = DefinitionStore::new();
        store.load_document(&observation_doc());
        assert!(store.find_by_id("Observation").is_some());
        assert!(store
            .find_by_url("http://hl7.org/fhir/StructureDefinition/Observation")
            .is_some());
        assert!(store.find("Observation").is_some());
    }

    #[test]
    fn lookups_return_independent_deep_copies() {
        let mut store = DefinitionStore::new();
        store.load_document(&observation_doc());
        let mut a = store.find_by_id("Observation").unwrap();
        let b = store.find_by_id("Observation").unwrap();
        a.snapshot.as_mut().unwrap().element.push(ElementDefinition::new("Observation.extra"));
        assert_ne!(a.snapshot.as_ref().unwrap().element.len(), b.snapshot.as_ref().unwrap().element.len());
    }

    #[test]
    fn legacy_elements_default_id_to_path() {
        let mut store = DefinitionStore::new();
        store.load_document(&observation_doc());
        let structure = store.find_by_id("Observation").unwrap();
        let status = structure
            .snapshot
            .unwrap()
            .element
            .into_iter()
            .find(|e| e.path == "Observation.status")
            .unwrap();
        assert_eq!(status.id.as_deref(), Some("Observation.status"));
    }
}
