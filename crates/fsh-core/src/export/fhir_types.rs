//! Target-format JSON resource types (spec §3 ElementDefinition, §6 output).
//!
//! Grounded on the teacher's own simplified resource types, with two
//! additions the teacher's version omits but every ElementDefinition this
//! compiler builds needs: `id` (defaulted to `path` for legacy definitions
//! per §4.4) and `sliceName`/`contentReference`/`mapping[]` (used by
//! ContainsRule slicing, AddElementRule logical models, and MappingRule
//! respectively).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StructureDefinition {
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fhir_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    pub kind: StructureDefinitionKind,
    #[serde(rename = "abstract")]
    pub is_abstract: bool,
    #[serde(rename = "type")]
    pub type_field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_definition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<StructureDefinitionContext>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<StructureDefinitionSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub differential: Option<StructureDefinitionDifferential>,
    /// Catch-all for structure-level `CaretValueRule`s (e.g. `^experimental`,
    /// `^publisher`) that target metadata this struct doesn't model as its
    /// own typed field.
    #[serde(skip_serializing_if = "Option::is_none", flatten)]
    pub extra: Option<HashMap<String, serde_json::Value>>,
}

impl StructureDefinition {
    pub fn new(
        url: String,
        name: String,
        type_field: String,
        kind: StructureDefinitionKind,
    ) -> Self {
        Self {
            resource_type: "StructureDefinition".to_string(),
            id: None,
            url,
            version: None,
            name,
            title: None,
            status: "draft".to_string(),
            fhir_version: None,
            description: None,
            copyright: None,
            kind,
            is_abstract: false,
            type_field,
            base_definition: None,
            derivation: Some("constraint".to_string()),
            context: None,
            snapshot: None,
            differential: None,
            extra: None,
        }
    }

    pub fn find_element_mut(&mut self, path: &str, slice_name: Option<&str>) -> Option<&mut ElementDefinition> {
        self.snapshot
            .as_mut()?
            .element
            .iter_mut()
            .find(|e| e.path == path && e.slice_name.as_deref() == slice_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructureDefinitionKind {
    PrimitiveType,
    ComplexType,
    Resource,
    Logical,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StructureDefinitionSnapshot {
    pub element: Vec<ElementDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StructureDefinitionDifferential {
    pub element: Vec<ElementDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinition {
    /// Logical id of this element within the structure; defaults to
    /// `path` for definitions inherited from a legacy base lacking one
    /// (§4.4).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slicing: Option<ElementDefinitionSlicing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "type")]
    pub type_: Option<Vec<ElementDefinitionType>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub must_support: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_modifier: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_summary: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<ElementDefinitionBinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Vec<ElementDefinitionConstraint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Vec<ElementDefinitionMapping>>,
    #[serde(skip_serializing_if = "Option::is_none", flatten)]
    pub fixed: Option<HashMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none", flatten)]
    pub pattern: Option<HashMap<String, serde_json::Value>>,
    /// Catch-all for caret paths this struct doesn't model as a typed
    /// field (e.g. `^short` is typed above, but less common caret targets
    /// like `^code[0].system` land here verbatim).
    #[serde(skip_serializing_if = "Option::is_none", flatten)]
    pub extra: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinitionSlicing {
    pub discriminator: Vec<ElementDefinitionDiscriminator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub ordered: bool,
    pub rules: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinitionDiscriminator {
    #[serde(rename = "type")]
    pub type_: String,
    pub path: String,
}

impl ElementDefinition {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: Some(path.clone()),
            path,
            slice_name: None,
            slicing: None,
            min: None,
            max: None,
            type_: None,
            content_reference: None,
            short: None,
            definition: None,
            comment: None,
            must_support: None,
            is_modifier: None,
            is_summary: None,
            binding: None,
            constraint: None,
            mapping: None,
            fixed: None,
            pattern: None,
            extra: None,
        }
    }

    pub fn has_modifications(&self) -> bool {
        self.min.is_some()
            || self.max.is_some()
            || self.type_.is_some()
            || self.short.is_some()
            || self.definition.is_some()
            || self.comment.is_some()
            || self.must_support.is_some()
            || self.is_modifier.is_some()
            || self.is_summary.is_some()
            || self.binding.is_some()
            || self.constraint.is_some()
            || self.mapping.is_some()
            || self.fixed.is_some()
            || self.pattern.is_some()
            || self.slice_name.is_some()
            || self.slicing.is_some()
            || self.content_reference.is_some()
            || self.extra.is_some()
    }

    /// Set an arbitrary, dotted caret-path key that has no typed field on
    /// this struct; used by `CaretValueRule`s targeting uncommon metadata.
    pub fn set_extra(&mut self, key: String, value: serde_json::Value) {
        self.extra.get_or_insert_with(HashMap::new).insert(key, value);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinitionType {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_profile: Option<Vec<String>>,
}

impl ElementDefinitionType {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            profile: None,
            target_profile: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinitionBinding {
    pub strength: BindingStrength,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_set: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStrength {
    Required,
    Extensible,
    Preferred,
    Example,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinitionConstraint {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    pub human: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinitionMapping {
    pub identity: String,
    pub map: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StructureDefinitionContext {
    #[serde(rename = "type")]
    pub type_: String,
    pub expression: String,
}

// ---------------------------------------------------------------------
// ValueSet
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetResource {
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose: Option<ValueSetCompose>,
    #[serde(skip_serializing_if = "Option::is_none", flatten)]
    pub extra: Option<HashMap<String, serde_json::Value>>,
}

impl ValueSetResource {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: "ValueSet".to_string(),
            id: None,
            url: url.into(),
            version: None,
            name: name.into(),
            title: None,
            status: "draft".to_string(),
            description: None,
            copyright: None,
            compose: None,
            extra: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetCompose {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<ValueSetInclude>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Vec<ValueSetInclude>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetInclude {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<Vec<ValueSetConcept>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Vec<ValueSetFilterResource>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_set: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetConcept {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetFilterResource {
    pub property: String,
    pub op: String,
    pub value: String,
}

// ---------------------------------------------------------------------
// CodeSystem
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystemResource {
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<Vec<CodeSystemConcept>>,
    #[serde(skip_serializing_if = "Option::is_none", flatten)]
    pub extra: Option<HashMap<String, serde_json::Value>>,
}

impl CodeSystemResource {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: "CodeSystem".to_string(),
            id: None,
            url: url.into(),
            version: None,
            name: name.into(),
            title: None,
            status: "draft".to_string(),
            description: None,
            copyright: None,
            case_sensitive: None,
            content: "complete".to_string(),
            count: None,
            concept: None,
            extra: None,
        }
    }

    pub fn update_count(&mut self) {
        if let Some(concepts) = &self.concept {
            self.count = Some(count_concepts(concepts));
        }
    }
}

fn count_concepts(concepts: &[CodeSystemConcept]) -> u32 {
    concepts
        .iter()
        .map(|c| 1 + c.concept.as_deref().map(count_concepts).unwrap_or(0))
        .sum()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystemConcept {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<Vec<CodeSystemConcept>>,
    #[serde(skip_serializing_if = "Option::is_none", flatten)]
    pub extra: Option<HashMap<String, serde_json::Value>>,
}

impl CodeSystemConcept {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            display: None,
            definition: None,
            concept: None,
            extra: None,
        }
    }

    pub fn add_child(&mut self, child: CodeSystemConcept) {
        self.concept.get_or_insert_with(Vec::new).push(child);
    }

    /// Depth-first search for a concept whose code matches `code`,
    /// anywhere in this concept's own subtree (inclusive).
    pub fn find_mut(&mut self, code: &str) -> Option<&mut CodeSystemConcept> {
        if self.code == code {
            return Some(self);
        }
        self.concept
            .as_mut()?
            .iter_mut()
            .find_map(|c| c.find_mut(code))
    }
}

// ---------------------------------------------------------------------
// Instance / Mapping
// ---------------------------------------------------------------------

/// Instances are emitted as free-form JSON objects keyed by
/// `resourceType` plus whatever AssignmentRules set; there is no closed
/// schema to model here, unlike the structural resources above.
pub type InstanceResource = serde_json::Map<String, serde_json::Value>;

/// An exported instance paired with the `Usage` its source entity
/// declared, so a caller can file `Example`/`Definition`/`Inline`
/// instances into distinct output directories (spec §4.6).
#[derive(Debug, Clone)]
pub struct InstanceArtifact {
    pub usage: crate::model::InstanceUsage,
    pub resource: InstanceResource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MappingResource {
    pub resource_type: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}
