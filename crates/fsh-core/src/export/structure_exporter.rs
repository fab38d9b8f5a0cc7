//! Shared export engine for the four structure-definition-like entity
//! kinds (Profile, Extension, Logical, Resource — spec §4.6). Each kind
//! differs only in its parent default, derivation, and whether it mints a
//! brand-new `type`; the rule-application walk that builds snapshot and
//! differential is identical, so one engine serves all four, the way the
//! teacher's own `profile_exporter`/`extension_exporter`/`logical_exporter`
//! share a common rule-handling core underneath their per-kind entry
//! points.

use std::collections::BTreeSet;

use tracing::{debug, trace, warn};

use crate::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticCollector};
use crate::fisher::Fisher;
use crate::model::{
    AddElementRule, CaretValueRule, EntityKind, FlagSet, OnlyType, Rule, StructureDefEntity,
};
use crate::path_resolver::{caret_key, PathResolver, ResolveError};

use super::differential::build_differential;
use super::fhir_types::{
    BindingStrength, ElementDefinition, ElementDefinitionBinding, ElementDefinitionConstraint,
    ElementDefinitionDiscriminator, ElementDefinitionSlicing, ElementDefinitionType, StructureDefinition,
    StructureDefinitionDifferential, StructureDefinitionKind, StructureDefinitionSnapshot,
};
use super::value_json::{assignment_suffix, value_to_json};
use crate::config::CompilerConfig;

/// Per-kind defaults the generic engine needs (spec §4.6 step 1's parent
/// defaults and step 5's metadata).
struct KindProfile {
    default_parent: Option<&'static str>,
    derivation: &'static str,
    mints_new_type: bool,
    kind: StructureDefinitionKind,
    canonical_segment: &'static str,
}

fn kind_profile(kind: EntityKind) -> KindProfile {
    match kind {
        EntityKind::Profile => KindProfile {
            default_parent: None,
            derivation: "constraint",
            mints_new_type: false,
            kind: StructureDefinitionKind::Resource,
            canonical_segment: "StructureDefinition",
        },
        EntityKind::Extension => KindProfile {
            default_parent: Some("Extension"),
            derivation: "constraint",
            mints_new_type: false,
            kind: StructureDefinitionKind::ComplexType,
            canonical_segment: "StructureDefinition",
        },
        EntityKind::Resource => KindProfile {
            default_parent: Some("DomainResource"),
            derivation: "specialization",
            mints_new_type: true,
            kind: StructureDefinitionKind::Resource,
            canonical_segment: "StructureDefinition",
        },
        EntityKind::Logical => KindProfile {
            default_parent: Some("Base"),
            derivation: "specialization",
            mints_new_type: true,
            kind: StructureDefinitionKind::Logical,
            canonical_segment: "StructureDefinition",
        },
        _ => unreachable!("structure_exporter only handles structure-definition-like kinds"),
    }
}

/// Export one Profile/Extension/Logical/Resource entity. Returns `None`
/// only when the parent cannot be resolved at all — a catastrophic,
/// single-artifact failure (§4.6 "Failure semantics"); every other
/// failure is a per-rule diagnostic that leaves the artifact intact.
pub fn export_structure(
    entity: &StructureDefEntity,
    kind: EntityKind,
    fisher: &Fisher,
    config: &CompilerConfig,
    diags: &DiagnosticCollector,
) -> Option<StructureDefinition> {
    let profile = kind_profile(kind);
    let parent_name = entity
        .parent
        .clone()
        .or_else(|| profile.default_parent.map(str::to_string));

    let Some(parent_name) = parent_name else {
        diags.push(
            Diagnostic::error(
                DiagnosticCategory::UnknownReference,
                format!("{} '{}' has no Parent", kind.as_str(), entity.header.name),
            )
            .at(entity.header.location.clone()),
        );
        return None;
    };

    let Some(base) = fisher.find_structure(&parent_name) else {
        diags.push(
            Diagnostic::error(
                DiagnosticCategory::UnknownReference,
                format!("unknown parent '{parent_name}' for {}", entity.header.name),
            )
            .at(entity.header.location.clone()),
        );
        return None;
    };

    trace!(entity = %entity.header.name, parent = %parent_name, "resolved parent for structure export");

    let id = entity.header.id_or_name().to_string();
    let type_field = if profile.mints_new_type {
        entity.header.id_or_name().to_string()
    } else {
        base.type_field.clone()
    };

    let mut elements = base.snapshot.map(|s| s.element).unwrap_or_default();
    rename_root(&mut elements, &type_field);

    let url = config.canonical_url(profile.canonical_segment, &id);
    let mut structure = StructureDefinition::new(url, entity.header.name.clone(), type_field.clone(), profile.kind);
    structure.id = Some(id);
    structure.title = entity.header.title.clone();
    structure.description = entity.header.description.clone();
    structure.version = Some(config.version.clone());
    structure.fhir_version = config.fhir_version.first().cloned();
    structure.status = config.status.clone().unwrap_or_else(|| "draft".to_string());
    structure.copyright = config.copyright.clone();
    structure.base_definition = Some(base.url);
    structure.derivation = Some(profile.derivation.to_string());

    let mut touched: BTreeSet<usize> = BTreeSet::new();

    for mixin_name in &entity.mixins {
        match fisher.tank.find(EntityKind::RuleSet, mixin_name) {
            Some(crate::model::Entity::RuleSet(ruleset)) => {
                for rule in &ruleset.rules {
                    apply_rule(rule, &mut elements, &type_field, &mut touched, &mut structure, fisher, config, diags);
                }
            }
            _ => diags.push(
                Diagnostic::error(
                    DiagnosticCategory::UnknownReference,
                    format!("unknown mixin '{mixin_name}' for {}", entity.header.name),
                )
                .at(entity.header.location.clone()),
            ),
        }
    }

    for rule in &entity.rules {
        apply_rule(rule, &mut elements, &type_field, &mut touched, &mut structure, fisher, config, diags);
    }

    structure.differential = Some(StructureDefinitionDifferential {
        element: build_differential(&elements, &touched),
    });
    structure.snapshot = Some(StructureDefinitionSnapshot { element: elements });

    debug!(
        entity = %entity.header.name,
        kind = kind.as_str(),
        touched = touched.len(),
        "exported structure"
    );

    Some(structure)
}

fn apply_rule(
    rule: &Rule,
    elements: &mut Vec<ElementDefinition>,
    root_path: &str,
    touched: &mut BTreeSet<usize>,
    structure: &mut StructureDefinition,
    fisher: &Fisher,
    config: &CompilerConfig,
    diags: &DiagnosticCollector,
) {
    match rule {
        Rule::Path(_) | Rule::Insert(_) | Rule::Concept(_) | Rule::ValueSetComponent(_) | Rule::CodeCaretValue(_) => {}

        Rule::Card(card) => {
            let resolved = { PathResolver::new(elements, root_path).resolve(&card.path) };
            match resolved {
                Ok(idx) => {
                    if let Some(min) = card.min {
                        elements[idx].min = Some(min);
                    }
                    if let Some(max) = card.max {
                        elements[idx].max = Some(max.to_string());
                    }
                    touched.insert(idx);
                }
                Err(err) => report_resolve_error(diags, &card.path.to_string(), &card.location, err),
            }
        }

        Rule::Flag(flag) => {
            let resolved = { PathResolver::new(elements, root_path).resolve(&flag.path) };
            match resolved {
                Ok(idx) => {
                    apply_flags(&mut elements[idx], &flag.flags);
                    touched.insert(idx);
                }
                Err(err) => report_resolve_error(diags, &flag.path.to_string(), &flag.location, err),
            }
        }

        Rule::Binding(binding) => {
            let resolved = { PathResolver::new(elements, root_path).resolve(&binding.path) };
            match resolved {
                Ok(idx) => {
                    let strength = match binding.strength {
                        crate::model::BindingStrength::Required => BindingStrength::Required,
                        crate::model::BindingStrength::Extensible => BindingStrength::Extensible,
                        crate::model::BindingStrength::Preferred => BindingStrength::Preferred,
                        crate::model::BindingStrength::Example => BindingStrength::Example,
                    };
                    elements[idx].binding = Some(ElementDefinitionBinding {
                        strength,
                        value_set: Some(fisher.resolve_value_set_url(&binding.value_set, &config.canonical)),
                    });
                    touched.insert(idx);
                }
                Err(err) => report_resolve_error(diags, &binding.path.to_string(), &binding.location, err),
            }
        }

        Rule::Assignment(assignment) => {
            let resolved = { PathResolver::new(elements, root_path).resolve(&assignment.path) };
            match resolved {
                Ok(idx) => {
                    let suffix = assignment_suffix(&assignment.value);
                    let key = format!("{}{suffix}", if assignment.exactly { "fixed" } else { "pattern" });
                    let json = value_to_json(&assignment.value, fisher, &config.canonical);
                    let element = &mut elements[idx];
                    if assignment.exactly {
                        element.fixed.get_or_insert_with(Default::default).insert(key, json);
                    } else {
                        element.pattern.get_or_insert_with(Default::default).insert(key, json);
                    }
                    touched.insert(idx);
                }
                Err(err) => report_resolve_error(diags, &assignment.path.to_string(), &assignment.location, err),
            }
        }

        Rule::Only(only) => {
            let resolved = { PathResolver::new(elements, root_path).resolve(&only.path) };
            match resolved {
                Ok(idx) => {
                    let types = only
                        .types
                        .iter()
                        .map(|t| build_only_type(t, fisher, config, diags, &only.location))
                        .collect();
                    elements[idx].type_ = Some(types);
                    touched.insert(idx);
                }
                Err(err) => report_resolve_error(diags, &only.path.to_string(), &only.location, err),
            }
        }

        Rule::Contains(contains) => {
            let parent_idx = { PathResolver::new(elements, root_path).resolve(&contains.path) };
            match parent_idx {
                Ok(parent_idx) => {
                    let parent_path = elements[parent_idx].path.clone();
                    ensure_slicing(&mut elements[parent_idx], &parent_path);
                    touched.insert(parent_idx);
                    for item in &contains.items {
                        let mut clone = elements[parent_idx].clone();
                        clone.slicing = None;
                        if let Some(min) = item.min {
                            clone.min = Some(min);
                        }
                        if let Some(max) = item.max {
                            clone.max = Some(max.to_string());
                        }
                        apply_flags(&mut clone, &item.flags);
                        let idx = PathResolver::new(elements, root_path).insert_slice(&parent_path, item.name.clone(), clone);
                        touched.insert(idx);
                    }
                }
                Err(err) => report_resolve_error(diags, &contains.path.to_string(), &contains.location, err),
            }
        }

        Rule::Obeys(obeys) => {
            let resolved = { PathResolver::new(elements, root_path).resolve(&obeys.path) };
            match resolved {
                Ok(idx) => {
                    if let Some(invariant) = fisher.find_invariant(&obeys.invariant) {
                        let severity = invariant
                            .severity
                            .as_ref()
                            .and_then(|v| match v {
                                crate::model::Value::Code(c) => Some(c.code.clone()),
                                _ => None,
                            });
                        elements[idx]
                            .constraint
                            .get_or_insert_with(Vec::new)
                            .push(ElementDefinitionConstraint {
                                key: invariant.header.id_or_name().to_string(),
                                severity,
                                human: invariant.header.description.clone().unwrap_or_default(),
                                expression: invariant.expression.clone(),
                            });
                        touched.insert(idx);
                    } else {
                        diags.push(
                            Diagnostic::error(
                                DiagnosticCategory::UnknownReference,
                                format!("unknown invariant '{}'", obeys.invariant),
                            )
                            .at(obeys.location.clone()),
                        );
                    }
                }
                Err(err) => report_resolve_error(diags, &obeys.path.to_string(), &obeys.location, err),
            }
        }

        Rule::CaretValue(caret) => apply_caret(caret, elements, root_path, structure, touched, fisher, config, diags),

        Rule::Mapping(_) => {
            // Mapping rules belong to `Mapping:` entities (spec §4.6
            // ordering note); a structure-embedded mapping rule has no
            // effect here.
        }

        Rule::AddElement(add) => apply_add_element(add, elements, root_path, touched, fisher, config, diags),
    }
}

fn apply_flags(element: &mut ElementDefinition, flags: &FlagSet) {
    if let Some(v) = flags.must_support {
        element.must_support = Some(v);
    }
    if let Some(v) = flags.summary {
        element.is_summary = Some(v);
    }
    if let Some(v) = flags.modifier {
        element.is_modifier = Some(v);
    }
    if let Some(v) = flags.trial_use {
        element.set_extra("_trialUse".to_string(), serde_json::json!(v));
    }
    if let Some(v) = flags.normative {
        element.set_extra("_normative".to_string(), serde_json::json!(v));
    }
    if let Some(v) = flags.draft {
        element.set_extra("_draft".to_string(), serde_json::json!(v));
    }
}

fn build_only_type(
    t: &OnlyType,
    fisher: &Fisher,
    config: &CompilerConfig,
    diags: &DiagnosticCollector,
    location: &crate::diagnostics::Location,
) -> ElementDefinitionType {
    if t.is_reference {
        let url = fisher.resolve_entity_url(&t.name, &config.canonical);
        let mut et = ElementDefinitionType::new("Reference");
        et.target_profile = Some(vec![url]);
        return et;
    }
    match fisher.find_structure(&t.name) {
        Some(target) if target.derivation.as_deref() == Some("constraint") => {
            let mut et = ElementDefinitionType::new(target.type_field.clone());
            et.profile = Some(vec![target.url]);
            et
        }
        Some(target) => ElementDefinitionType::new(target.type_field),
        None => {
            diags.push(
                Diagnostic::warning(DiagnosticCategory::UnknownReference, format!("unknown type '{}'", t.name))
                    .at(location.clone()),
            );
            ElementDefinitionType::new(t.name.clone())
        }
    }
}

fn ensure_slicing(element: &mut ElementDefinition, path: &str) {
    if element.slicing.is_some() {
        return;
    }
    let is_extension_like = path.ends_with(".extension") || path.ends_with(".modifierExtension");
    let discriminator = if is_extension_like {
        ElementDefinitionDiscriminator { type_: "value".to_string(), path: "url".to_string() }
    } else {
        ElementDefinitionDiscriminator { type_: "value".to_string(), path: "$this".to_string() }
    };
    element.slicing = Some(ElementDefinitionSlicing {
        discriminator: vec![discriminator],
        description: None,
        ordered: false,
        rules: "open".to_string(),
    });
}

fn apply_caret(
    caret: &CaretValueRule,
    elements: &mut Vec<ElementDefinition>,
    root_path: &str,
    structure: &mut StructureDefinition,
    touched: &mut BTreeSet<usize>,
    fisher: &Fisher,
    config: &CompilerConfig,
    diags: &DiagnosticCollector,
) {
    let json = value_to_json(&caret.value, fisher, &config.canonical);
    let key = caret_key(&caret.caret_path);

    if caret.path.is_empty() {
        apply_structure_caret(structure, &key, json);
        return;
    }

    let resolved = { PathResolver::new(elements, root_path).resolve(&caret.path) };
    match resolved {
        Ok(idx) => {
            apply_element_caret(&mut elements[idx], &key, json);
            touched.insert(idx);
        }
        Err(err) => report_resolve_error(diags, &caret.path.to_string(), &caret.location, err),
    }
}

fn apply_structure_caret(structure: &mut StructureDefinition, key: &str, value: serde_json::Value) {
    match key {
        "status" => structure.status = value.as_str().unwrap_or(&structure.status).to_string(),
        "version" => structure.version = value.as_str().map(str::to_string),
        "title" => structure.title = value.as_str().map(str::to_string),
        "description" => structure.description = value.as_str().map(str::to_string),
        "copyright" => structure.copyright = value.as_str().map(str::to_string),
        "url" => {
            if let Some(url) = value.as_str() {
                structure.url = url.to_string();
            }
        }
        "experimental" | "abstract" => {
            if key == "abstract" {
                structure.is_abstract = value.as_bool().unwrap_or(structure.is_abstract);
            } else {
                structure.extra.get_or_insert_with(Default::default).insert(key.to_string(), value);
            }
        }
        other => {
            structure.extra.get_or_insert_with(Default::default).insert(other.to_string(), value);
        }
    }
}

fn apply_element_caret(element: &mut ElementDefinition, key: &str, value: serde_json::Value) {
    match key {
        "short" => element.short = value.as_str().map(str::to_string),
        "definition" => element.definition = value.as_str().map(str::to_string),
        "comment" => element.comment = value.as_str().map(str::to_string),
        "binding.strength" => {
            if let Some(s) = value.as_str() {
                let strength = match s {
                    "required" => BindingStrength::Required,
                    "extensible" => BindingStrength::Extensible,
                    "preferred" => BindingStrength::Preferred,
                    _ => BindingStrength::Example,
                };
                element.binding.get_or_insert_with(|| ElementDefinitionBinding { strength, value_set: None }).strength = strength;
            }
        }
        "binding.valueSet" => {
            if let Some(url) = value.as_str() {
                element
                    .binding
                    .get_or_insert_with(|| ElementDefinitionBinding { strength: BindingStrength::Example, value_set: None })
                    .value_set = Some(url.to_string());
            }
        }
        "slicing.description" => {
            if let Some(slicing) = element.slicing.as_mut() {
                slicing.description = value.as_str().map(str::to_string);
            }
        }
        "slicing.rules" => {
            if let Some(slicing) = element.slicing.as_mut() {
                if let Some(s) = value.as_str() {
                    slicing.rules = s.to_string();
                }
            }
        }
        other => element.set_extra(other.to_string(), value),
    }
}

fn apply_add_element(
    add: &AddElementRule,
    elements: &mut Vec<ElementDefinition>,
    root_path: &str,
    touched: &mut BTreeSet<usize>,
    fisher: &Fisher,
    config: &CompilerConfig,
    diags: &DiagnosticCollector,
) {
    let parent_path = {
        let resolver = PathResolver::new(elements, root_path);
        resolver.resolve_parent(&add.path)
    };
    let parent_path = match parent_path {
        Ok(p) => p,
        Err(err) => return report_resolve_error(diags, &add.path.to_string(), &add.location, err),
    };
    let Some(last) = add.path.steps.last() else {
        return;
    };
    let full_path = format!("{parent_path}.{}", last.name);
    let mut element = ElementDefinition::new(full_path);
    element.min = add.min;
    element.max = add.max.map(|m| m.to_string());
    element.short = Some(add.short.clone());
    element.definition = add.definition.clone();
    element.content_reference = add.content_reference.clone();
    apply_flags(&mut element, &add.flags);
    if !add.types.is_empty() {
        element.type_ = Some(
            add.types
                .iter()
                .map(|t| build_only_type(t, fisher, config, diags, &add.location))
                .collect(),
        );
    }
    let mut resolver = PathResolver::new(elements, root_path);
    let idx = resolver.append_new(element);
    touched.insert(idx);
}

fn report_resolve_error(diags: &DiagnosticCollector, path: &str, location: &crate::diagnostics::Location, err: ResolveError) {
    warn!(path, %err, "rule application failed");
    diags.push(
        Diagnostic::error(DiagnosticCategory::RuleApplicationFailure, format!("{err}"))
            .at(location.clone()),
    );
}

/// Rename the root element's path (and every descendant's path prefix)
/// from the base structure's own root name to this artifact's own type
/// name — needed only when this kind mints a brand-new type (Logical,
/// Resource); Profile/Extension keep the base's type unchanged (spec §8
/// "the snapshot's first element's path equals the artifact's type
/// name").
fn rename_root(elements: &mut [ElementDefinition], new_root: &str) {
    let Some(old_root) = elements.first().map(|e| e.path.clone()) else {
        return;
    };
    if old_root == new_root {
        return;
    }
    for element in elements.iter_mut() {
        if element.path == old_root {
            element.path = new_root.to_string();
        } else if let Some(rest) = element.path.strip_prefix(&format!("{old_root}.")) {
            element.path = format!("{new_root}.{rest}");
        }
    }
}
