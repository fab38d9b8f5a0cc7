//! `CodeSystem:` export (spec §4.6): builds the nested `concept` tree from
//! each entity's `ConceptRule`s in rule order, then applies any
//! `CodeCaretValueRule`s against the concept they address.

use crate::config::CompilerConfig;
use crate::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticCollector};
use crate::fisher::Fisher;
use crate::model::{ConceptRule, Rule, TerminologyEntity};

use super::fhir_types::{CodeSystemConcept, CodeSystemResource};
use super::value_json::value_to_json;

pub fn export_code_system(
    entity: &TerminologyEntity,
    fisher: &Fisher,
    config: &CompilerConfig,
    diags: &DiagnosticCollector,
) -> CodeSystemResource {
    let id = entity.header.id_or_name().to_string();
    let url = config.canonical_url("CodeSystem", &id);
    let mut resource = CodeSystemResource::new(url, entity.header.name.clone());
    resource.id = Some(id);
    resource.title = entity.header.title.clone();
    resource.description = entity.header.description.clone();
    resource.version = Some(config.version.clone());
    resource.status = config.status.clone().unwrap_or_else(|| "draft".to_string());
    resource.copyright = config.copyright.clone();

    for rule in &entity.rules {
        match rule {
            Rule::Concept(concept) => insert_concept(&mut resource, concept, diags),
            Rule::CodeCaretValue(caret) => {
                let code = caret.code_path.last().map(|c| c.code.as_str()).unwrap_or_default();
                let concepts = resource.concept.get_or_insert_with(Vec::new);
                let found = concepts.iter_mut().find_map(|c| c.find_mut(code));
                match found {
                    Some(concept) => apply_concept_caret(concept, caret, fisher, &config.canonical),
                    None => diags.push(
                        Diagnostic::error(
                            DiagnosticCategory::UnknownReference,
                            format!("unknown code '{code}' for CodeCaretValueRule"),
                        )
                        .at(caret.location.clone()),
                    ),
                }
            }
            Rule::CaretValue(caret) if caret.path.is_empty() => {
                let key = crate::path_resolver::caret_key(&caret.caret_path);
                let json = value_to_json(&caret.value, fisher, &config.canonical);
                match key.as_str() {
                    "status" => resource.status = json.as_str().unwrap_or(&resource.status).to_string(),
                    "version" => resource.version = json.as_str().map(str::to_string),
                    "title" => resource.title = json.as_str().map(str::to_string),
                    "description" => resource.description = json.as_str().map(str::to_string),
                    "copyright" => resource.copyright = json.as_str().map(str::to_string),
                    "caseSensitive" => resource.case_sensitive = json.as_bool(),
                    "content" => {
                        if let Some(s) = json.as_str() {
                            resource.content = s.to_string();
                        }
                    }
                    other => {
                        resource.extra.get_or_insert_with(Default::default).insert(other.to_string(), json);
                    }
                }
            }
            _ => {
                diags.push(
                    Diagnostic::warning(
                        DiagnosticCategory::RuleApplicationFailure,
                        "rule not applicable to a CodeSystem",
                    )
                    .at(rule.location().clone()),
                );
            }
        }
    }

    resource.update_count();
    resource
}

fn insert_concept(resource: &mut CodeSystemResource, rule: &ConceptRule, diags: &DiagnosticCollector) {
    let mut concept = CodeSystemConcept::new(rule.code());
    concept.display = rule.display.clone();
    concept.definition = rule.definition.clone();

    match rule.parent() {
        None => resource.concept.get_or_insert_with(Vec::new).push(concept),
        Some(parent_code) => {
            let roots = resource.concept.get_or_insert_with(Vec::new);
            if contains_code(roots, parent_code) {
                if let Some(parent) = roots.iter_mut().find_map(|c| c.find_mut(parent_code)) {
                    parent.add_child(concept);
                }
            } else {
                diags.push(
                    Diagnostic::error(
                        DiagnosticCategory::UnknownReference,
                        format!("unknown parent concept '{parent_code}' for code '{}'", rule.code()),
                    )
                    .at(rule.location.clone()),
                );
                roots.push(concept);
            }
        }
    }
}

fn contains_code(concepts: &[CodeSystemConcept], code: &str) -> bool {
    concepts
        .iter()
        .any(|c| c.code == code || c.concept.as_deref().map(|children| contains_code(children, code)).unwrap_or(false))
}

fn apply_concept_caret(
    concept: &mut CodeSystemConcept,
    caret: &crate::model::CodeCaretValueRule,
    fisher: &Fisher,
    canonical: &str,
) {
    let key = crate::path_resolver::caret_key(&caret.caret_path);
    let json = value_to_json(&caret.value, fisher, canonical);
    match key.as_str() {
        "display" => concept.display = json.as_str().map(str::to_string),
        "definition" => concept.definition = json.as_str().map(str::to_string),
        other => {
            concept.extra.get_or_insert_with(Default::default).insert(other.to_string(), json);
        }
    }
}
