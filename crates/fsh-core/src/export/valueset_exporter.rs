//! `ValueSet:` export (spec §4.6): builds a `compose.include`/`exclude`
//! list from each entity's `ValueSetComponentRule`s, in rule order.

use crate::config::CompilerConfig;
use crate::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticCollector};
use crate::fisher::Fisher;
use crate::model::{ConceptCode, Rule, TerminologyEntity, ValueSetComponentRule, ValueSetFilter};

use super::fhir_types::{
    ValueSetCompose, ValueSetConcept, ValueSetFilterResource, ValueSetInclude, ValueSetResource,
};
use super::value_json::value_to_json;

pub fn export_value_set(
    entity: &TerminologyEntity,
    fisher: &Fisher,
    config: &CompilerConfig,
    diags: &DiagnosticCollector,
) -> ValueSetResource {
    let id = entity.header.id_or_name().to_string();
    let url = config.canonical_url("ValueSet", &id);
    let mut resource = ValueSetResource::new(url, entity.header.name.clone());
    resource.id = Some(id);
    resource.title = entity.header.title.clone();
    resource.description = entity.header.description.clone();
    resource.version = Some(config.version.clone());
    resource.status = config.status.clone().unwrap_or_else(|| "draft".to_string());
    resource.copyright = config.copyright.clone();

    let mut compose = ValueSetCompose::default();

    for rule in &entity.rules {
        match rule {
            Rule::ValueSetComponent(component) => {
                let include = build_include(component, fisher, &config.canonical);
                let bucket = if component.include {
                    compose.include.get_or_insert_with(Vec::new)
                } else {
                    compose.exclude.get_or_insert_with(Vec::new)
                };
                bucket.push(include);
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
                    "url" => {
                        if let Some(url) = json.as_str() {
                            resource.url = url.to_string();
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
                        "rule not applicable to a ValueSet",
                    )
                    .at(rule.location().clone()),
                );
            }
        }
    }

    if compose.include.is_some() || compose.exclude.is_some() {
        resource.compose = Some(compose);
    }

    resource
}

fn build_include(component: &ValueSetComponentRule, fisher: &Fisher, canonical: &str) -> ValueSetInclude {
    let mut include = ValueSetInclude {
        system: None,
        concept: None,
        filter: None,
        value_set: None,
    };

    if !component.concepts.is_empty() {
        let system = component
            .concepts
            .iter()
            .find_map(|c| c.system.clone())
            .or_else(|| component.from_system.clone());
        include.system = system.map(|s| fisher.resolve_code_system_url(&s, canonical));
        include.concept = Some(component.concepts.iter().map(concept_json).collect());
    } else if let Some(system) = &component.from_system {
        include.system = Some(fisher.resolve_code_system_url(system, canonical));
    }

    if !component.filters.is_empty() {
        let system = component.from_system.as_ref().map(|s| fisher.resolve_code_system_url(s, canonical));
        include.system = include.system.or(system);
        include.filter = Some(component.filters.iter().map(filter_json).collect());
    }

    if !component.from_value_sets.is_empty() {
        include.value_set = Some(
            component
                .from_value_sets
                .iter()
                .map(|v| fisher.resolve_value_set_url(v, canonical))
                .collect(),
        );
    }

    include
}

fn concept_json(code: &ConceptCode) -> ValueSetConcept {
    ValueSetConcept {
        code: code.code.clone(),
        display: None,
    }
}

fn filter_json(filter: &ValueSetFilter) -> ValueSetFilterResource {
    ValueSetFilterResource {
        property: filter.property.clone(),
        op: filter.op.clone(),
        value: filter.value.clone(),
    }
}
