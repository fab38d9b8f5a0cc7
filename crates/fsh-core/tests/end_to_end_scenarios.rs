//! Black-box coverage for the compiler's six named end-to-end scenarios,
//! driven through the public crate surface (`Compiler::compile` and the
//! importer) rather than any internal module's own unit tests.

use fsh_core::config::CompilerConfig;
use fsh_core::diagnostics::DiagnosticCategory;
use fsh_core::import::{self, SourceFile};
use fsh_core::model::{Entity, EntityKind, Rule, Value};
use fsh_core::{Compiler, DiagnosticCollector};
use pretty_assertions::assert_eq;

fn source(text: &str) -> SourceFile {
    SourceFile { path: None, text: text.to_string() }
}

fn import_source(text: &str) -> (import::Tank, DiagnosticCollector) {
    let diags = DiagnosticCollector::new();
    let tank = import::import(&[source(text)], &diags);
    (tank, diags)
}

fn observation_doc() -> serde_json::Value {
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

/// Scenario 1: a profile constraining one inherited element gains the
/// cardinality and flag the rule line asked for, against a snapshot cloned
/// from its parent.
#[test]
fn scenario_1_simple_profile() {
    let config = CompilerConfig::default();
    let sources = [source("Profile: ObservationProfile\nParent: Observation\n* category 1..5 MS\n")];
    let (package, diags) = Compiler::compile(&sources, &[observation_doc()], &config).unwrap();
    assert_eq!(diags.error_count(), 0);

    let profile = &package.profiles[0];
    assert_eq!(profile.base_definition.as_deref(), Some("http://hl7.org/fhir/StructureDefinition/Observation"));
    let snapshot = profile.snapshot.as_ref().unwrap();
    assert_eq!(snapshot.element[0].path, "Observation");

    let category = snapshot.element.iter().find(|e| e.path == "Observation.category").unwrap();
    assert_eq!(category.min, Some(1));
    assert_eq!(category.max.as_deref(), Some("5"));
    assert_eq!(category.must_support, Some(true));
}

/// Scenario 2: a three-level concept hierarchy nests correctly and keeps
/// every display/definition exactly as authored.
#[test]
fn scenario_2_hierarchical_code_system() {
    let config = CompilerConfig::default();
    let sources = [source(
        "CodeSystem: ZOO\n\
         * #bear \"Bear\" \"A member of family Ursidae.\"\n\
         * #bear #sunbear \"Sun bear\" \"Helarctos malayanus\"\n\
         * #bear #sunbear #ursula \"Ursula the sun bear\"\n",
    )];
    let (package, diags) = Compiler::compile(&sources, &[], &config).unwrap();
    assert_eq!(diags.error_count(), 0);

    let code_system = &package.code_systems[0];
    let concepts = code_system.concept.as_ref().unwrap();
    assert_eq!(concepts.len(), 1);
    let bear = &concepts[0];
    assert_eq!(bear.code, "bear");
    assert_eq!(bear.display.as_deref(), Some("Bear"));
    assert_eq!(bear.definition.as_deref(), Some("A member of family Ursidae."));

    let sunbear_children = bear.concept.as_ref().unwrap();
    assert_eq!(sunbear_children.len(), 1);
    let sunbear = &sunbear_children[0];
    assert_eq!(sunbear.code, "sunbear");
    assert_eq!(sunbear.display.as_deref(), Some("Sun bear"));
    assert_eq!(sunbear.definition.as_deref(), Some("Helarctos malayanus"));

    let ursula_children = sunbear.concept.as_ref().unwrap();
    assert_eq!(ursula_children.len(), 1);
    let ursula = &ursula_children[0];
    assert_eq!(ursula.code, "ursula");
    assert_eq!(ursula.display.as_deref(), Some("Ursula the sun bear"));
    assert_eq!(ursula.definition, None);
}

/// Scenario 3: a single-parameter rule-set insert expands exactly once and
/// produces the assignment its body describes, with no diagnostics.
#[test]
fn scenario_3_parameterized_ruleset_insert() {
    let config = CompilerConfig::default();
    let sources = [source(
        "Profile: ParamProfile\n\
         Parent: Observation\n\
         RuleSet: OneParamRuleSet(val)\n\
         * status = {val}\n\
         \n\
         Profile: ParamProfile2\n\
         Parent: Observation\n\
         * insert OneParamRuleSet(#final)\n",
    )];
    // RuleSet entities are collected document-wide, so define it once and
    // insert it from a second profile; a single profile can't declare a
    // RuleSet and its own rules in the same pass here since `RuleSet:` is
    // its own top-level entity.
    let (package, diags) = Compiler::compile(&sources, &[observation_doc()], &config).unwrap();
    assert_eq!(diags.error_count(), 0);

    let profile = package.profiles.iter().find(|p| p.name == "ParamProfile2").unwrap();
    let snapshot = profile.snapshot.as_ref().unwrap();
    let status = snapshot.element.iter().find(|e| e.path == "Observation.status").unwrap();
    let fixed = status.fixed.as_ref().unwrap();
    assert_eq!(fixed.get("fixedCode").and_then(|v| v.as_str()), Some("final"));
}

/// Scenario 4: soft indices interleaved with explicit numeric indices
/// resolve using per-prefix counters, carried across the whole entity in
/// document order.
#[test]
fn scenario_4_soft_indexing_mixed_with_numeric() {
    let (tank, diags) = import_source(
        "Profile: SoftIndexProfile\n\
         Parent: Observation\n\
         * item[+].item[+].item[0]\n\
         * item[0].item[+].item[+]\n\
         * item[=].item[2].item[+]\n\
         * item[=].item[=].item[1]\n",
    );
    assert_eq!(diags.error_count(), 0);

    let Some(Entity::Profile(profile)) = tank.find(EntityKind::Profile, "SoftIndexProfile") else {
        panic!("expected profile");
    };

    let resolved: Vec<Vec<Option<u32>>> = profile
        .rules
        .iter()
        .map(|r| r.path().unwrap().steps.iter().map(|s| s.effective_index()).collect())
        .collect();

    assert_eq!(
        resolved,
        vec![
            vec![Some(0), Some(0), Some(0)],
            vec![Some(0), Some(1), Some(0)],
            vec![Some(0), Some(2), Some(0)],
            vec![Some(0), Some(2), Some(1)],
        ]
    );
}

/// Scenario 5: a duplicated `Severity` metadata line is diagnosed once, at
/// the second occurrence, while the exported invariant keeps the first
/// declared severity.
#[test]
fn scenario_5_duplicate_severity_diagnostic() {
    let (tank, diags) = import_source(
        "Invariant: obs-1\n\
         Description: \"category is required\"\n\
         Severity: #error\n\
         Severity: #warning\n\
         Expression: \"category.exists()\"\n",
    );

    let duplicate_errors: Vec<_> = diags
        .sorted()
        .into_iter()
        .filter(|d| d.category == DiagnosticCategory::DuplicateMetadata)
        .collect();
    assert_eq!(duplicate_errors.len(), 1);
    // Lines are counted from 0; "Severity: #warning" is the fourth line.
    assert_eq!(duplicate_errors[0].location.as_ref().unwrap().start_line, 3);

    let Some(Entity::Invariant(invariant)) = tank.find(EntityKind::Invariant, "obs-1") else {
        panic!("expected invariant");
    };
    match &invariant.severity {
        Some(Value::Code(code)) => assert_eq!(code.code, "error"),
        other => panic!("unexpected severity {other:?}"),
    }
}

/// Scenario 6: a mapping rule's `->` arrow with no surrounding space is a
/// syntax error and the rule is dropped rather than added.
#[test]
fn scenario_6_mapping_arrow_spacing() {
    let (tank, diags) = import_source(
        "Mapping: ObsMap\n\
         Source: Observation\n\
         Target: \"http://example.org/v2\"\n\
         * identifier->\"Patient.identifier\"\n",
    );

    let spacing_errors: Vec<_> = diags
        .sorted()
        .into_iter()
        .filter(|d| d.category == DiagnosticCategory::Syntax && d.message.contains("'->'"))
        .collect();
    assert_eq!(spacing_errors.len(), 1);

    let Some(Entity::Mapping(mapping)) = tank.find(EntityKind::Mapping, "ObsMap") else {
        panic!("expected mapping");
    };
    assert!(mapping.rules.iter().all(|r| !matches!(r, Rule::Mapping(_))));
}
