//! Converts a rule [`Value`] into its target-format JSON representation
//! and picks the `fixed`/`pattern` type suffix an AssignmentRule or
//! CaretValueRule needs (spec §4.6 "set fixed[TypeSuffix] or
//! pattern[TypeSuffix]").
//!
//! Kept separate from the exporters themselves since both the
//! AssignmentRule and CaretValueRule handlers need the identical
//! conversion.

use serde_json::{json, Value as Json};

use crate::fisher::Fisher;
use crate::model::{CodeValue, NumberLiteral, Value};

/// The `fixed`/`pattern` type suffix for `value`. Differs from
/// [`Value::type_suffix`] only for bare codes: a `#code` with no system
/// assigns a primitive `code`, matching how the shorthand actually
/// distinguishes a bare code from a `System#code` pair that assigns a
/// `Coding`.
pub fn assignment_suffix(value: &Value) -> &'static str {
    match value {
        Value::Code(CodeValue { system: None, .. }) => "Code",
        Value::Code(_) => "Coding",
        other => other.type_suffix(),
    }
}

pub fn value_to_json(value: &Value, fisher: &Fisher, canonical: &str) -> Json {
    match value {
        Value::Boolean(b) => json!(b),
        Value::Number(n) => number_json(n),
        Value::String(s) => json!(s),
        Value::DateTime(s) => json!(s),
        Value::Time(s) => json!(s),
        Value::Code(CodeValue { code, system: None, display: None }) => json!(code),
        Value::Code(CodeValue { code, system, display }) => {
            let mut obj = serde_json::Map::new();
            obj.insert("code".to_string(), json!(code));
            if let Some(system) = system {
                obj.insert("system".to_string(), json!(fisher.resolve_code_system_url(system, canonical)));
            }
            if let Some(display) = display {
                obj.insert("display".to_string(), json!(display));
            }
            Json::Object(obj)
        }
        Value::Quantity(q) => {
            let mut obj = serde_json::Map::new();
            obj.insert("value".to_string(), number_json(&q.value));
            if let Some(unit) = &q.unit {
                obj.insert("unit".to_string(), json!(unit));
                obj.insert("system".to_string(), json!("http://unitsofmeasure.org"));
                obj.insert("code".to_string(), json!(unit));
            }
            Json::Object(obj)
        }
        Value::Ratio { numerator, denominator } => {
            json!({
                "numerator": ratio_component_json(numerator),
                "denominator": ratio_component_json(denominator),
            })
        }
        Value::Reference(r) => {
            let mut obj = serde_json::Map::new();
            obj.insert(
                "reference".to_string(),
                json!(fisher.resolve_entity_url(&r.entity, canonical)),
            );
            if let Some(display) = &r.display {
                obj.insert("display".to_string(), json!(display));
            }
            Json::Object(obj)
        }
        Value::Canonical(c) => {
            let url = fisher.resolve_entity_url(&c.entity, canonical);
            match &c.version {
                Some(version) => json!(format!("{url}|{version}")),
                None => json!(url),
            }
        }
        Value::ResourceRef(name) => json!(name),
        Value::Identifier(name) => json!(name),
    }
}

fn number_json(n: &NumberLiteral) -> Json {
    if n.is_decimal {
        json!(n.value)
    } else {
        json!(n.value as i64)
    }
}

fn ratio_component_json(component: &crate::model::RatioComponent) -> Json {
    let mut obj = serde_json::Map::new();
    obj.insert("value".to_string(), number_json(&component.value));
    if let Some(unit) = &component.unit {
        obj.insert("unit".to_string(), json!(unit));
        obj.insert("system".to_string(), json!("http://unitsofmeasure.org"));
        obj.insert("code".to_string(), json!(unit));
    }
    Json::Object(obj)
}
