//! Rule-set expansion (spec §4.3).
//!
//! A parameterized rule-set stores its parameters and raw, unparsed body
//! text. On `insert Name(args...)`, this module substitutes `{param}`
//! occurrences textually, re-lexes and re-parses the substituted body, and
//! memoizes the result by `(ruleset_name, argument_tuple)` so a second
//! insert with identical arguments never re-parses (§4.3.4, §8 scenario 3).
//!
//! Memoization uses a structured `(String, Vec<String>)` key in a hash
//! table rather than a JSON-stringified tuple (design notes).

use std::collections::HashMap;

use crate::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticCollector, Location};
use crate::model::{InsertRule, Path, PathStep, Rule, RuleSetEntity};
use crate::parser;

const MAX_EXPANSION_DEPTH: usize = 10;

/// Either flavor of `RuleSet:` entity, keyed by name for lookup during
/// expansion.
pub enum RuleSetDef {
    Plain(Vec<Rule>),
    Parameterized {
        params: Vec<String>,
        body_source: String,
        body_location: Location,
    },
}

pub struct RuleSetExpander<'a> {
    definitions: &'a HashMap<String, RuleSetDef>,
    diags: &'a DiagnosticCollector,
    cache: HashMap<(String, Vec<String>), Vec<Rule>>,
}

impl<'a> RuleSetExpander<'a> {
    pub fn new(definitions: &'a HashMap<String, RuleSetDef>, diags: &'a DiagnosticCollector) -> Self {
        Self {
            definitions,
            diags,
            cache: HashMap::new(),
        }
    }

    /// Expand every `InsertRule` found (recursively) in `rules`, replacing
    /// each with the rules its rule-set body produces, reparented under the
    /// insert's own context path. Non-insert rules pass through unchanged.
    pub fn expand_all(&mut self, rules: Vec<Rule>) -> Vec<Rule> {
        let mut out = Vec::with_capacity(rules.len());
        for rule in rules {
            match rule {
                Rule::Insert(insert) => {
                    let expanded = self.expand_insert(&insert, 0);
                    out.extend(expanded);
                }
                other => out.push(other),
            }
        }
        out
    }

    fn expand_insert(&mut self, insert: &InsertRule, depth: usize) -> Vec<Rule> {
        if depth >= MAX_EXPANSION_DEPTH {
            self.diags.push(
                Diagnostic::error(
                    DiagnosticCategory::RuleSetParseError,
                    format!(
                        "rule-set expansion exceeded maximum nesting depth inserting '{}'",
                        insert.ruleset_name
                    ),
                )
                .at(insert.location.clone()),
            );
            return Vec::new();
        }

        let key = (insert.ruleset_name.clone(), insert.params.clone());
        if let Some(cached) = self.cache.get(&key) {
            return reparent(cached.clone(), insert);
        }

        let def = match self.definitions.get(&insert.ruleset_name) {
            Some(def) => def,
            None => {
                self.diags.push(
                    Diagnostic::error(
                        DiagnosticCategory::UnknownReference,
                        format!("unknown rule set '{}'", insert.ruleset_name),
                    )
                    .at(insert.location.clone()),
                );
                return Vec::new();
            }
        };

        let expanded = match def {
            RuleSetDef::Plain(rules) => {
                if !insert.params.is_empty() {
                    self.diags.push(
                        Diagnostic::error(
                            DiagnosticCategory::RuleSetParameterMismatch,
                            format!(
                                "'{}' takes no parameters, got {}",
                                insert.ruleset_name,
                                insert.params.len()
                            ),
                        )
                        .at(insert.location.clone()),
                    );
                    Vec::new()
                } else {
                    rules.clone()
                }
            }
            RuleSetDef::Parameterized {
                params,
                body_source,
                body_location,
            } => {
                if params.len() != insert.params.len() {
                    self.diags.push(
                        Diagnostic::error(
                            DiagnosticCategory::RuleSetParameterMismatch,
                            format!(
                                "'{}' expects {} parameter(s), got {}",
                                insert.ruleset_name,
                                params.len(),
                                insert.params.len()
                            ),
                        )
                        .at(insert.location.clone()),
                    );
                    Vec::new()
                } else {
                    self.expand_parameterized(params, body_source, body_location, &insert.params, depth)
                }
            }
        };

        self.cache.insert(key, expanded.clone());
        reparent(expanded, insert)
    }

    fn expand_parameterized(
        &mut self,
        params: &[String],
        body_source: &str,
        body_location: &Location,
        args: &[String],
        depth: usize,
    ) -> Vec<Rule> {
        let substituted = substitute_params(body_source, params, args);

        // `body_source` is always a bare rule-line sequence (the slice
        // starts at the first `*`, per the parser's own
        // `ParameterizedRuleSetEntity` construction) — never a full
        // `RuleSet:` header. Wrap it with a synthesized header before
        // parsing so the document parser has a top-level entity to attach
        // the rules to, and report diagnostics from this, the only, parse.
        let wrapped = format!("RuleSet: __expansion__\n{substituted}");
        let scratch_diags = DiagnosticCollector::new();
        let parsed = parser::parse_source(body_location.file.clone(), &wrapped, &scratch_diags);

        if !scratch_diags.is_empty() {
            self.diags.push(
                Diagnostic::error(
                    DiagnosticCategory::RuleSetParseError,
                    format!(
                        "expanded rule-set body produced {} diagnostic(s)",
                        scratch_diags.sorted().len()
                    ),
                )
                .at(body_location.clone()),
            );
        }

        let rules: Vec<Rule> = parsed
            .entities
            .into_iter()
            .flat_map(|e| match e {
                crate::model::Entity::RuleSet(RuleSetEntity { rules, .. }) => rules,
                _ => Vec::new(),
            })
            .collect();

        rules
            .into_iter()
            .map(|mut r| {
                *r.location_mut() = body_location.clone();
                r
            })
            .flat_map(|r| match r {
                Rule::Insert(nested) => self.expand_insert(&nested, depth + 1),
                other => vec![other],
            })
            .collect()
    }
}

/// Reparents every rule's path under the insert's own context path, when
/// the insert appeared beneath a `PathRule`/indented context.
fn reparent(rules: Vec<Rule>, insert: &InsertRule) -> Vec<Rule> {
    let Some(prefix) = &insert.path else {
        return rules;
    };
    rules
        .into_iter()
        .map(|mut r| {
            if let Some(path) = r.path_mut() {
                let mut combined: Vec<PathStep> = prefix.steps.clone();
                combined.extend(path.steps.drain(..));
                *path = Path { steps: combined };
            }
            r
        })
        .collect()
}

/// Replace every `{param}` occurrence in `body` with its matching argument
/// text (spec §4.3 step 2: "literal textual replacement of `{param}`
/// occurrences with the supplied argument text") — unconditionally,
/// including occurrences spelled inside a `[...]` slice/index bracket, so
/// a rule set can be parameterized by slice name (e.g.
/// `* component[{name}].valueString = {val}`).
fn substitute_params(body: &str, params: &[String], args: &[String]) -> String {
    let mut out = String::with_capacity(body.len());
    let chars: Vec<char> = body.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '{' => {
                if let Some(close) = chars[i..].iter().position(|c| *c == '}') {
                    let name: String = chars[i + 1..i + close].iter().collect();
                    if let Some(idx) = params.iter().position(|p| p == &name) {
                        out.push_str(&args[idx]);
                    } else {
                        out.push_str(&chars[i..=i + close].iter().collect::<String>());
                    }
                    i += close + 1;
                } else {
                    out.push(c);
                    i += 1;
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Split a rule-set insert's parenthesized argument list on top-level
/// commas, respecting nested parentheses and quoted strings so that an
/// argument like `"a, b"` or `Coding(a, b)` is not split internally.
pub fn split_arguments(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut current = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_string = !in_string;
                current.push(c);
            }
            '\\' if in_string => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '(' if !in_string => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_string => {
                depth -= 1;
                current.push(c);
            }
            ',' if !in_string && depth == 0 => {
                out.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssignmentRule, CodeValue, Value};

    fn loc() -> Location {
        Location::new(None, 1, 1)
    }

    #[test]
    fn expands_single_param_ruleset_once() {
        let mut defs = HashMap::new();
        defs.insert(
            "OneParamRuleSet".to_string(),
            RuleSetDef::Parameterized {
                params: vec!["val".to_string()],
                body_source: "* status = {val}\n".to_string(),
                body_location: loc(),
            },
        );
        let diags = DiagnosticCollector::new();
        let mut expander = RuleSetExpander::new(&defs, &diags);

        let insert = InsertRule {
            path: None,
            ruleset_name: "OneParamRuleSet".to_string(),
            params: vec!["#final".to_string()],
            location: loc(),
        };
        let expanded = expander.expand_insert(&insert, 0);
        assert_eq!(expanded.len(), 1);
        match &expanded[0] {
            Rule::Assignment(AssignmentRule { value: Value::Code(CodeValue { code, .. }), .. }) => {
                assert_eq!(code, "final");
            }
            other => panic!("unexpected rule {other:?}"),
        }
        assert!(diags.is_empty());

        // Second insert with the same arguments must hit the cache rather
        // than re-parsing — verified indirectly: the cache already holds
        // the key and the result is identical without new diagnostics.
        let expanded_again = expander.expand_insert(&insert, 0);
        assert_eq!(expanded.len(), expanded_again.len());
    }

    #[test]
    fn parameter_count_mismatch_is_diagnosed() {
        let mut defs = HashMap::new();
        defs.insert(
            "OneParamRuleSet".to_string(),
            RuleSetDef::Parameterized {
                params: vec!["val".to_string()],
                body_source: "* status = {val}\n".to_string(),
                body_location: loc(),
            },
        );
        let diags = DiagnosticCollector::new();
        let mut expander = RuleSetExpander::new(&defs, &diags);
        let insert = InsertRule {
            path: None,
            ruleset_name: "OneParamRuleSet".to_string(),
            params: vec![],
            location: loc(),
        };
        let expanded = expander.expand_insert(&insert, 0);
        assert!(expanded.is_empty());
        assert_eq!(diags.error_count(), 1);
    }

    #[test]
    fn bracketed_placeholder_is_substituted_like_any_other() {
        let body = "* extension[{sliceName}].url = \"http://example.com\"\n* {sliceName}.value = {value}\n";
        let substituted = substitute_params(
            body,
            &["sliceName".to_string(), "value".to_string()],
            &["mySlice".to_string(), "\"test\"".to_string()],
        );
        assert!(substituted.contains("extension[mySlice]"));
        assert!(substituted.contains("mySlice.value = \"test\""));
    }

    #[test]
    fn splits_top_level_commas_only() {
        let args = split_arguments("\"a, b\", Coding(sys, code)");
        assert_eq!(args, vec!["\"a, b\"".to_string(), "Coding(sys, code)".to_string()]);
    }
}
