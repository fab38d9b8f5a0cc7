//! Soft-index resolution (spec §3, §4.2, §8 scenario 4).
//!
//! Runs as an explicit second pass over one entity's already-collected
//! rules, in document order. For every `[+]`/`[=]` bracket on every path
//! step, a per-parent-path-prefix counter is consulted: `[+]` allocates the
//! next integer and advances the counter, `[=]` reuses the counter's
//! current value without advancing it, and a literal numeric index at a
//! prefix resets that prefix's counter to the index seen (so a later `[+]`
//! at the same prefix continues from there).
//!
//! Kept as its own pass rather than folded into the parser because the
//! parser sees only one line at a time and counters must survive across
//! an entity's whole rule sequence.

use std::collections::HashMap;

use crate::model::{Bracket, Path, Rule};

#[derive(Default)]
struct Counters {
    by_prefix: HashMap<String, u32>,
}

impl Counters {
    fn next(&mut self, prefix: &str) -> u32 {
        let counter = self.by_prefix.entry(prefix.to_string()).or_insert(0);
        let assigned = *counter;
        *counter += 1;
        assigned
    }

    fn current(&mut self, prefix: &str) -> u32 {
        *self.by_prefix.entry(prefix.to_string()).or_insert(0)
    }

    fn reset(&mut self, prefix: &str, to: u32) {
        self.by_prefix.insert(prefix.to_string(), to + 1);
    }
}

fn resolve_path(path: &mut Path, counters: &mut Counters) {
    for i in 0..path.steps.len() {
        let prefix = path.counter_prefix(i);
        let step = &mut path.steps[i];
        match &step.bracket {
            Some(Bracket::SoftNew) => {
                step.resolved_index = Some(counters.next(&prefix));
            }
            Some(Bracket::SoftReuse) => {
                let current = counters.current(&prefix);
                step.resolved_index = Some(if current == 0 { 0 } else { current - 1 });
            }
            Some(Bracket::Index(n)) => {
                counters.reset(&prefix, *n);
            }
            _ => {}
        }
    }
}

/// Resolve every soft index across one entity's rule sequence, in document
/// order. Counters are local to this call — they never leak across
/// entities.
pub fn resolve_entity_rules(rules: &mut [Rule]) {
    let mut counters = Counters::default();
    for rule in rules.iter_mut() {
        if let Some(path) = rule.path_mut() {
            resolve_path(path, &mut counters);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Location;
    use crate::model::{Bracket, CardRule, PathRule, PathStep};

    fn step(name: &str, bracket: Option<Bracket>) -> PathStep {
        PathStep {
            name: name.to_string(),
            bracket,
            resolved_index: None,
        }
    }

    fn path_rule(steps: Vec<PathStep>) -> Rule {
        Rule::Path(PathRule {
            path: Path { steps },
            location: Location::new(None, 0, 0),
        })
    }

    #[test]
    fn soft_indices_mix_with_numeric() {
        // item[+].item[+].item[0]   -> item[0].item[0].item[0]
        // item[0].item[+].item[+]   -> item[0].item[1].item[0]
        // item[=].item[2].item[+]   -> item[0].item[2].item[0]
        // item[=].item[=].item[1]   -> item[0].item[2].item[1]
        let mut rules = vec![
            path_rule(vec![
                step("item", Some(Bracket::SoftNew)),
                step("item", Some(Bracket::SoftNew)),
                step("item", Some(Bracket::Index(0))),
            ]),
            path_rule(vec![
                step("item", Some(Bracket::Index(0))),
                step("item", Some(Bracket::SoftNew)),
                step("item", Some(Bracket::SoftNew)),
            ]),
            path_rule(vec![
                step("item", Some(Bracket::SoftReuse)),
                step("item", Some(Bracket::Index(2))),
                step("item", Some(Bracket::SoftNew)),
            ]),
            path_rule(vec![
                step("item", Some(Bracket::SoftReuse)),
                step("item", Some(Bracket::SoftReuse)),
                step("item", Some(Bracket::Index(1))),
            ]),
        ];
        resolve_entity_rules(&mut rules);

        let resolved: Vec<Vec<Option<u32>>> = rules
            .iter()
            .map(|r| {
                r.path()
                    .unwrap()
                    .steps
                    .iter()
                    .map(|s| s.effective_index())
                    .collect()
            })
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

    #[test]
    fn distinct_numeric_branches_of_the_same_repeating_element_get_distinct_counters() {
        // item[0].sub[+] then item[1].sub[+] -> item[0].sub[0], item[1].sub[0]
        // (each `item` branch starts its own `sub` counter at 0, rather than
        // the second branch's `[+]` continuing the first branch's counter).
        let mut rules = vec![
            path_rule(vec![
                step("item", Some(Bracket::Index(0))),
                step("sub", Some(Bracket::SoftNew)),
            ]),
            path_rule(vec![
                step("item", Some(Bracket::Index(1))),
                step("sub", Some(Bracket::SoftNew)),
            ]),
        ];
        resolve_entity_rules(&mut rules);

        let resolved: Vec<Vec<Option<u32>>> = rules
            .iter()
            .map(|r| {
                r.path()
                    .unwrap()
                    .steps
                    .iter()
                    .map(|s| s.effective_index())
                    .collect()
            })
            .collect();

        assert_eq!(
            resolved,
            vec![vec![Some(0), Some(0)], vec![Some(1), Some(0)]]
        );
    }

    #[test]
    fn card_rule_path_is_resolved_too() {
        let mut rules = vec![Rule::Card(CardRule {
            path: Path {
                steps: vec![step("item", Some(Bracket::SoftNew))],
            },
            min: Some(1),
            max: None,
            location: Location::new(None, 0, 0),
        })];
        resolve_entity_rules(&mut rules);
        assert_eq!(rules[0].path().unwrap().steps[0].effective_index(), Some(0));
    }
}
