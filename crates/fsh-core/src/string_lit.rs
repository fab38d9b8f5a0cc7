//! String literal resolution: escape sequences and triple-quote dedent.
//!
//! Kept separate from the lexer because both the lexer's string tokens and
//! rule-set argument substitution (which re-lexes substituted text) need
//! the exact same resolution rules.

/// Resolve a lexed string token's raw text (including its quotes) into the
/// literal value: escapes are processed, line endings normalized to LF,
/// and triple-quoted strings are dedented when every non-blank line shares
/// a common leading-whitespace prefix.
pub fn resolve_string_literal(raw: &str) -> String {
    if let Some(inner) = raw
        .strip_prefix("\"\"\"")
        .and_then(|s| s.strip_suffix("\"\"\""))
    {
        resolve_triple(inner)
    } else if let Some(inner) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        resolve_escapes(inner)
    } else {
        resolve_escapes(raw)
    }
}

pub fn resolve_unit_literal(raw: &str) -> String {
    let inner = raw
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(raw);
    resolve_escapes(inner)
}

fn normalize_newlines(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

fn resolve_triple(inner: &str) -> String {
    let normalized = normalize_newlines(inner);
    let dedented = dedent(&normalized);
    resolve_escapes(&dedented)
}

/// Strips the longest common leading-whitespace prefix shared by every
/// non-blank line. Leaves the text untouched if no such prefix exists
/// (including the all-blank-interior case named in spec §8).
fn dedent(s: &str) -> String {
    let lines: Vec<&str> = s.split('\n').collect();
    let common = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| leading_whitespace_len(line))
        .min();

    let common = match common {
        Some(n) if n > 0 => n,
        _ => return s.to_string(),
    };

    // Verify it really is a *common* prefix (same literal chars), not just
    // the same length.
    let prefix: Vec<&str> = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| &line[..common.min(line.len())])
        .collect();
    if let Some(first) = prefix.first() {
        if !prefix.iter().all(|p| p == first) {
            return s.to_string();
        }
    } else {
        return s.to_string();
    }

    lines
        .iter()
        .map(|line| {
            if line.trim().is_empty() {
                line.trim_end().to_string()
            } else {
                line[common.min(line.len())..].to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string()
}

fn leading_whitespace_len(s: &str) -> usize {
    s.len() - s.trim_start_matches([' ', '\t']).len()
}

fn resolve_escapes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut pending_high_surrogate: Option<u32> = None;

    while let Some(c) = chars.next() {
        if c != '\\' {
            if let Some(high) = pending_high_surrogate.take() {
                push_unpaired_surrogate(&mut out, high);
            }
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some('n') => {
                chars.next();
                out.push('\n');
            }
            Some('t') => {
                chars.next();
                out.push('\t');
            }
            Some('r') => {
                chars.next();
                out.push('\r');
            }
            Some('\\') => {
                chars.next();
                out.push('\\');
            }
            Some('"') => {
                chars.next();
                out.push('"');
            }
            Some('\'') => {
                chars.next();
                out.push('\'');
            }
            Some('u') => {
                chars.next();
                let hex: String = (0..4).filter_map(|_| chars.next()).collect();
                match u32::from_str_radix(&hex, 16) {
                    Ok(code) => {
                        if (0xD800..=0xDBFF).contains(&code) {
                            if let Some(high) = pending_high_surrogate.take() {
                                push_unpaired_surrogate(&mut out, high);
                            }
                            pending_high_surrogate = Some(code);
                        } else if (0xDC00..=0xDFFF).contains(&code) {
                            if let Some(high) = pending_high_surrogate.take() {
                                let combined = 0x10000
                                    + (high - 0xD800) * 0x400
                                    + (code - 0xDC00);
                                if let Some(ch) = char::from_u32(combined) {
                                    out.push(ch);
                                }
                            } else {
                                push_unpaired_surrogate(&mut out, code);
                            }
                        } else {
                            if let Some(high) = pending_high_surrogate.take() {
                                push_unpaired_surrogate(&mut out, high);
                            }
                            if let Some(ch) = char::from_u32(code) {
                                out.push(ch);
                            }
                        }
                    }
                    Err(_) => {
                        // Invalid escape: preserve literally.
                        out.push('\\');
                        out.push('u');
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => {
                // Unknown escape: preserved literally, backslash and all.
                out.push('\\');
                out.push(*other);
                chars.next();
            }
            None => out.push('\\'),
        }
    }

    if let Some(high) = pending_high_surrogate.take() {
        push_unpaired_surrogate(&mut out, high);
    }

    out
}

fn push_unpaired_surrogate(out: &mut String, code: u32) {
    out.push('\u{FFFD}');
    let _ = code;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_basic_escapes() {
        assert_eq!(resolve_string_literal("\"a\\nb\\tc\""), "a\nb\tc");
    }

    #[test]
    fn resolves_unicode_escape() {
        assert_eq!(resolve_string_literal("\"\\u0041\""), "A");
    }

    #[test]
    fn resolves_surrogate_pair() {
        // U+1F600 GRINNING FACE
        assert_eq!(resolve_string_literal("\"\\ud83d\\ude00\""), "\u{1F600}");
    }

    #[test]
    fn preserves_invalid_escape_literally() {
        assert_eq!(resolve_string_literal("\"a\\qb\""), "a\\qb");
    }

    #[test]
    fn dedents_common_indentation() {
        let raw = "\"\"\"\n  line one\n  line two\n  \"\"\"";
        assert_eq!(resolve_string_literal(raw), "line one\nline two");
    }

    #[test]
    fn leaves_uncommon_indentation_alone() {
        let raw = "\"\"\"\n  line one\nline two\n\"\"\"";
        let resolved = resolve_string_literal(raw);
        assert!(resolved.contains("  line one"));
    }
}
