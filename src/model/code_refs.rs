//! Name-based references embedded in code and text fields.
//!
//! Code fields refer to named entities with `${prefix:Name}` placeholders,
//! e.g. `${token:Brand}` or `${prop:title}`. Renaming an entity must rewrite
//! these placeholders, since they are resolved by name rather than identity.

use std::collections::BTreeMap;

use super::value::Value;

/// A `${prefix:name}` occurrence inside a string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeRef<'a> {
    /// Reference scope, e.g. `token`.
    pub prefix: &'a str,
    /// Referenced entity name.
    pub name: &'a str,
}

/// Find every well-formed `${prefix:name}` in `code`, in order.
#[must_use]
pub fn scan(code: &str) -> Vec<CodeRef<'_>> {
    let mut out = Vec::new();
    let mut rest = code;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else { break };
        let body = &after[..end];
        if let Some((prefix, name)) = body.split_once(':')
            && !prefix.is_empty()
            && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !name.is_empty()
        {
            out.push(CodeRef { prefix, name });
        }
        rest = &after[end + 1..];
    }
    out
}

/// Format a reference placeholder.
#[must_use]
pub fn format_ref(prefix: &str, name: &str) -> String {
    format!("${{{prefix}:{name}}}")
}

/// Rewrite `${prefix:old}` to `${prefix:new}` in `code`.
/// Returns `None` when nothing matched.
#[must_use]
pub fn rewrite(code: &str, prefix: &str, old: &str, new: &str) -> Option<String> {
    let needle = format_ref(prefix, old);
    if !code.contains(&needle) {
        return None;
    }
    Some(code.replace(&needle, &format_ref(prefix, new)))
}

/// Rewrite references inside a code-bearing value: strings, and string values
/// of maps. Returns the rewritten value when anything changed.
#[must_use]
pub fn rewrite_value(value: &Value, prefix: &str, old: &str, new: &str) -> Option<Value> {
    match value {
        Value::Str(s) => rewrite(s, prefix, old, new).map(Value::Str),
        Value::Map(entries) => {
            let mut changed = false;
            let rewritten: BTreeMap<String, Value> = entries
                .iter()
                .map(|(k, v)| match rewrite_value(v, prefix, old, new) {
                    Some(nv) => {
                        changed = true;
                        (k.clone(), nv)
                    }
                    None => (k.clone(), v.clone()),
                })
                .collect();
            changed.then_some(Value::Map(rewritten))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_finds_references() {
        let refs = scan("color: ${token:Brand Blue}; ${mixin:Card} ${bad} ${:x}");
        assert_eq!(
            refs,
            vec![
                CodeRef {
                    prefix: "token",
                    name: "Brand Blue"
                },
                CodeRef {
                    prefix: "mixin",
                    name: "Card"
                },
            ]
        );
    }

    #[test]
    fn scan_tolerates_unterminated() {
        assert!(scan("${token:Brand").is_empty());
    }

    #[test]
    fn rewrite_only_touches_matching_prefix() {
        let code = "${token:Brand} ${mixin:Brand} ${token:Brandy}";
        let out = rewrite(code, "token", "Brand", "Brand 2").unwrap();
        assert_eq!(out, "${token:Brand 2} ${mixin:Brand} ${token:Brandy}");
        assert!(rewrite(code, "image", "Brand", "x").is_none());
    }

    #[test]
    fn rewrite_value_walks_maps() {
        let mut rules = BTreeMap::new();
        rules.insert("color".to_owned(), Value::from("${token:A}"));
        rules.insert("width".to_owned(), Value::from("10px"));
        let out = rewrite_value(&Value::Map(rules), "token", "A", "A 2").unwrap();
        let m = out.as_map().unwrap();
        assert_eq!(m["color"], Value::from("${token:A 2}"));
        assert_eq!(m["width"], Value::from("10px"));
        assert!(rewrite_value(&Value::Int(3), "token", "A", "B").is_none());
    }
}
