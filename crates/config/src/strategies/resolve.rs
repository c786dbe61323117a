//! Placeholder resolution over configuration trees
//!
//! Strings may reference other paths of the same tree:
//!
//! - `${db.host}` is replaced by the value at `db.host`;
//! - `${db.port:5432}` falls back to the literal `5432` when the path is absent;
//! - `$${` is an escaped, literal `${`.
//!
//! A string that is exactly one placeholder takes the referenced value with
//! its type (number, map, ...). Placeholders embedded in longer strings are
//! replaced by the scalar rendered as text. References may chain; cycles and
//! absent references without a default fail the whole pass.

use crate::core::path;
use crate::core::{ConfigError, ConfigResult, ValueKind};
use serde_json::Value;
use std::sync::Arc;

/// Resolve strategy: rewrite placeholders in place.
pub type ResolveFn = Arc<dyn Fn(&mut Value) -> ConfigResult<()> + Send + Sync>;

/// Chains longer than this are reported as unresolvable.
const MAX_DEPTH: usize = 32;

/// Resolver that leaves the tree untouched
pub fn noop_resolver(_tree: &mut Value) -> ConfigResult<()> {
    Ok(())
}

/// Resolve `${path}` and `${path:default}` placeholders.
///
/// The tree is only rewritten if every placeholder resolves.
pub fn placeholder_resolver(tree: &mut Value) -> ConfigResult<()> {
    let resolved = resolve_node(tree.clone(), tree, &mut Vec::new())?;
    *tree = resolved;
    Ok(())
}

enum Segment<'a> {
    Literal(&'a str),
    Reference {
        path: &'a str,
        default: Option<&'a str>,
    },
}

fn parse(input: &str) -> ConfigResult<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = input;

    while let Some(start) = rest.find('$') {
        let after = &rest[start..];
        if after.starts_with("$${") {
            segments.push(Segment::Literal(&rest[..start]));
            segments.push(Segment::Literal("${"));
            rest = &after[3..];
        } else if let Some(body) = after.strip_prefix("${") {
            segments.push(Segment::Literal(&rest[..start]));
            let end = body
                .find('}')
                .ok_or_else(|| ConfigError::resolution(input, "unterminated placeholder"))?;
            let (path, default) = match body[..end].split_once(':') {
                Some((path, default)) => (path.trim(), Some(default)),
                None => (body[..end].trim(), None),
            };
            if path.is_empty() {
                return Err(ConfigError::resolution(input, "empty placeholder"));
            }
            segments.push(Segment::Reference { path, default });
            rest = &body[end + 1..];
        } else {
            segments.push(Segment::Literal(&rest[..=start]));
            rest = &after[1..];
        }
    }
    segments.push(Segment::Literal(rest));
    segments.retain(|s| !matches!(s, Segment::Literal("")));

    Ok(segments)
}

fn resolve_node(node: Value, root: &Value, stack: &mut Vec<String>) -> ConfigResult<Value> {
    match node {
        Value::String(s) if s.contains('$') => resolve_string(&s, root, stack),
        Value::Array(items) => items
            .into_iter()
            .map(|item| resolve_node(item, root, stack))
            .collect::<ConfigResult<Vec<_>>>()
            .map(Value::Array),
        Value::Object(fields) => fields
            .into_iter()
            .map(|(key, item)| resolve_node(item, root, stack).map(|v| (key, v)))
            .collect::<ConfigResult<serde_json::Map<_, _>>>()
            .map(Value::Object),
        other => Ok(other),
    }
}

fn resolve_string(input: &str, root: &Value, stack: &mut Vec<String>) -> ConfigResult<Value> {
    let segments = parse(input)?;

    if let [Segment::Reference { path, default }] = segments.as_slice() {
        return resolve_reference(path, *default, root, stack);
    }

    let mut out = String::with_capacity(input.len());
    for segment in &segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Reference { path, default } => {
                match resolve_reference(path, *default, root, stack)? {
                    Value::String(s) => out.push_str(&s),
                    Value::Null => {}
                    Value::Bool(b) => out.push_str(if b { "true" } else { "false" }),
                    Value::Number(n) => out.push_str(&n.to_string()),
                    other => {
                        return Err(ConfigError::resolution(
                            *path,
                            format!("cannot embed {} in a string", ValueKind::of(&other)),
                        ));
                    }
                }
            }
        }
    }
    Ok(Value::String(out))
}

fn resolve_reference(
    reference: &str,
    default: Option<&str>,
    root: &Value,
    stack: &mut Vec<String>,
) -> ConfigResult<Value> {
    if stack.iter().any(|p| p == reference) {
        let mut chain = stack.join(" -> ");
        chain.push_str(" -> ");
        chain.push_str(reference);
        return Err(ConfigError::resolution(
            reference,
            format!("cyclic reference: {chain}"),
        ));
    }
    if stack.len() >= MAX_DEPTH {
        return Err(ConfigError::resolution(
            reference,
            format!("reference chain deeper than {MAX_DEPTH}"),
        ));
    }

    match path::get(root, reference) {
        Some(target) => {
            stack.push(reference.to_string());
            let resolved = resolve_node(target.clone(), root, stack);
            stack.pop();
            resolved
        }
        None => default
            .map(|d| Value::String(d.to_string()))
            .ok_or_else(|| ConfigError::resolution(reference, "reference not found")),
    }
}
