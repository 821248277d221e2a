//! `$prev` parameter binding.
//!
//! A string parameter may reference the previous instruction's output:
//!
//! - `$prev` is the whole previous value;
//! - `$prev.key.sub` walks object keys;
//! - `$prev.items[0][1]` indexes arrays (negative indices count from the end).
//!
//! A string that is exactly one reference is replaced by the referenced
//! value with its JSON type intact (null when it does not resolve). A
//! reference embedded in a longer string is replaced by its text form:
//! strings verbatim, other values as JSON. Embedded references that do not
//! resolve are left as written.
//!
//! References are parsed into a small path AST and evaluated separately;
//! nothing is ever executed.

use agentx_core::handler::Params;
use serde_json::Value;

const PREFIX: &str = "$prev";

/// One `.key[i][j]` hop. The leading hop of `$prev[0]` has no key.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub key: Option<String>,
    pub indices: Vec<i64>,
}

/// A parsed `$prev...` path.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reference {
    pub segments: Vec<Segment>,
}

impl Reference {
    /// Parse a string that consists of exactly one reference.
    pub fn parse(text: &str) -> Option<Self> {
        match Self::parse_prefix(text) {
            Some((reference, consumed)) if consumed == text.len() => Some(reference),
            _ => None,
        }
    }

    /// Parse the longest reference at the start of `text`, returning it and
    /// the number of bytes consumed.
    pub fn parse_prefix(text: &str) -> Option<(Self, usize)> {
        let rest = text.strip_prefix(PREFIX)?;
        let bytes = rest.as_bytes();
        if bytes.first().is_some_and(|b| is_ident(*b)) {
            // `$previous` is plain text.
            return None;
        }

        let mut pos = 0;
        let mut segments = Vec::new();
        let mut leading = Segment { key: None, indices: Vec::new() };
        pos += parse_indices(&bytes[pos..], &mut leading.indices);
        if !leading.indices.is_empty() {
            segments.push(leading);
        }

        while bytes.get(pos) == Some(&b'.') {
            let key_len = bytes[pos + 1..].iter().take_while(|b| is_ident(**b)).count();
            if key_len == 0 {
                break;
            }
            let key = &rest[pos + 1..pos + 1 + key_len];
            pos += 1 + key_len;
            let mut segment = Segment {
                key: Some(key.to_string()),
                indices: Vec::new(),
            };
            pos += parse_indices(&bytes[pos..], &mut segment.indices);
            segments.push(segment);
        }

        Some((Self { segments }, PREFIX.len() + pos))
    }

    /// Walk the path from `root`. Any failed lookup yields `None`.
    pub fn evaluate(&self, root: &Value) -> Option<Value> {
        let mut current = root;
        for segment in &self.segments {
            if let Some(key) = &segment.key {
                current = current.as_object()?.get(key)?;
            }
            for &index in &segment.indices {
                let items = current.as_array()?;
                let index = if index < 0 {
                    items.len().checked_sub(index.unsigned_abs() as usize)?
                } else {
                    index as usize
                };
                current = items.get(index)?;
            }
        }
        Some(current.clone())
    }
}

/// Consume `[n]` groups; returns bytes consumed.
fn parse_indices(bytes: &[u8], out: &mut Vec<i64>) -> usize {
    let mut pos = 0;
    while bytes.get(pos) == Some(&b'[') {
        let mut end = pos + 1;
        if bytes.get(end) == Some(&b'-') {
            end += 1;
        }
        let digits = bytes[end..].iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 || bytes.get(end + digits) != Some(&b']') {
            break;
        }
        let Some(index) = std::str::from_utf8(&bytes[pos + 1..end + digits])
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
        else {
            break;
        };
        out.push(index);
        pos = end + digits + 1;
    }
    pos
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Resolve every `$prev` reference inside a parameter map.
pub fn resolve_params(params: &Params, root: Option<&Value>) -> Params {
    params
        .iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, root)))
        .collect()
}

/// Resolve references inside one value, recursing through arrays and
/// object values. Keys are never rewritten.
pub fn resolve_value(value: &Value, root: Option<&Value>) -> Value {
    match value {
        Value::String(s) => resolve_string(s, root),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, root)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, root)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(text: &str, root: Option<&Value>) -> Value {
    if !text.contains(PREFIX) {
        return Value::String(text.to_string());
    }
    if let Some(reference) = Reference::parse(text) {
        return lookup(&reference, root).unwrap_or(Value::Null);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find(PREFIX) {
        out.push_str(&rest[..at]);
        let candidate = &rest[at..];
        match Reference::parse_prefix(candidate) {
            Some((reference, consumed)) => {
                let written = &candidate[..consumed];
                match lookup(&reference, root) {
                    Some(Value::String(s)) => out.push_str(&s),
                    Some(value) => out.push_str(&value.to_string()),
                    None => out.push_str(written),
                }
                rest = &candidate[consumed..];
            }
            None => {
                out.push_str(PREFIX);
                rest = &candidate[PREFIX.len()..];
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

/// Evaluate against the root; a JSON null counts as unresolved.
fn lookup(reference: &Reference, root: Option<&Value>) -> Option<Value> {
    root.and_then(|root| reference.evaluate(root))
        .filter(|value| !value.is_null())
}
