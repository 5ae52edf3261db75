use serde_json::{Map, Value};

/// Resolves a dotted path such as `user.profile.email` or `files.0.name`
/// against a context map.
///
/// Bracket indices (`files[0].name`) are accepted too. A leading `context.`
/// segment is skipped unless the context has an entry literally named
/// `context`. Missing segments yield `None`; this never fails.
pub fn lookup_path<'a>(path: &str, context: &'a Map<String, Value>) -> Option<&'a Value> {
    let normalized = path.replace('[', ".").replace(']', "");
    let mut segments = normalized.split('.').filter(|s| !s.is_empty()).peekable();

    if segments.peek() == Some(&"context") && !context.contains_key("context") {
        segments.next();
    }

    let first = segments.next()?;
    let mut current = context.get(first)?;
    for segment in segments {
        current = step(current, segment)?;
    }
    Some(current)
}

/// One path segment: object key, or array index for numeric segments.
pub(crate) fn step<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}
