//! Resolution of `sz://core-settings/<path>` indirect configuration values.
//!
//! Any URI-shaped option (`database-uri`, `sqs-info-uri`, `rabbit-info-uri`)
//! may be written this way instead of literally, so a single `core-settings`
//! JSON document can be the one place secrets live. Resolution walks the
//! JSON tree following `/`-separated path segments; a segment that parses as
//! an integer indexes into an array, otherwise it looks up an object key.

use derive_more::{Display, Error};
use serde_json::Value;

pub const SCHEME: &str = "sz";
pub const AUTHORITY: &str = "core-settings";

#[derive(Debug, Display, Error)]
pub enum IllegalArgument {
    #[display("value is not an `sz://core-settings/...` indirection")]
    NotIndirect,
    #[display("core-settings path segment {_0:?} has no corresponding object key or array index")]
    PathNotFound(#[error(not(source))] String),
    #[display("core-settings path resolved to a non-string value")]
    NotAString,
}

/// Returns `Some(path)` if `value` has the form `sz://core-settings/<path>`.
#[must_use]
pub fn indirect_path(value: &str) -> Option<&str> {
    let rest = value.strip_prefix("sz://")?;
    let rest = rest.strip_prefix(AUTHORITY)?;
    rest.strip_prefix('/')
}

/// Resolves a `/`-separated path against `core_settings`, returning the
/// string found at that location.
pub fn resolve(core_settings: &Value, path: &str) -> Result<String, IllegalArgument> {
    let mut current = core_settings;
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        current = if let Ok(index) = segment.parse::<usize>() {
            current
                .get(index)
                .ok_or_else(|| IllegalArgument::PathNotFound(segment.to_owned()))?
        } else {
            current
                .get(segment)
                .ok_or_else(|| IllegalArgument::PathNotFound(segment.to_owned()))?
        };
    }
    current
        .as_str()
        .map(str::to_owned)
        .ok_or(IllegalArgument::NotAString)
}

/// Resolves `value` if it is an indirection, otherwise returns it unchanged.
pub fn resolve_if_indirect(value: &str, core_settings: Option<&Value>) -> Result<String, IllegalArgument> {
    match indirect_path(value) {
        Some(path) => {
            let core_settings = core_settings.ok_or(IllegalArgument::NotIndirect)?;
            resolve(core_settings, path)
        }
        None => Ok(value.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_object_and_array_segments() {
        let settings = json!({
            "databases": [
                {"uri": "postgresql://u:p@host:5432/db"},
            ],
        });
        let resolved = resolve(&settings, "databases/0/uri").unwrap();
        assert_eq!(resolved, "postgresql://u:p@host:5432/db");
    }

    #[test]
    fn non_indirect_values_pass_through() {
        assert_eq!(
            resolve_if_indirect("postgresql://u:p@host:5432/db", None).unwrap(),
            "postgresql://u:p@host:5432/db"
        );
    }

    #[test]
    fn missing_path_segment_is_reported() {
        let settings = json!({"a": {}});
        assert!(matches!(
            resolve(&settings, "a/b"),
            Err(IllegalArgument::PathNotFound(_))
        ));
    }
}
