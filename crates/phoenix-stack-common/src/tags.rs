//! Resource tag constants for phoenix-stack
//!
//! Every materialized resource carries these tags so a stack's resources can
//! be discovered and torn down even without the process that created them.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `phoenix-stack:tool` | Static identifier ("phoenix-stack") |
//! | `phoenix-stack:stack` | Stack name |
//! | `phoenix-stack:logical-id` | Node id in the declared graph |
//! | `phoenix-stack:created-at` | RFC 3339 creation timestamp |

use std::collections::BTreeMap;

/// Tag key for tool identification
pub const TAG_TOOL: &str = "phoenix-stack:tool";

/// Tag value for tool identification
pub const TAG_TOOL_VALUE: &str = "phoenix-stack";

/// Tag key for the owning stack
pub const TAG_STACK: &str = "phoenix-stack:stack";

/// Tag key for the logical node id
pub const TAG_LOGICAL_ID: &str = "phoenix-stack:logical-id";

/// Tag key for creation timestamp (RFC 3339 format)
pub const TAG_CREATED_AT: &str = "phoenix-stack:created-at";

/// Helper to format creation timestamp for tags
pub fn format_created_at(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339()
}

/// Standard tag set for a resource created now
pub fn standard_tags(stack: &str, logical_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (TAG_TOOL.to_string(), TAG_TOOL_VALUE.to_string()),
        (TAG_STACK.to_string(), stack.to_string()),
        (TAG_LOGICAL_ID.to_string(), logical_id.to_string()),
        (
            TAG_CREATED_AT.to_string(),
            format_created_at(chrono::Utc::now()),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    #[test]
    fn test_created_at_is_rfc3339() {
        let now = Utc::now();
        let parsed = DateTime::parse_from_rfc3339(&format_created_at(now)).unwrap();
        let diff = (now - parsed.with_timezone(&Utc)).num_seconds().abs();
        assert!(diff <= 1, "Roundtrip diff {} > 1 second", diff);
    }

    #[test]
    fn test_standard_tags() {
        let tags = standard_tags("phoenix-demo", "Database");
        assert_eq!(tags.get(TAG_TOOL).map(String::as_str), Some(TAG_TOOL_VALUE));
        assert_eq!(tags.get(TAG_STACK).map(String::as_str), Some("phoenix-demo"));
        assert_eq!(tags.get(TAG_LOGICAL_ID).map(String::as_str), Some("Database"));
        assert!(DateTime::parse_from_rfc3339(&tags[TAG_CREATED_AT]).is_ok());
    }
}
