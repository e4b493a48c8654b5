//! redb table definitions.
//!
//! Both tables use `&str` keys and `&[u8]` values (JSON-serialized
//! domain types). History keys embed the timestamp zero-padded to 20
//! digits so lexicographic key order equals chronological order and
//! ranged scans stay cheap.

use redb::TableDefinition;

/// Enrollments keyed by app id.
pub const APPLICATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("applications");

/// Scaling history keyed by `{app_id}:{timestamp:020}`.
pub const SCALING_HISTORIES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("scaling_histories");
