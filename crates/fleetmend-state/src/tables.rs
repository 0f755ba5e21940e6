//! redb table definitions for the FleetMend record store.

use redb::TableDefinition;

/// Remediation records keyed by instance id, JSON-serialized.
pub const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("remediation_records");
