//! `SQLite` schema for the shared document store.

/// Documents keyed by slash-separated path, values stored as JSON text.
pub const CREATE_DOCUMENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS documents (
    path TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
";

/// Upgrade steps in order. Step `n` takes the file from version `n` to
/// version `n + 1`; steps are never edited once released.
pub const STEPS: &[&str] = &[CREATE_DOCUMENTS_TABLE];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documents_table_columns() {
        assert!(CREATE_DOCUMENTS_TABLE.contains("path TEXT PRIMARY KEY"));
        assert!(CREATE_DOCUMENTS_TABLE.contains("value TEXT NOT NULL"));
        assert!(CREATE_DOCUMENTS_TABLE.contains("updated_at TEXT NOT NULL"));
    }

    #[test]
    fn test_first_step_creates_documents() {
        assert_eq!(STEPS.first(), Some(&CREATE_DOCUMENTS_TABLE));
    }
}
