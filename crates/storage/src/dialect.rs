#![forbid(unsafe_code)]

/// Quotes an identifier for SQLite. `group` and `resource` are reserved on
/// other backends, so the schema and every query quote them.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Current wall-clock time in microseconds since the unix epoch, as seen by the database.
pub(crate) const CURRENT_EPOCH_MICROS_SQL: &str =
    "SELECT CAST((julianday('now') - 2440587.5) * 86400000000 AS INTEGER)";

/// `?N, ?N+1, ...` placeholders for an `IN (...)` list.
pub(crate) fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_double_quoted() {
        assert_eq!(quote_ident("group"), "\"group\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn placeholders_are_numbered_from_start() {
        assert_eq!(placeholders(3, 3), "?3, ?4, ?5");
        assert_eq!(placeholders(1, 0), "");
    }
}
