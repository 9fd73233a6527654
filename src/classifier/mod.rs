//! Query Classification
//!
//! Pure, stateless classification of raw SQL text. Every decision the
//! connection manager makes about a statement is derived from the facts
//! computed here:
//! - the [`QueryType`] tag of the leading keyword
//! - whether that tag is read-only
//! - whether the statement is dangerous DDL / privilege management
//! - whether the statement touches sensitive server metadata
//! - whether the text carries more than one statement
//!
//! Classification is prefix and substring matching on the upper-cased text.
//! It never fails: unrecognized statements are tagged [`QueryType::Unknown`].
//!
//! # Executable Comments
//!
//! MySQL runs the body of `/*! ... */` and MariaDB runs `/*M! ... */`, so
//! neither is ever skipped as a comment. A statement opening with one is
//! tagged [`QueryType::Unknown`] and counts as dangerous text.

use serde::Serialize;
use std::fmt;

use crate::error::{Result, WardenError};

/// Statement kind derived from the leading keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    Alter,
    Show,
    Describe,
    Explain,
    Drop,
    Truncate,
    Create,
    Grant,
    Revoke,
    Set,
    Use,
    Unknown,
}

impl QueryType {
    /// Stable upper-case label used in error messages and logs
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Alter => "ALTER",
            Self::Show => "SHOW",
            Self::Describe => "DESCRIBE",
            Self::Explain => "EXPLAIN",
            Self::Drop => "DROP",
            Self::Truncate => "TRUNCATE",
            Self::Create => "CREATE",
            Self::Grant => "GRANT",
            Self::Revoke => "REVOKE",
            Self::Set => "SET",
            Self::Use => "USE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// "DESC " keeps its trailing space so it never claims DELETE statements.
const TYPE_PREFIXES: &[(&str, QueryType)] = &[
    ("SELECT", QueryType::Select),
    ("INSERT", QueryType::Insert),
    ("UPDATE", QueryType::Update),
    ("DELETE", QueryType::Delete),
    ("ALTER", QueryType::Alter),
    ("SHOW", QueryType::Show),
    ("DESCRIBE", QueryType::Describe),
    ("DESC ", QueryType::Describe),
    ("EXPLAIN", QueryType::Explain),
    ("DROP", QueryType::Drop),
    ("TRUNCATE", QueryType::Truncate),
    ("CREATE", QueryType::Create),
    ("GRANT", QueryType::Grant),
    ("REVOKE", QueryType::Revoke),
    ("SET", QueryType::Set),
    ("USE", QueryType::Use),
];

const DANGEROUS_PREFIXES: &[&str] = &["DROP", "ALTER", "TRUNCATE", "CREATE", "GRANT", "REVOKE"];

const SENSITIVE_PATTERNS: &[&str] = &[
    "SHOW GRANTS",
    "MYSQL.USER",
    "USER_PRIVILEGES",
    "SHOW PROCESSLIST",
    "SHOW FULL PROCESSLIST",
];

/// Phrases that stay blocked inside ALTER statements
pub const ALTER_BLOCKED_PHRASES: &[&str] =
    &["DROP DATABASE", "DROP SCHEMA", "TRUNCATE", "CREATE DATABASE", "GRANT", "REVOKE"];

/// Detect the statement kind from its leading keyword
///
/// Whitespace and leading comments are skipped; matching is case-insensitive.
#[must_use]
pub fn detect_type(sql: &str) -> QueryType {
    let normalized = normalize(sql);

    TYPE_PREFIXES
        .iter()
        .find(|(prefix, _)| normalized.starts_with(prefix))
        .map_or(QueryType::Unknown, |(_, query_type)| *query_type)
}

/// SELECT, SHOW, DESCRIBE and EXPLAIN are the only read-only kinds
#[must_use]
pub const fn is_read_only_type(query_type: QueryType) -> bool {
    matches!(
        query_type,
        QueryType::Select | QueryType::Show | QueryType::Describe | QueryType::Explain
    )
}

/// Dangerous kinds for the generic write path
///
/// ALTER is excluded here: it is only accepted through the dedicated alter
/// path, which applies its own blocklist.
#[must_use]
pub const fn is_dangerous_type(query_type: QueryType) -> bool {
    matches!(
        query_type,
        QueryType::Drop
            | QueryType::Truncate
            | QueryType::Create
            | QueryType::Grant
            | QueryType::Revoke
    )
}

/// Text-based dangerous check, including ALTER
///
/// A leading executable comment hides what the server will run and is
/// treated as dangerous.
#[must_use]
pub fn is_dangerous_text(sql: &str) -> bool {
    let normalized = normalize(sql);
    is_executable_comment(&normalized)
        || DANGEROUS_PREFIXES.iter().any(|prefix| normalized.starts_with(prefix))
}

/// True when the first token after whitespace and plain comments is an
/// executable comment
#[must_use]
pub fn starts_with_executable_comment(sql: &str) -> bool {
    is_executable_comment(skip_leading_comments(sql))
}

/// True when anything but whitespace and comments follows a top-level `;`
///
/// A single trailing terminator is accepted. The text is scanned twice, with
/// and without backslash escapes in string literals, and rejected when either
/// reading finds a second statement, so `NO_BACKSLASH_ESCAPES` cannot move a
/// string boundary past the check.
#[must_use]
pub fn has_multiple_statements(sql: &str) -> bool {
    scan_for_second_statement(sql.as_bytes(), true)
        || scan_for_second_statement(sql.as_bytes(), false)
}

/// Statements that read credentials, privileges or other sessions
///
/// Substring match over the whole statement, so subqueries are caught too.
#[must_use]
pub fn is_sensitive_text(sql: &str) -> bool {
    let upper = sql.to_uppercase();
    SENSITIVE_PATTERNS.iter().any(|pattern| upper.contains(pattern))
}

/// First ALTER blocklist phrase contained in the statement, if any
#[must_use]
pub fn alter_blocked_phrase(sql: &str) -> Option<&'static str> {
    let upper = sql.trim().to_uppercase();
    ALTER_BLOCKED_PHRASES.iter().copied().find(|phrase| upper.contains(phrase))
}

/// Check that the statement is one of the allowed kinds
///
/// # Errors
/// Returns `QueryTypeMismatch` naming the allowed labels (joined by `/`) and the
/// detected label.
pub fn validate_type(sql: &str, allowed: &[QueryType]) -> Result<()> {
    let detected = detect_type(sql);
    if allowed.contains(&detected) {
        return Ok(());
    }

    let expected = allowed.iter().map(QueryType::label).collect::<Vec<_>>().join("/");
    Err(WardenError::type_mismatch(expected, detected.label()))
}

/// All safety facts for one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub query_type: QueryType,
    pub read_only: bool,
    pub dangerous: bool,
    pub sensitive: bool,
}

/// Compute every classifier fact at once
#[must_use]
pub fn classify(sql: &str) -> Classification {
    let query_type = detect_type(sql);
    Classification {
        query_type,
        read_only: is_read_only_type(query_type),
        dangerous: is_dangerous_text(sql),
        sensitive: is_sensitive_text(sql),
    }
}

/// Trim, skip leading comments, upper-case
fn normalize(sql: &str) -> String {
    skip_leading_comments(sql).trim_end().to_uppercase()
}

/// Skip whitespace and any comments before the first keyword
///
/// Handles `-- line`, `# line` and `/* block */` comments. An unterminated
/// block comment consumes the rest of the text. Executable comments stop the
/// scan.
fn skip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();

    loop {
        if starts_line_comment(rest.as_bytes()) {
            rest = match rest.find('\n') {
                Some(pos) => rest[pos + 1..].trim_start(),
                None => "",
            };
        } else if is_executable_comment(rest) {
            return rest;
        } else if let Some(body) = rest.strip_prefix("/*") {
            rest = match body.find("*/") {
                Some(pos) => body[pos + 2..].trim_start(),
                None => "",
            };
        } else {
            return rest;
        }
    }
}

fn is_executable_comment(text: &str) -> bool {
    text.starts_with("/*!") || text.starts_with("/*M!") || text.starts_with("/*m!")
}

/// `#` always opens a line comment; `--` only when followed by whitespace,
/// a control character or the end of the text
fn starts_line_comment(bytes: &[u8]) -> bool {
    match bytes {
        [b'#', ..] | [b'-', b'-'] => true,
        [b'-', b'-', next, ..] => next.is_ascii_whitespace() || next.is_ascii_control(),
        _ => false,
    }
}

fn scan_for_second_statement(bytes: &[u8], backslash_escapes: bool) -> bool {
    let mut terminated = false;
    let mut i = 0;

    while i < bytes.len() {
        let rest = &bytes[i..];
        match bytes[i] {
            b';' => {
                terminated = true;
                i += 1;
            }
            b if b.is_ascii_whitespace() => i += 1,
            _ if starts_line_comment(rest) => {
                i += rest.iter().position(|&b| b == b'\n').map_or(rest.len(), |pos| pos + 1);
            }
            // Executable comment bodies are scanned as statement text
            b'/' if rest.starts_with(b"/*")
                && !rest.starts_with(b"/*!")
                && !rest.starts_with(b"/*M!")
                && !rest.starts_with(b"/*m!") =>
            {
                i += rest[2..]
                    .windows(2)
                    .position(|pair| pair == b"*/")
                    .map_or(rest.len(), |pos| pos + 4);
            }
            _ if terminated => return true,
            quote @ (b'\'' | b'"' | b'`') => {
                i += quoted_len(rest, quote, backslash_escapes && quote != b'`');
            }
            _ => i += 1,
        }
    }

    false
}

/// Length of the quoted token at the start of `rest`, or the remaining
/// length when it is unterminated
fn quoted_len(rest: &[u8], quote: u8, backslash_escapes: bool) -> usize {
    let mut i = 1;
    while i < rest.len() {
        match rest[i] {
            b'\\' if backslash_escapes => i += 2,
            b if b == quote && rest.get(i + 1) == Some(&quote) => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    rest.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    // detect_type

    #[test]
    fn test_detects_every_keyword() {
        let cases = [
            ("SELECT 1", QueryType::Select),
            ("INSERT INTO t VALUES (1)", QueryType::Insert),
            ("UPDATE t SET x = 1", QueryType::Update),
            ("DELETE FROM t", QueryType::Delete),
            ("ALTER TABLE t ADD COLUMN y INT", QueryType::Alter),
            ("SHOW TABLES", QueryType::Show),
            ("DESCRIBE t", QueryType::Describe),
            ("EXPLAIN SELECT 1", QueryType::Explain),
            ("DROP TABLE t", QueryType::Drop),
            ("TRUNCATE TABLE t", QueryType::Truncate),
            ("CREATE TABLE t (id INT)", QueryType::Create),
            ("GRANT SELECT ON *.* TO 'u'@'%'", QueryType::Grant),
            ("REVOKE SELECT ON *.* FROM 'u'@'%'", QueryType::Revoke),
            ("SET NAMES utf8mb4", QueryType::Set),
            ("USE app", QueryType::Use),
        ];

        for (sql, expected) in cases {
            assert_eq!(detect_type(sql), expected, "wrong type for {sql:?}");
        }
    }

    #[test]
    fn test_desc_is_describe_not_delete() {
        assert_eq!(detect_type("DESC users"), QueryType::Describe);
        assert_eq!(detect_type("desc users"), QueryType::Describe);
        assert_eq!(detect_type("DESCRIBE users"), QueryType::Describe);
        assert_eq!(detect_type("DELETE FROM users"), QueryType::Delete);
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        assert_eq!(detect_type("   \n\tselect * from t  "), QueryType::Select);
        assert_eq!(detect_type("InSeRt INTO t VALUES (1)"), QueryType::Insert);
    }

    #[test]
    fn test_unknown_never_errors() {
        assert_eq!(detect_type(""), QueryType::Unknown);
        assert_eq!(detect_type("   "), QueryType::Unknown);
        assert_eq!(detect_type("REPLACE INTO t VALUES (1)"), QueryType::Unknown);
        assert_eq!(detect_type("WITH x AS (SELECT 1) SELECT * FROM x"), QueryType::Unknown);
        assert_eq!(detect_type("CALL proc()"), QueryType::Unknown);
    }

    #[test]
    fn test_leading_comments_are_skipped() {
        assert_eq!(detect_type("-- fetch users\nSELECT * FROM users"), QueryType::Select);
        assert_eq!(detect_type("/* hint */ DROP TABLE t"), QueryType::Drop);
        assert_eq!(detect_type("# note\n/* a */ -- b\n delete from t"), QueryType::Delete);
        assert_eq!(detect_type("/* unterminated"), QueryType::Unknown);
    }

    #[test]
    fn test_executable_comments_are_not_skipped() {
        let hidden_delete = "/*!DELETE FROM t WHERE 1 IN (*/ SELECT 1)";
        assert_eq!(detect_type(hidden_delete), QueryType::Unknown);
        assert!(is_dangerous_text(hidden_delete));
        assert!(starts_with_executable_comment(hidden_delete));

        assert_eq!(detect_type("/*!50001 SELECT 1 */"), QueryType::Unknown);
        assert_eq!(detect_type("/* plain */ /*M!100100 SELECT 1 */"), QueryType::Unknown);
        assert!(starts_with_executable_comment("-- note\n/*!DROP TABLE t */"));
        assert!(!starts_with_executable_comment("SELECT /*! STRAIGHT_JOIN */ 1"));
    }

    #[test]
    fn test_double_dash_needs_whitespace() {
        assert_eq!(detect_type("--x\nSELECT 1"), QueryType::Unknown);
        assert_eq!(detect_type("--\nSELECT 1"), QueryType::Select);
        assert_eq!(detect_type("--\tnote\nSELECT 1"), QueryType::Select);
    }

    // has_multiple_statements

    #[test]
    fn test_single_statements() {
        for sql in [
            "SELECT 1",
            "SELECT 1;",
            "SELECT 1 ;  \n",
            "SELECT 1; -- done",
            "SELECT 1; # done",
            "SELECT 1; /* done */",
            "SELECT 'a;b', \"c;d\", `e;f` FROM t",
            "SELECT 'it''s; fine'",
            "SELECT 1 -- trailing; DROP TABLE t",
            "SELECT 1 /* ; DROP TABLE t */",
        ] {
            assert!(!has_multiple_statements(sql), "single statement flagged: {sql:?}");
        }
    }

    #[test]
    fn test_batches_are_detected() {
        for sql in [
            "SELECT 1; DELETE FROM t",
            "SELECT 1;DROP TABLE users",
            "INSERT INTO t VALUES (1); DROP DATABASE prod",
            "SELECT 1;; SELECT 2",
            "SELECT 1; 'x'",
            "SELECT 1--1; DELETE FROM t",
            "/*!SELECT 1; DELETE FROM t */",
            "SELECT 1 /*! ; DELETE FROM t */",
        ] {
            assert!(has_multiple_statements(sql), "batch not flagged: {sql:?}");
        }
    }

    #[test]
    fn test_batches_hidden_by_either_escape_mode() {
        // Only the escaping reading sees the DELETE
        assert!(has_multiple_statements(r"SELECT 'x\''; DELETE FROM t; -- '"));
        // Only the non-escaping reading sees the DELETE
        assert!(has_multiple_statements(r"SELECT 'a\'; DELETE FROM t; -- '"));
    }

    // predicates

    #[test]
    fn test_read_only_types() {
        for query_type in [QueryType::Select, QueryType::Show, QueryType::Describe, QueryType::Explain]
        {
            assert!(is_read_only_type(query_type));
        }
        for query_type in [QueryType::Insert, QueryType::Set, QueryType::Use, QueryType::Unknown] {
            assert!(!is_read_only_type(query_type));
        }
    }

    #[test]
    fn test_dangerous_type_excludes_alter() {
        assert!(is_dangerous_type(QueryType::Drop));
        assert!(is_dangerous_type(QueryType::Revoke));
        assert!(!is_dangerous_type(QueryType::Alter));
        assert!(!is_dangerous_type(QueryType::Delete));
    }

    #[test]
    fn test_dangerous_text_includes_alter() {
        assert!(is_dangerous_text("alter table t add column y int"));
        assert!(is_dangerous_text("  DROP TABLE t"));
        assert!(is_dangerous_text("create database x"));
        assert!(!is_dangerous_text("SELECT * FROM drop_log"));
    }

    #[test]
    fn test_sensitive_text_matches_anywhere() {
        assert!(is_sensitive_text("show grants"));
        assert!(is_sensitive_text("SELECT * FROM mysql.user"));
        assert!(is_sensitive_text(
            "SELECT * FROM t WHERE x IN (SELECT grantee FROM information_schema.user_privileges)"
        ));
        assert!(is_sensitive_text("SHOW FULL PROCESSLIST"));
        assert!(!is_sensitive_text("SELECT * FROM users"));
    }

    #[test]
    fn test_alter_blocked_phrase() {
        assert_eq!(alter_blocked_phrase("ALTER TABLE t; DROP DATABASE prod"), Some("DROP DATABASE"));
        assert_eq!(alter_blocked_phrase("alter table t; grant all on *.* to x"), Some("GRANT"));
        assert_eq!(alter_blocked_phrase("ALTER TABLE t ADD COLUMN y INT"), None);
    }

    // validate_type

    #[test]
    fn test_validate_type_accepts_member() {
        assert!(validate_type("SELECT 1", &[QueryType::Select]).is_ok());
        assert!(validate_type(
            "delete from t",
            &[QueryType::Insert, QueryType::Update, QueryType::Delete]
        )
        .is_ok());
    }

    #[test]
    fn test_validate_type_reports_expected_and_got() {
        let err = validate_type("INSERT INTO t VALUES (1)", &[QueryType::Select]).unwrap_err();
        match err {
            WardenError::QueryTypeMismatch { expected, got } => {
                assert_eq!(expected, "SELECT");
                assert_eq!(got, "INSERT");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_classify_bundles_facts() {
        let facts = classify("DROP TABLE mysql.user");
        assert_eq!(facts.query_type, QueryType::Drop);
        assert!(!facts.read_only);
        assert!(facts.dangerous);
        assert!(facts.sensitive);
    }

    #[test]
    fn test_query_type_serializes_as_label() {
        assert_eq!(serde_json::to_string(&QueryType::Describe).unwrap(), r#""DESCRIBE""#);
        assert_eq!(QueryType::Unknown.to_string(), "UNKNOWN");
    }
}
