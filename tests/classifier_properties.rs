//! Classifier behavior over the full keyword set

use mysql_warden::classifier::{
    alter_blocked_phrase, classify, detect_type, has_multiple_statements, is_dangerous_text,
    is_dangerous_type, is_read_only_type, is_sensitive_text, validate_type, ALTER_BLOCKED_PHRASES,
};
use mysql_warden::QueryType;
use pretty_assertions::assert_eq;

const KEYWORDS: &[(&str, QueryType)] = &[
    ("SELECT", QueryType::Select),
    ("INSERT", QueryType::Insert),
    ("UPDATE", QueryType::Update),
    ("DELETE", QueryType::Delete),
    ("ALTER", QueryType::Alter),
    ("SHOW", QueryType::Show),
    ("DESCRIBE", QueryType::Describe),
    ("EXPLAIN", QueryType::Explain),
    ("DROP", QueryType::Drop),
    ("TRUNCATE", QueryType::Truncate),
    ("CREATE", QueryType::Create),
    ("GRANT", QueryType::Grant),
    ("REVOKE", QueryType::Revoke),
    ("SET", QueryType::Set),
    ("USE", QueryType::Use),
];

const READ_ONLY: &[&str] = &["SELECT", "SHOW", "DESCRIBE", "EXPLAIN"];

#[test]
fn every_keyword_detected_in_any_case_with_leading_whitespace() {
    for (keyword, expected) in KEYWORDS {
        for variant in [keyword.to_string(), keyword.to_lowercase(), capitalize(keyword)] {
            for prefix in ["", "   ", "\n\t "] {
                let sql = format!("{prefix}{variant} something");
                assert_eq!(detect_type(&sql), *expected, "sql: {sql:?}");
                assert_eq!(
                    is_read_only_type(detect_type(&sql)),
                    READ_ONLY.contains(keyword),
                    "sql: {sql:?}"
                );
            }
        }
    }
}

#[test]
fn desc_with_space_is_describe_never_delete() {
    for sql in ["DESC users", "desc users", "  Desc `orders`", "DESCRIBE users", "describe t"] {
        assert_eq!(detect_type(sql), QueryType::Describe, "sql: {sql:?}");
    }
    assert_eq!(detect_type("DELETE FROM users"), QueryType::Delete);
    assert_eq!(detect_type("delete from users"), QueryType::Delete);
}

#[test]
fn unrecognized_statements_are_unknown() {
    for sql in ["", "   ", "CALL proc()", "REPLACE INTO t VALUES (1)", "WITH x AS (SELECT 1) SELECT * FROM x"] {
        assert_eq!(detect_type(sql), QueryType::Unknown, "sql: {sql:?}");
    }
}

#[test]
fn leading_comments_do_not_hide_keyword() {
    assert_eq!(detect_type("/* hint */ DROP TABLE t"), QueryType::Drop);
    assert_eq!(detect_type("-- note\nDELETE FROM t"), QueryType::Delete);
    assert_eq!(detect_type("# note\n  select 1"), QueryType::Select);
    assert!(is_dangerous_text("/* a */ /* b */ truncate t"));
}

#[test]
fn dangerous_text_includes_alter_but_type_does_not() {
    assert!(is_dangerous_text("ALTER TABLE t ADD COLUMN y INT"));
    assert!(!is_dangerous_type(detect_type("ALTER TABLE t ADD COLUMN y INT")));

    for keyword in ["DROP", "TRUNCATE", "CREATE", "GRANT", "REVOKE"] {
        let sql = format!("{keyword} x");
        assert!(is_dangerous_text(&sql), "sql: {sql:?}");
        assert!(is_dangerous_type(detect_type(&sql)), "sql: {sql:?}");
    }

    assert!(!is_dangerous_text("SELECT 'DROP TABLE t'"));
}

#[test]
fn sensitive_patterns_match_anywhere() {
    assert!(is_sensitive_text("show grants for current_user"));
    assert!(is_sensitive_text("SELECT * FROM (SELECT user FROM mysql.user) u"));
    assert!(is_sensitive_text("select * from information_schema.USER_PRIVILEGES"));
    assert!(is_sensitive_text("SHOW FULL PROCESSLIST"));
    assert!(!is_sensitive_text("SELECT * FROM users"));
}

#[test]
fn alter_blocklist_finds_embedded_phrases() {
    assert_eq!(alter_blocked_phrase("ALTER TABLE t; DROP DATABASE prod"), Some("DROP DATABASE"));
    assert_eq!(alter_blocked_phrase("alter table t; grant all on *.* to x"), Some("GRANT"));
    assert_eq!(alter_blocked_phrase("ALTER TABLE t ADD COLUMN y INT"), None);

    for phrase in ALTER_BLOCKED_PHRASES {
        let sql = format!("ALTER TABLE t; {phrase} x");
        assert_eq!(alter_blocked_phrase(&sql), Some(*phrase));
    }
}

#[test]
fn executable_comments_are_never_read_only() {
    for sql in [
        "/*!DELETE FROM t WHERE 1 IN (*/ SELECT 1)",
        "/*!50001 DROP TABLE t */ SELECT 1",
        "/*M!100100 TRUNCATE t */ SELECT 1",
        "# note\n/*!UPDATE t SET x = 1 */ SELECT 1",
    ] {
        let facts = classify(sql);
        assert_eq!(facts.query_type, QueryType::Unknown, "sql: {sql:?}");
        assert!(!facts.read_only, "sql: {sql:?}");
        assert!(facts.dangerous, "sql: {sql:?}");
    }
}

#[test]
fn batches_are_flagged_for_every_leading_keyword() {
    for (keyword, _) in KEYWORDS {
        let sql = format!("{keyword} x; DELETE FROM t");
        assert!(has_multiple_statements(&sql), "batch not flagged: {sql}");
        assert!(!has_multiple_statements(&format!("{keyword} x;")), "keyword: {keyword}");
    }

    assert!(!has_multiple_statements("INSERT INTO t VALUES ('a; b')"));
    assert!(has_multiple_statements("INSERT INTO t VALUES ('a'); DROP DATABASE prod"));
}

#[test]
fn validate_type_names_expected_and_detected() {
    assert!(validate_type("SELECT 1", &[QueryType::Select]).is_ok());

    let err = validate_type("INSERT INTO t VALUES (1)", &[QueryType::Select]).unwrap_err();
    assert_eq!(err.error_code(), "QUERY_TYPE_MISMATCH");
    assert_eq!(
        err.message(),
        "Query type mismatch: expected SELECT, got INSERT. Use the appropriate tool for this query type"
    );

    let err = validate_type(
        "ALTER TABLE t ADD y INT",
        &[QueryType::Insert, QueryType::Update, QueryType::Delete],
    )
    .unwrap_err();
    assert!(err.message().contains("expected INSERT/UPDATE/DELETE, got ALTER"));
}

fn capitalize(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
