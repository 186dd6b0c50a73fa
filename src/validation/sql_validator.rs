use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::error::{ControllerError, Result};
use crate::models::DatabaseKind;

/// Longest identifier PostgreSQL keeps without truncation
const MAX_IDENTIFIER_LEN: usize = 63;

/// Checks applied to SQL text and names before they reach an engine
pub struct SqlValidator;

impl SqlValidator {
    pub fn dialect_for(kind: DatabaseKind) -> Box<dyn Dialect> {
        match kind {
            DatabaseKind::PostgreSql => Box::new(PostgreSqlDialect {}),
            DatabaseKind::MySql => Box::new(MySqlDialect {}),
            DatabaseKind::SparkSql => Box::new(GenericDialect {}),
        }
    }

    /// Ensure `sql` holds exactly one statement and strip a trailing `;`.
    ///
    /// Only the tokenizer is used, so engine-specific syntax the parser does
    /// not know still passes.
    pub fn single_statement(sql: &str, kind: DatabaseKind) -> Result<String> {
        let dialect = Self::dialect_for(kind);
        let tokens = Tokenizer::new(dialect.as_ref(), sql)
            .tokenize()
            .map_err(|e| ControllerError::InvalidInput(format!("SQL tokenizing error: {}", e)))?;

        let mut statements = 0;
        let mut current_has_content = false;
        for token in &tokens {
            match token {
                Token::SemiColon => {
                    if current_has_content {
                        statements += 1;
                    }
                    current_has_content = false;
                }
                Token::Whitespace(_) | Token::EOF => {}
                _ => current_has_content = true,
            }
        }
        if current_has_content {
            statements += 1;
        }

        match statements {
            0 => Err(ControllerError::InvalidInput("Empty SQL statement".to_string())),
            1 => Ok(sql.trim().trim_end_matches(';').trim_end().to_string()),
            n => Err(ControllerError::InvalidInput(format!(
                "Expected a single statement, found {}",
                n
            ))),
        }
    }

    /// Prepend a non-semantic annotation comment to `sql`
    pub fn with_comment(comment: &str, sql: &str) -> Result<String> {
        let comment = comment.trim();
        if comment.is_empty() {
            return Ok(sql.to_string());
        }
        if comment.len() >= 4 && comment.starts_with("/*") && comment.ends_with("*/") {
            Self::check_comment_body(&comment[2..comment.len() - 2])?;
            return Ok(format!("{} {}", comment, sql));
        }
        if comment.starts_with("--") {
            if comment.contains('\n') || comment.contains('\r') {
                return Err(ControllerError::InvalidInput(
                    "Line comment must not span multiple lines".to_string(),
                ));
            }
            return Ok(format!("{}\n{}", comment, sql));
        }
        Self::check_comment_body(comment)?;
        Ok(format!("/* {} */ {}", comment, sql))
    }

    /// The body may neither close the block comment early nor open a nested one
    fn check_comment_body(body: &str) -> Result<()> {
        if body.contains("*/") || body.contains("/*") {
            return Err(ControllerError::InvalidInput(
                "Comment must not contain '/*' or '*/'".to_string(),
            ));
        }
        Ok(())
    }

    /// Plain identifier: letters, digits, `_` and `$`, not starting with a digit
    pub fn validate_identifier(name: &str) -> Result<&str> {
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');

        if !valid_start || !valid_rest {
            return Err(ControllerError::InvalidInput(format!(
                "Invalid identifier: {:?}",
                name
            )));
        }
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(ControllerError::InvalidInput(format!(
                "Identifier longer than {} characters: {}",
                MAX_IDENTIFIER_LEN, name
            )));
        }
        Ok(name)
    }

    /// Runtime parameter name, optionally dotted (`spark.sql.cbo.enabled`)
    pub fn validate_setting_name(name: &str) -> Result<&str> {
        if name.is_empty() {
            return Err(ControllerError::InvalidInput("Empty parameter name".to_string()));
        }
        for segment in name.split('.') {
            let mut chars = segment.chars();
            let valid_start = chars
                .next()
                .map(|c| c.is_ascii_alphabetic() || c == '_')
                .unwrap_or(false);
            if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(ControllerError::InvalidInput(format!(
                    "Invalid parameter name: {:?}",
                    name
                )));
            }
        }
        Ok(name)
    }

    /// Double-quoted identifier
    pub fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Backtick-quoted identifier (MySQL)
    pub fn quote_backtick(name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    /// Single-quoted string literal
    pub fn quote_literal(value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_statement_strips_semicolon() {
        let sql = "SELECT s.id, s.name FROM student s JOIN course c ON s.id = c.student_id;";
        let stmt = SqlValidator::single_statement(sql, DatabaseKind::MySql).unwrap();
        assert!(!stmt.ends_with(';'));
        assert!(stmt.starts_with("SELECT s.id"));
    }

    #[test]
    fn test_single_statement_rejects_batches() {
        let err = SqlValidator::single_statement("SELECT 1; DROP TABLE users", DatabaseKind::PostgreSql);
        assert!(matches!(err, Err(ControllerError::InvalidInput(_))));
    }

    #[test]
    fn test_single_statement_ignores_comments_and_semicolons_in_strings() {
        assert!(SqlValidator::single_statement("SELECT ';' -- trailing;", DatabaseKind::PostgreSql).is_ok());
        assert!(SqlValidator::single_statement("/* a; b */ SELECT 1;;", DatabaseKind::PostgreSql).is_ok());
    }

    #[test]
    fn test_single_statement_rejects_empty() {
        assert!(SqlValidator::single_statement("  ;  ", DatabaseKind::SparkSql).is_err());
    }

    #[test]
    fn test_with_comment() {
        assert_eq!(SqlValidator::with_comment("", "SELECT 1").unwrap(), "SELECT 1");
        assert_eq!(
            SqlValidator::with_comment("query 7", "SELECT 1").unwrap(),
            "/* query 7 */ SELECT 1"
        );
        assert_eq!(
            SqlValidator::with_comment("/*+ SeqScan(t) */", "SELECT 1").unwrap(),
            "/*+ SeqScan(t) */ SELECT 1"
        );
        assert_eq!(
            SqlValidator::with_comment("-- tag", "SELECT 1").unwrap(),
            "-- tag\nSELECT 1"
        );
        assert!(SqlValidator::with_comment("bad */ comment", "SELECT 1").is_err());
        assert!(SqlValidator::with_comment("-- one\ntwo", "SELECT 1").is_err());
    }

    #[test]
    fn test_with_comment_cannot_smuggle_statements() {
        let smuggled = [
            "/* a */ DROP TABLE student; /* b */",
            "/* a /* nested */",
            "/*/",
            "note /* opens a nested comment",
        ];
        for comment in smuggled {
            let result = SqlValidator::with_comment(comment, "EXPLAIN format=json SELECT 1");
            assert!(
                matches!(result, Err(ControllerError::InvalidInput(_))),
                "accepted {:?}",
                comment
            );
        }
    }

    #[test]
    fn test_validate_identifier() {
        assert!(SqlValidator::validate_identifier("student_id_idx").is_ok());
        assert!(SqlValidator::validate_identifier("_tmp$1").is_ok());
        assert!(SqlValidator::validate_identifier("1abc").is_err());
        assert!(SqlValidator::validate_identifier("a b").is_err());
        assert!(SqlValidator::validate_identifier("x\"; DROP TABLE t; --").is_err());
        assert!(SqlValidator::validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_validate_setting_name() {
        assert!(SqlValidator::validate_setting_name("enable_seqscan").is_ok());
        assert!(SqlValidator::validate_setting_name("datafusion.optimizer.prefer_hash_join").is_ok());
        assert!(SqlValidator::validate_setting_name("work_mem = 1; DROP").is_err());
        assert!(SqlValidator::validate_setting_name("a..b").is_err());
    }

    #[test]
    fn test_quoting() {
        assert_eq!(SqlValidator::quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(SqlValidator::quote_backtick("db`x"), "`db``x`");
        assert_eq!(SqlValidator::quote_literal("it's"), "'it''s'");
    }
}
