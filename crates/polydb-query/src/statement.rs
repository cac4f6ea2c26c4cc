//! Splitting of relational command strings into statements

use crate::error::{DataError, Result};

/// Broad class of a single SQL statement, decided by its leading keyword
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StatementKind {
    /// `SELECT ...`; rows are produced
    Read,
    /// `INSERT`, `UPDATE`, `DELETE`, `REPLACE`
    Write,
    /// DDL, pragmas, session statements and anything else
    Other,
}

impl StatementKind {
    /// Classify a statement, looking past leading `--` and `/* */` comments
    pub fn of(statement: &str) -> Self {
        let keyword = skip_leading_comments(statement)
            .split(|c: char| c.is_whitespace() || c == '(')
            .find(|word| !word.is_empty())
            .unwrap_or_default()
            .to_ascii_uppercase();

        match keyword.as_str() {
            "SELECT" => StatementKind::Read,
            "INSERT" | "UPDATE" | "DELETE" | "REPLACE" => StatementKind::Write,
            _ => StatementKind::Other,
        }
    }
}

/// Split a command on `;`, dropping `--` comment lines and blank segments.
///
/// Splitting is textual: a `;` inside a string literal also ends a statement.
pub fn split_statements(command: &str) -> Vec<String> {
    command
        .split(';')
        .map(strip_comment_lines)
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// The single statement of a fetch command.
///
/// Fails with `InvalidQuery` when the command holds no statement or more than one.
pub fn single_statement(command: &str) -> Result<String> {
    let mut statements = split_statements(command);
    match statements.len() {
        1 => Ok(statements.remove(0)),
        0 => Err(DataError::invalid_query("Fetch command contains no statement")),
        n => Err(DataError::invalid_query(format!(
            "Fetch runs exactly one statement, got {}",
            n
        ))),
    }
}

/// Strip whitespace, `-- ...` line comments and `/* ... */` block comments
/// from the start of a statement
pub fn skip_leading_comments(statement: &str) -> &str {
    let mut rest = statement.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.find('\n').map_or("", |end| &after[end + 1..]);
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.find("*/").map_or("", |end| &after[end + 2..]);
        } else {
            return rest;
        }
        rest = rest.trim_start();
    }
}

fn strip_comment_lines(segment: &str) -> String {
    segment
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
