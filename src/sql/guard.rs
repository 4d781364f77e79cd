use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use thiserror::Error;

use crate::schema::{ColumnInfo, SchemaDescription};
use crate::sql::quote_ident;

/// Bare keywords that never appear in a read-only query.
pub(crate) const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "CREATE", "TRUNCATE", "MERGE", "GRANT",
    "REVOKE", "ATTACH", "DETACH", "COPY", "INSTALL", "PRAGMA", "VACUUM", "CALL",
];

const QUERY_STARTERS: &[&str] = &["SELECT", "WITH", "FROM", "VALUES"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SqlGuardError {
    #[error("no SQL statement was produced")]
    Empty,
    #[error("SQL could not be tokenized: {0}")]
    Tokenize(String),
    #[error("multiple statements are not allowed")]
    MultipleStatements,
    #[error("forbidden keyword {0}")]
    ForbiddenKeyword(String),
    #[error("only read-only queries are allowed, statement starts with {0}")]
    NotAQuery(String),
}

pub(crate) fn tokenize(sql: &str) -> Result<Vec<Token>, SqlGuardError> {
    let dialect = GenericDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize()
        .map_err(|e| SqlGuardError::Tokenize(e.to_string()))?;

    Ok(tokens
        .into_iter()
        .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
        .collect())
}

pub(crate) fn bare_keyword(token: &Token) -> Option<String> {
    match token {
        Token::Word(w) if w.quote_style.is_none() => Some(w.value.to_uppercase()),
        _ => None,
    }
}

/// Removes trailing statement terminators and surrounding whitespace.
pub fn strip_terminator(sql: &str) -> &str {
    let mut trimmed = sql.trim();
    while let Some(rest) = trimmed.strip_suffix(';') {
        trimmed = rest.trim_end();
    }
    trimmed
}

/// The hard read-only gate. Returns the statement without its terminator.
pub fn check_read_only(sql: &str) -> Result<String, SqlGuardError> {
    let statement = strip_terminator(sql);
    if statement.is_empty() {
        return Err(SqlGuardError::Empty);
    }

    let tokens = tokenize(statement)?;

    if tokens.iter().any(|t| matches!(t, Token::SemiColon)) {
        return Err(SqlGuardError::MultipleStatements);
    }

    if let Some(keyword) = tokens
        .iter()
        .filter_map(bare_keyword)
        .find(|kw| FORBIDDEN_KEYWORDS.contains(&kw.as_str()))
    {
        return Err(SqlGuardError::ForbiddenKeyword(keyword));
    }

    match tokens.first() {
        Some(Token::LParen) => {}
        Some(first) => {
            let starts_query = bare_keyword(first)
                .is_some_and(|kw| QUERY_STARTERS.contains(&kw.as_str()));
            if !starts_query {
                return Err(SqlGuardError::NotAQuery(first.to_string()));
            }
        }
        None => return Err(SqlGuardError::Empty),
    }

    Ok(statement.to_string())
}

/// Tables named after FROM or JOIN, as written (possibly schema-qualified).
pub fn referenced_tables(sql: &str) -> Vec<String> {
    let Ok(tokens) = tokenize(sql) else {
        return Vec::new();
    };

    let mut tables = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let is_source = bare_keyword(&tokens[i]).is_some_and(|kw| kw == "FROM" || kw == "JOIN");
        i += 1;
        if !is_source {
            continue;
        }

        loop {
            let mut parts = Vec::new();
            while let Some(Token::Word(w)) = tokens.get(i) {
                parts.push(w.value.clone());
                i += 1;
                if matches!(tokens.get(i), Some(Token::Period)) {
                    i += 1;
                } else {
                    break;
                }
            }
            if parts.is_empty() {
                break;
            }
            let name = parts.join(".");
            if !tables.contains(&name) {
                tables.push(name);
            }

            // skip an alias, then continue through comma-separated sources
            if bare_keyword_at(&tokens, i).as_deref() == Some("AS") {
                i += 1;
            }
            if let Some(Token::Word(alias)) = tokens.get(i) {
                if alias.quote_style.is_some() || !is_clause_keyword(&alias.value.to_uppercase()) {
                    i += 1;
                }
            }
            if matches!(tokens.get(i), Some(Token::Comma)) {
                i += 1;
            } else {
                break;
            }
        }
    }

    tables
}

fn bare_keyword_at(tokens: &[Token], i: usize) -> Option<String> {
    tokens.get(i).and_then(bare_keyword)
}

fn is_clause_keyword(kw: &str) -> bool {
    matches!(
        kw,
        "WHERE" | "GROUP" | "ORDER" | "HAVING" | "LIMIT" | "OFFSET" | "JOIN" | "INNER" | "LEFT"
            | "RIGHT" | "FULL" | "CROSS" | "NATURAL" | "ON" | "USING" | "UNION" | "EXCEPT"
            | "INTERSECT" | "WINDOW" | "QUALIFY" | "FETCH"
    )
}

/// Bare keywords outside any parentheses, uppercased.
fn top_level_keywords(tokens: &[Token]) -> Vec<String> {
    let mut depth = 0i32;
    let mut keywords = Vec::new();
    for token in tokens {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth -= 1,
            _ if depth == 0 => keywords.extend(bare_keyword(token)),
            _ => {}
        }
    }
    keywords
}

/// True when the outermost query already limits its rows.
pub fn has_top_level_limit(sql: &str) -> bool {
    let Ok(tokens) = tokenize(sql) else {
        return false;
    };

    top_level_keywords(&tokens)
        .iter()
        .any(|kw| kw == "LIMIT" || kw == "FETCH")
}

/// True for queries that aggregate rows: aggregate calls or GROUP BY at any depth.
pub fn is_aggregation(sql: &str) -> bool {
    let Ok(tokens) = tokenize(sql) else {
        return false;
    };

    tokens.iter().enumerate().any(|(i, token)| {
        match bare_keyword(token).as_deref() {
            Some("GROUP") => true,
            Some("SUM" | "COUNT" | "AVG" | "MIN" | "MAX") => {
                matches!(tokens.get(i + 1), Some(Token::LParen))
            }
            _ => false,
        }
    })
}

const ORDER_COLUMNS: &[&str] = &["id", "created_at", "updated_at", "date", "timestamp", "name", "code"];

/// The column a plain listing is sorted by: an exact match from `ORDER_COLUMNS`
/// first, then a column ending in `_<candidate>` (foreign `_id` keys excluded).
fn pick_order_column(columns: &[ColumnInfo]) -> Option<&ColumnInfo> {
    let exact = ORDER_COLUMNS.iter().find_map(|candidate| {
        columns.iter().find(|c| c.name.eq_ignore_ascii_case(candidate))
    });

    exact.or_else(|| {
        ORDER_COLUMNS.iter().skip(1).find_map(|candidate| {
            columns
                .iter()
                .find(|c| c.name.to_lowercase().ends_with(&format!("_{}", candidate)))
        })
    })
}

/// Appends `ORDER BY <column> DESC` to a single-table listing without one.
///
/// Aggregates, subqueries, joins, DISTINCT, set operations and queries that
/// already sort or limit at the top level are left alone.
pub fn apply_default_order(sql: &str, schema: &SchemaDescription) -> Option<String> {
    let tokens = tokenize(sql).ok()?;
    let top_level = top_level_keywords(&tokens);
    let blocked = top_level.iter().any(|kw| {
        matches!(
            kw.as_str(),
            "ORDER" | "LIMIT" | "FETCH" | "OFFSET" | "DISTINCT" | "UNION" | "EXCEPT" | "INTERSECT"
                | "JOIN"
        )
    });
    let selects = tokens
        .iter()
        .filter(|t| bare_keyword(t).as_deref() == Some("SELECT"))
        .count();
    if blocked || selects != 1 || is_aggregation(sql) {
        return None;
    }

    let [table]: [String; 1] = referenced_tables(sql).try_into().ok()?;
    let column = pick_order_column(&schema.table(&table)?.columns)?;

    Some(format!(
        "{}\nORDER BY {} DESC",
        strip_terminator(sql),
        quote_ident(&column.name)
    ))
}

/// Appends `LIMIT limit` when absent and a referenced table is larger than `threshold`.
pub fn apply_row_limit(
    sql: &str,
    schema: &SchemaDescription,
    threshold: u64,
    limit: usize,
) -> Option<String> {
    if has_top_level_limit(sql) {
        return None;
    }

    let large = referenced_tables(sql)
        .iter()
        .filter_map(|name| schema.table(name))
        .any(|t| t.row_count > threshold);

    large.then(|| format!("{}\nLIMIT {}", strip_terminator(sql), limit))
}
