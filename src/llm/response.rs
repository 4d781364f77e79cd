use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;
use tracing::debug;

use crate::llm::models::LayoutHints;

const SQL_FENCE_TAGS: &[&str] = &["sql", "duckdb", "postgresql", "postgres"];
const QUERY_START_WORDS: &[&str] = &["SELECT", "WITH", "FROM", "VALUES"];

/// Outcome of pulling SQL out of a model's free-text answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    Parsed {
        sql: String,
        hints: LayoutHints,
        explanation: Option<String>,
    },
    Unparseable(String),
}

struct Fence {
    tag: String,
    body: String,
    first_line: usize,
    last_line: usize,
}

/// Extracts one SQL statement, layout hints and any surrounding prose.
///
/// SQL is taken from the first ```sql block, then from the first other fenced
/// block that reads like a query, then from the first line starting with
/// `SELECT`/`WITH` up to a terminator, closing fence or blank line. Text found
/// outside a SQL-tagged block must parse as SQL to count.
pub fn parse_response(raw: &str) -> ParsedResponse {
    let lines: Vec<&str> = raw.lines().collect();
    let fences = find_fences(&lines);

    let hints = fences
        .iter()
        .filter(|f| f.tag == "json")
        .find_map(|f| match serde_json::from_str::<LayoutHints>(&f.body) {
            Ok(hints) => Some(hints),
            Err(e) => {
                debug!("Ignoring malformed layout hints: {}", e);
                None
            }
        })
        .unwrap_or_default();

    let fenced = fences
        .iter()
        .find(|f| SQL_FENCE_TAGS.contains(&f.tag.as_str()) && !f.body.trim().is_empty())
        .or_else(|| {
            fences
                .iter()
                .find(|f| f.tag != "json" && reads_like_query(&f.body) && parses_as_sql(&f.body))
        });

    let (sql, used) = match fenced {
        Some(fence) => (fence.body.trim().to_string(), (fence.first_line, fence.last_line)),
        None => match scan_for_statement(&lines, &fences) {
            Some(found) => found,
            None => return ParsedResponse::Unparseable(raw.to_string()),
        },
    };

    let explanation = lines
        .iter()
        .enumerate()
        .filter(|(i, _)| !(used.0..=used.1).contains(i))
        .filter(|(i, _)| !fences.iter().any(|f| (f.first_line..=f.last_line).contains(i)))
        .map(|(_, line)| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .collect::<Vec<_>>()
        .join(" ");

    ParsedResponse::Parsed {
        sql,
        hints,
        explanation: (!explanation.is_empty()).then_some(explanation),
    }
}

fn find_fences(lines: &[&str]) -> Vec<Fence> {
    let mut fences = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let Some(tag) = lines[i].trim().strip_prefix("```") else {
            i += 1;
            continue;
        };

        let first_line = i;
        let mut body = Vec::new();
        i += 1;
        while i < lines.len() && !lines[i].trim().starts_with("```") {
            body.push(lines[i]);
            i += 1;
        }

        // An unclosed fence runs to the end of the text
        let last_line = i.min(lines.len() - 1);
        fences.push(Fence {
            tag: tag.trim().to_lowercase(),
            body: body.join("\n"),
            first_line,
            last_line,
        });
        i += 1;
    }

    fences
}

fn first_word(text: &str) -> String {
    text.trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_uppercase()
}

fn reads_like_query(body: &str) -> bool {
    let code = body
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("--"))
        .unwrap_or("");

    code.starts_with('(') || QUERY_START_WORDS.contains(&first_word(code).as_str())
}

fn scan_for_statement(lines: &[&str], fences: &[Fence]) -> Option<(String, (usize, usize))> {
    let in_json = |i: usize| {
        fences
            .iter()
            .any(|f| f.tag == "json" && (f.first_line..=f.last_line).contains(&i))
    };

    (0..lines.len())
        .filter(|&i| !in_json(i) && matches!(first_word(lines[i]).as_str(), "SELECT" | "WITH"))
        .map(|start| collect_statement(lines, start))
        .find(|(sql, _)| parses_as_sql(sql))
}

fn collect_statement(lines: &[&str], start: usize) -> (String, (usize, usize)) {
    let mut collected = Vec::new();
    let mut end = start;
    for (i, line) in lines.iter().enumerate().skip(start) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("```") {
            break;
        }
        collected.push(trimmed);
        end = i;
        if trimmed.ends_with(';') {
            break;
        }
    }

    (collected.join("\n"), (start, end))
}

/// Prose such as "With the schema given..." starts like a query but is not one.
fn parses_as_sql(text: &str) -> bool {
    match Parser::parse_sql(&DuckDbDialect {}, text) {
        Ok(statements) => !statements.is_empty(),
        Err(e) => {
            debug!("Discarding candidate that does not parse as SQL: {}", e);
            false
        }
    }
}
