use serde_json::Value;
use std::fmt::Write;

use crate::schema::{RelationshipKind, SchemaDescription, TableInfo};

/// Columns kept per table once the prompt has to shrink.
const TIGHT_COLUMN_CAP: usize = 12;
const SAMPLE_VALUE_CHARS: usize = 40;

const INSTRUCTIONS: &str = "\
### Instructions:
You translate report requests into a single read-only DuckDB SQL query.
Adhere to these rules:
- Use only the tables and columns listed in the schema, spelled exactly as shown
- Double-quote identifiers that contain spaces, capitals or special characters
- Produce exactly one SELECT (or WITH ... SELECT) statement; never modify data
- Use table aliases when joining; prefer declared foreign keys over probable ones
- Give every computed column a readable alias
- Order the rows in a way that suits a printed report";

const RESPONSE_FORMAT: &str = "\
### Response format:
1. The SQL query inside a ```sql fenced block.
2. Optionally, layout hints inside a ```json fenced block:
   {\"title\": \"...\", \"orientation\": \"portrait\" | \"landscape\", \"show_summary\": true | false}
3. One short sentence explaining what the query returns.";

/// How much detail a table section carries; each step is smaller than the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detail {
    Full,
    NoSamples,
    CappedColumns,
}

/// Renders schema and request into a prompt that stays within `max_chars`.
pub struct PromptBuilder {
    max_chars: usize,
}

impl PromptBuilder {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn build(&self, schema: &SchemaDescription, request: &str) -> String {
        let head = format!("{}\n\n### Database schema:\n", INSTRUCTIONS);
        let tail = format!(
            "\n### Request:\n{}\n\n{}\n",
            request.trim(),
            RESPONSE_FORMAT
        );
        let budget = self.max_chars.saturating_sub(head.len() + tail.len());

        let tables = ordered_tables(schema, &request.to_lowercase());
        let body = render_schema(&tables, budget);

        format!("{}{}{}", head, body, tail)
    }
}

/// Tables named in the request first, the rest in schema order.
fn ordered_tables<'a>(schema: &'a SchemaDescription, request: &str) -> Vec<&'a TableInfo> {
    let (mut mentioned, rest): (Vec<&TableInfo>, Vec<&TableInfo>) = schema
        .tables
        .iter()
        .partition(|t| t.mention_length(request).is_some());
    mentioned.extend(rest);
    mentioned
}

fn render_schema(tables: &[&TableInfo], budget: usize) -> String {
    for detail in [Detail::Full, Detail::NoSamples, Detail::CappedColumns] {
        let sections: Vec<String> = tables.iter().map(|t| render_table(t, detail)).collect();
        let total: usize = sections.iter().map(String::len).sum();
        if total <= budget {
            return sections.concat();
        }
    }

    // Still too large: keep leading tables and say how many were left out
    let mut body = String::new();
    for (i, table) in tables.iter().enumerate() {
        let section = render_table(table, Detail::CappedColumns);
        let remaining = tables.len() - i;
        let note = omitted_note(remaining);
        if body.len() + section.len() + omitted_note(remaining - 1).len() > budget {
            body.push_str(&note);
            break;
        }
        body.push_str(&section);
    }
    body
}

fn omitted_note(count: usize) -> String {
    if count == 0 {
        String::new()
    } else {
        format!(
            "({} more tables omitted to fit the prompt size limit)\n",
            count
        )
    }
}

fn render_table(table: &TableInfo, detail: Detail) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Table {} (~{} rows)", table.sql_name(), table.row_count);

    let shown = match detail {
        Detail::CappedColumns => TIGHT_COLUMN_CAP.min(table.columns.len()),
        _ => table.columns.len(),
    };
    for column in &table.columns[..shown] {
        let _ = write!(out, "  - {} {}", column.name, column.declared_type);
        if column.primary_key {
            out.push_str(" PRIMARY KEY");
        }
        if !column.nullable {
            out.push_str(" NOT NULL");
        }
        out.push('\n');
    }
    if shown < table.columns.len() {
        let _ = writeln!(out, "  - ... {} more columns", table.columns.len() - shown);
    }

    if !table.relationships.is_empty() {
        out.push_str("  Relationships:\n");
        for rel in &table.relationships {
            let label = match rel.kind {
                RelationshipKind::Declared => "declared foreign key",
                RelationshipKind::Heuristic => "probable, inferred from the column name only",
            };
            let _ = writeln!(
                out,
                "  - {} -> {}.{} ({})",
                rel.source_column, rel.target_table, rel.target_column, label
            );
        }
    }

    if detail == Detail::Full && !table.sample_rows.is_empty() {
        out.push_str("  Sample rows:\n");
        for row in &table.sample_rows {
            let values: Vec<String> = row
                .iter()
                .map(|(k, v)| format!("{}={}", k, sample_value(v)))
                .collect();
            let _ = writeln!(out, "  - {}", values.join(", "));
        }
    }

    out.push('\n');
    out
}

fn sample_value(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > SAMPLE_VALUE_CHARS {
        let cut: String = text.chars().take(SAMPLE_VALUE_CHARS).collect();
        format!("{}...", cut)
    } else {
        text
    }
}
