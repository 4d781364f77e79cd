use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::llm::models::{GeneratedQuery, Provenance};
use crate::schema::{ColumnInfo, SchemaDescription, TableInfo, contains_word, name_variants};
use crate::sql::quote_ident;

const MONEY_HINTS: &[&str] = &[
    "amount", "total", "price", "cost", "revenue", "sales", "value", "balance", "quantity", "qty",
];

/// Everything the rules look at, resolved once per request.
struct RequestContext<'a> {
    text: String,
    table: &'a TableInfo,
    measure: Option<&'a ColumnInfo>,
    group_by: Option<&'a ColumnInfo>,
    filter: Option<NumericFilter>,
    limit: usize,
}

struct NumericFilter {
    op: &'static str,
    value: String,
}

struct FallbackRule {
    name: &'static str,
    applies: fn(&RequestContext) -> bool,
    build: fn(&RequestContext) -> String,
}

// Evaluated top to bottom, first match wins. The last rule always applies.
const RULES: &[FallbackRule] = &[
    FallbackRule {
        name: "count",
        applies: |ctx| has_word(&ctx.text, &["count", "how many", "number of"]),
        build: build_count,
    },
    FallbackRule {
        name: "average",
        applies: |ctx| ctx.measure.is_some() && has_word(&ctx.text, &["average", "avg", "mean"]),
        build: |ctx| build_aggregate(ctx, "AVG", "average"),
    },
    FallbackRule {
        name: "total",
        applies: |ctx| ctx.measure.is_some() && has_word(&ctx.text, &["total", "sum"]),
        build: |ctx| build_aggregate(ctx, "SUM", "total"),
    },
    FallbackRule {
        name: "filtered listing",
        applies: |ctx| ctx.measure.is_some() && ctx.filter.is_some(),
        build: |ctx| {
            format!(
                "SELECT * FROM {}{} LIMIT {}",
                ctx.table.sql_name(),
                where_clause(ctx),
                ctx.limit
            )
        },
    },
    FallbackRule {
        name: "listing",
        applies: |_| true,
        build: |ctx| format!("SELECT * FROM {} LIMIT {}", ctx.table.sql_name(), ctx.limit),
    },
];

/// Keyword-driven SQL used when the AI path is unavailable or unusable.
pub struct FallbackGenerator {
    row_limit: usize,
}

impl FallbackGenerator {
    pub fn new(row_limit: usize) -> Self {
        Self {
            row_limit: row_limit.max(1),
        }
    }

    pub fn generate(&self, schema: &SchemaDescription, request: &str) -> GeneratedQuery {
        let text = request.to_lowercase();

        let Some(table) = match_table(schema, &text) else {
            return GeneratedQuery::empty(
                Provenance::Fallback,
                "The database has no tables to report on",
            );
        };

        let measure = pick_measure(table, &text);
        let ctx = RequestContext {
            group_by: pick_group_by(table, &text, measure),
            filter: measure.and_then(|_| parse_filter(&text)),
            measure,
            table,
            text,
            limit: self.row_limit,
        };

        let rule = RULES
            .iter()
            .find(|rule| (rule.applies)(&ctx))
            .unwrap_or(&RULES[RULES.len() - 1]);
        let sql = (rule.build)(&ctx);

        debug!("Fallback rule '{}' produced: {}", rule.name, sql);

        GeneratedQuery::new(sql, Provenance::Fallback).with_explanation(Some(format!(
            "Rule-based query ({}) over table {}",
            rule.name, table.name
        )))
    }
}

fn has_word(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| contains_word(text, w))
}

/// Longest table-name mention wins; ties and no mention fall back to schema order.
fn match_table<'a>(schema: &'a SchemaDescription, text: &str) -> Option<&'a TableInfo> {
    let mut best: Option<(&TableInfo, usize)> = None;

    for table in &schema.tables {
        if let Some(score) = table.mention_length(text) {
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((table, score));
            }
        }
    }

    best.map(|(t, _)| t).or_else(|| schema.tables.first())
}

fn is_key_like(column: &ColumnInfo) -> bool {
    let lower = column.name.to_lowercase();
    column.primary_key || lower == "id" || lower.ends_with("_id")
}

fn pick_measure<'a>(table: &'a TableInfo, text: &str) -> Option<&'a ColumnInfo> {
    let numeric: Vec<&ColumnInfo> = table
        .columns
        .iter()
        .filter(|c| c.column_type.is_numeric() && !is_key_like(c))
        .collect();

    numeric
        .iter()
        .find(|c| name_variants(&c.name).iter().any(|v| contains_word(text, v)))
        .or_else(|| {
            numeric.iter().find(|c| {
                let lower = c.name.to_lowercase();
                MONEY_HINTS.iter().any(|hint| lower.contains(hint))
            })
        })
        .or_else(|| numeric.first())
        .copied()
}

fn pick_group_by<'a>(
    table: &'a TableInfo,
    text: &str,
    measure: Option<&ColumnInfo>,
) -> Option<&'a ColumnInfo> {
    static GROUPING: OnceLock<Option<Regex>> = OnceLock::new();
    let re = GROUPING
        .get_or_init(|| Regex::new(r"\b(?:by|per|for each)\s+([a-z0-9_ ]+)").ok())
        .as_ref()?;
    let phrase = re.captures(text)?.get(1)?.as_str().trim().to_string();

    let mut best: Option<(&ColumnInfo, usize)> = None;
    for column in &table.columns {
        if measure.is_some_and(|m| m.name == column.name) {
            continue;
        }
        let matched = name_variants(&column.name)
            .into_iter()
            .filter(|v| phrase == *v || phrase.starts_with(&format!("{} ", v)))
            .map(|v| v.len())
            .max();
        if let Some(len) = matched {
            if best.is_none_or(|(_, best_len)| len > best_len) {
                best = Some((column, len));
            }
        }
    }
    best.map(|(c, _)| c)
}

fn parse_filter(text: &str) -> Option<NumericFilter> {
    static FILTER: OnceLock<Option<Regex>> = OnceLock::new();
    let re = FILTER
        .get_or_init(|| {
            Regex::new(
                r"\b(above|over|more than|greater than|exceeding|at least|below|under|less than|at most)\s+\$?\s*([0-9][0-9,]*(?:\.[0-9]+)?)",
            )
            .ok()
        })
        .as_ref()?;

    let caps = re.captures(text)?;
    let op = match caps.get(1)?.as_str() {
        "at least" => ">=",
        "at most" => "<=",
        "below" | "under" | "less than" => "<",
        _ => ">",
    };
    let value = caps.get(2)?.as_str().replace(',', "");

    Some(NumericFilter { op, value })
}

fn where_clause(ctx: &RequestContext) -> String {
    match (&ctx.filter, ctx.measure) {
        (Some(filter), Some(measure)) => format!(
            " WHERE {} {} {}",
            quote_ident(&measure.name),
            filter.op,
            filter.value
        ),
        _ => String::new(),
    }
}

fn build_count(ctx: &RequestContext) -> String {
    let table = ctx.table.sql_name();
    match ctx.group_by {
        Some(group) => {
            let group = quote_ident(&group.name);
            format!(
                "SELECT {group}, COUNT(*) AS record_count FROM {table}{} GROUP BY {group} ORDER BY record_count DESC",
                where_clause(ctx)
            )
        }
        None => format!(
            "SELECT COUNT(*) AS record_count FROM {table}{}",
            where_clause(ctx)
        ),
    }
}

fn build_aggregate(ctx: &RequestContext, function: &str, prefix: &str) -> String {
    let table = ctx.table.sql_name();
    let Some(measure) = ctx.measure else {
        return format!("SELECT * FROM {} LIMIT {}", table, ctx.limit);
    };

    let column = quote_ident(&measure.name);
    let alias = quote_ident(&format!("{}_{}", prefix, measure.name.to_lowercase()));
    match ctx.group_by {
        Some(group) => {
            let group = quote_ident(&group.name);
            format!(
                "SELECT {group}, {function}({column}) AS {alias} FROM {table}{} GROUP BY {group} ORDER BY {alias} DESC",
                where_clause(ctx)
            )
        }
        None => format!(
            "SELECT {function}({column}) AS {alias} FROM {table}{}",
            where_clause(ctx)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn column(name: &str, declared: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            declared_type: declared.to_string(),
            column_type: ColumnType::from_sql_type(declared),
            nullable: name != "id",
            primary_key: name == "id",
        }
    }

    fn sample_schema() -> SchemaDescription {
        let mut customers = TableInfo::new("main", "customers");
        customers.columns = vec![
            column("id", "INTEGER"),
            column("name", "VARCHAR"),
            column("email", "VARCHAR"),
        ];

        let mut invoices = TableInfo::new("main", "invoices");
        invoices.columns = vec![
            column("id", "INTEGER"),
            column("customer_id", "INTEGER"),
            column("region", "VARCHAR"),
            column("grand_total", "DECIMAL(12,2)"),
            column("date_invoiced", "DATE"),
        ];

        SchemaDescription {
            tables: vec![customers, invoices],
            warnings: vec![],
        }
    }

    fn generate(request: &str) -> GeneratedQuery {
        FallbackGenerator::new(100).generate(&sample_schema(), request)
    }

    #[test]
    fn lists_the_mentioned_table() {
        let query = generate("Show me all customers");
        assert_eq!(query.sql(), "SELECT * FROM customers LIMIT 100");
        assert_eq!(query.provenance(), Provenance::Fallback);
    }

    #[test]
    fn counts_rows() {
        assert_eq!(
            generate("How many invoices do we have?").sql(),
            "SELECT COUNT(*) AS record_count FROM invoices"
        );
        // "account" must not trigger the count rule
        assert_eq!(
            generate("customers by account").sql(),
            "SELECT * FROM customers LIMIT 100"
        );
    }

    #[test]
    fn aggregates_the_money_column() {
        assert_eq!(
            generate("total invoice amount by region").sql(),
            "SELECT region, SUM(grand_total) AS total_grand_total FROM invoices GROUP BY region ORDER BY total_grand_total DESC"
        );
        assert_eq!(
            generate("average grand total of invoices").sql(),
            "SELECT AVG(grand_total) AS average_grand_total FROM invoices"
        );
    }

    #[test]
    fn filters_by_amount() {
        assert_eq!(
            generate("invoices above $1,500").sql(),
            "SELECT * FROM invoices WHERE grand_total > 1500 LIMIT 100"
        );
        assert_eq!(
            generate("count invoices under 20.5").sql(),
            "SELECT COUNT(*) AS record_count FROM invoices WHERE grand_total < 20.5"
        );
    }

    #[test]
    fn aggregate_rules_need_a_numeric_column() {
        // customers has no measure, so "total" falls through to a listing
        assert_eq!(
            generate("total customers").sql(),
            "SELECT * FROM customers LIMIT 100"
        );
    }

    #[test]
    fn unknown_tables_fall_back_to_the_first_table() {
        assert_eq!(
            generate("something about unicorns").sql(),
            "SELECT * FROM customers LIMIT 100"
        );
    }

    #[test]
    fn empty_schema_yields_empty_query() {
        let query = FallbackGenerator::new(100).generate(&SchemaDescription::default(), "anything");
        assert!(query.is_empty());
        assert_eq!(query.provenance(), Provenance::Fallback);
    }

    #[test]
    fn is_deterministic() {
        let schema = sample_schema();
        let generator = FallbackGenerator::new(50);
        let request = "sum of grand total of invoices per region above 10";
        let first = generator.generate(&schema, request);
        assert_eq!(
            first.sql(),
            "SELECT region, SUM(grand_total) AS total_grand_total FROM invoices WHERE grand_total > 10 GROUP BY region ORDER BY total_grand_total DESC"
        );
        for _ in 0..10 {
            let again = generator.generate(&schema, request);
            assert_eq!(first.sql(), again.sql());
        }
    }
}
