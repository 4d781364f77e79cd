use serde_json::Value;
use std::collections::HashSet;

use crate::llm::models::{LayoutHints, Orientation};
use crate::report::model::{PageLayout, QueryResult, ReportField, ReportSpec, TextAlignment};
use crate::schema::{ColumnType, FieldCategory};

pub const MIN_COLUMN_WIDTH: u32 = 40;
pub const MAX_COLUMN_WIDTH: u32 = 200;
const CHAR_WIDTH: u32 = 7;
const COLUMN_PADDING: u32 = 10;
/// Rows inspected when sizing columns.
const WIDTH_SAMPLE_ROWS: usize = 100;

/// Inputs besides the result itself.
pub struct ReportOptions<'a> {
    pub title: &'a str,
    pub report_name: &'a str,
    pub sql: &'a str,
    pub hints: &'a LayoutHints,
}

pub fn build_spec(result: &QueryResult, options: &ReportOptions) -> ReportSpec {
    let names = field_names(result.columns.iter().map(|c| c.name.as_str()));

    let widths: Vec<u32> = result
        .columns
        .iter()
        .map(|c| column_width(&header_label(&c.name), &c.name, result))
        .collect();
    let (layout, widths) = fit_to_page(widths, options.hints.orientation);

    let mut x = 0;
    let fields = result
        .columns
        .iter()
        .zip(names)
        .zip(widths)
        .map(|((column, name), width)| {
            let field = ReportField {
                name,
                source_column: column.name.clone(),
                header: header_label(&column.name),
                field_type: column.column_type.clone(),
                class_name: column.column_type.java_class(),
                x,
                width,
                alignment: alignment(&column.column_type),
                pattern: pattern(&column.column_type),
            };
            x += width;
            field
        })
        .collect();

    let title = options
        .hints
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| title_case(options.title));

    ReportSpec {
        title,
        report_name: options.report_name.to_string(),
        fields,
        layout,
        show_summary: options.hints.show_summary.unwrap_or(true),
        sql: options.sql.to_string(),
        row_count: result.row_count(),
    }
}

/// Maps column labels to unique `[A-Za-z_][A-Za-z0-9_]*` field names.
pub fn field_names<'a>(columns: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut taken = HashSet::new();
    let mut names = Vec::new();

    for column in columns {
        let mut base: String = column
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        if base.is_empty() {
            base = "field".to_string();
        }
        if base.starts_with(|c: char| c.is_ascii_digit()) {
            base.insert(0, '_');
        }

        let mut name = base.clone();
        let mut suffix = 2;
        while taken.contains(&name) {
            name = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        taken.insert(name.clone());
        names.push(name);
    }

    names
}

/// `created_at` -> `Created At`.
pub fn header_label(column: &str) -> String {
    title_case(&column.replace('_', " "))
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn display_len(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        other => other.to_string().chars().count(),
    }
}

fn column_width(header: &str, column: &str, result: &QueryResult) -> u32 {
    let longest_value = result
        .rows
        .iter()
        .take(WIDTH_SAMPLE_ROWS)
        .filter_map(|row| row.get(column))
        .map(display_len)
        .max()
        .unwrap_or(0);

    let chars = header.chars().count().max(longest_value) as u32;
    (chars.saturating_mul(CHAR_WIDTH).saturating_add(COLUMN_PADDING))
        .clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH)
}

/// Portrait when the columns fit, landscape otherwise, scaled down if still too wide.
fn fit_to_page(widths: Vec<u32>, requested: Option<Orientation>) -> (PageLayout, Vec<u32>) {
    let total: u32 = widths.iter().sum();

    let layout = if requested == Some(Orientation::Landscape)
        || total > PageLayout::PORTRAIT.column_width()
    {
        PageLayout::LANDSCAPE
    } else {
        PageLayout::PORTRAIT
    };

    let available = layout.column_width();
    if total <= available {
        return (layout, widths);
    }

    let scaled = widths
        .iter()
        .map(|w| ((*w as u64 * available as u64) / total as u64).max(1) as u32)
        .collect();
    (layout, scaled)
}

fn alignment(column_type: &ColumnType) -> TextAlignment {
    match column_type.category() {
        FieldCategory::Numeric => TextAlignment::Right,
        FieldCategory::Date | FieldCategory::Boolean => TextAlignment::Center,
        FieldCategory::Text => TextAlignment::Left,
    }
}

fn pattern(column_type: &ColumnType) -> Option<&'static str> {
    match column_type {
        ColumnType::Integer | ColumnType::BigInt => Some("#,##0"),
        ColumnType::Double | ColumnType::Decimal => Some("#,##0.00"),
        ColumnType::Date => Some("yyyy-MM-dd"),
        ColumnType::Time => Some("HH:mm:ss"),
        ColumnType::Timestamp => Some("yyyy-MM-dd HH:mm"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::model::ResultColumn;
    use serde_json::{Map, json};

    fn result(columns: &[(&str, ColumnType)], rows: Vec<Value>) -> QueryResult {
        QueryResult {
            columns: columns
                .iter()
                .map(|(name, t)| ResultColumn {
                    name: name.to_string(),
                    column_type: t.clone(),
                })
                .collect(),
            rows: rows
                .into_iter()
                .map(|v| match v {
                    Value::Object(map) => map,
                    _ => Map::new(),
                })
                .collect(),
            truncated: false,
        }
    }

    fn options(hints: &LayoutHints) -> ReportOptions<'_> {
        ReportOptions {
            title: "sales by region",
            report_name: "report_1",
            sql: "SELECT 1",
            hints,
        }
    }

    #[test]
    fn sanitizes_and_deduplicates_field_names() {
        let names = field_names(
            ["id", "order total ($)", "1st", "", "id", "Ünïcode"].into_iter(),
        );
        assert_eq!(
            names,
            vec!["id", "order_total____", "_1st", "field", "id_2", "_n_code"]
        );
    }

    #[test]
    fn widths_follow_header_and_values() {
        let r = result(
            &[("id", ColumnType::Integer), ("description", ColumnType::Text)],
            vec![json!({"id": 1, "description": "x".repeat(100)})],
        );
        let spec = build_spec(&r, &options(&LayoutHints::default()));

        // "Id" is 2 chars: 2*7+10 = 24, clamped to the minimum
        assert_eq!(spec.fields[0].width, MIN_COLUMN_WIDTH);
        assert_eq!(spec.fields[1].width, MAX_COLUMN_WIDTH);
        assert_eq!(spec.fields[1].x, MIN_COLUMN_WIDTH);
        assert_eq!(spec.layout, PageLayout::PORTRAIT);
        assert_eq!(spec.fields[0].alignment, TextAlignment::Right);
        assert_eq!(spec.title, "Sales By Region");
    }

    #[test]
    fn wide_results_switch_to_landscape_and_scale() {
        let columns: Vec<(String, ColumnType)> = (0..10)
            .map(|i| (format!("a_rather_long_column_name_{}", i), ColumnType::Text))
            .collect();
        let refs: Vec<(&str, ColumnType)> =
            columns.iter().map(|(n, t)| (n.as_str(), t.clone())).collect();
        let spec = build_spec(&result(&refs, vec![]), &options(&LayoutHints::default()));

        assert_eq!(spec.layout, PageLayout::LANDSCAPE);
        let total: u32 = spec.fields.iter().map(|f| f.width).sum();
        assert!(total <= PageLayout::LANDSCAPE.column_width());
        assert!(spec.fields.windows(2).all(|w| w[1].x == w[0].x + w[0].width));
    }

    #[test]
    fn hints_override_title_orientation_and_summary() {
        let hints = LayoutHints {
            title: Some("Quarterly Sales".to_string()),
            orientation: Some(Orientation::Landscape),
            show_summary: Some(false),
        };
        let r = result(&[("id", ColumnType::Integer)], vec![]);
        let spec = build_spec(&r, &options(&hints));

        assert_eq!(spec.title, "Quarterly Sales");
        assert_eq!(spec.layout, PageLayout::LANDSCAPE);
        assert!(!spec.show_summary);
    }
}
