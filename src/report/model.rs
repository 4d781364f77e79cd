use serde::Serialize;
use serde_json::{Map, Value};

use crate::llm::models::Orientation;
use crate::schema::ColumnType;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultColumn {
    pub name: String,
    pub column_type: ColumnType,
}

/// Shape and rows of an executed query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Map<String, Value>>,
    /// Set when the executor's row limit cut the result short.
    pub truncated: bool,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextAlignment {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportField {
    /// Sanitized JRXML field name.
    pub name: String,
    /// Column label in the result set.
    pub source_column: String,
    pub header: String,
    pub field_type: ColumnType,
    pub class_name: &'static str,
    pub x: u32,
    pub width: u32,
    pub alignment: TextAlignment,
    pub pattern: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageLayout {
    pub orientation: Orientation,
    pub page_width: u32,
    pub page_height: u32,
    pub margin: u32,
}

impl PageLayout {
    pub const PORTRAIT: PageLayout = PageLayout {
        orientation: Orientation::Portrait,
        page_width: 595,
        page_height: 842,
        margin: 20,
    };

    pub const LANDSCAPE: PageLayout = PageLayout {
        orientation: Orientation::Landscape,
        page_width: 842,
        page_height: 595,
        margin: 20,
    };

    pub fn column_width(&self) -> u32 {
        self.page_width - 2 * self.margin
    }

    pub fn orientation_name(&self) -> &'static str {
        match self.orientation {
            Orientation::Portrait => "Portrait",
            Orientation::Landscape => "Landscape",
        }
    }
}

/// Everything the template needs for one JRXML file.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSpec {
    pub title: String,
    pub report_name: String,
    pub fields: Vec<ReportField>,
    pub layout: PageLayout,
    pub show_summary: bool,
    pub sql: String,
    pub row_count: usize,
}
