use arrow::datatypes::DataType as ArrowType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::sql::quote_ident;

/// Schemas whose tables are referenced without qualification.
pub const DEFAULT_SCHEMAS: [&str; 2] = ["main", "public"];

/// Normalized column type, shared by schema metadata and query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    BigInt,
    Double,
    Decimal,
    Text,
    Boolean,
    Date,
    Time,
    Timestamp,
    Unknown(String),
}

/// The four report-level categories a column can fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldCategory {
    Text,
    Numeric,
    Date,
    Boolean,
}

impl ColumnType {
    /// Maps a declared SQL type name (DuckDB or PostgreSQL spelling).
    pub fn from_sql_type(declared: &str) -> Self {
        let upper = declared.trim().to_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();

        match base {
            "TINYINT" | "SMALLINT" | "INTEGER" | "INT" | "INT1" | "INT2" | "INT4" | "SIGNED"
            | "SHORT" | "UTINYINT" | "USMALLINT" | "SERIAL" | "SMALLSERIAL" => ColumnType::Integer,
            "BIGINT" | "INT8" | "LONG" | "HUGEINT" | "UHUGEINT" | "UBIGINT" | "UINTEGER"
            | "BIGSERIAL" => ColumnType::BigInt,
            "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" | "FLOAT4" | "FLOAT8" | "REAL" => {
                ColumnType::Double
            }
            "DECIMAL" | "NUMERIC" | "MONEY" => ColumnType::Decimal,
            "VARCHAR" | "CHAR" | "BPCHAR" | "TEXT" | "STRING" | "CHARACTER"
            | "CHARACTER VARYING" | "UUID" | "NVARCHAR" | "ENUM" => ColumnType::Text,
            "BOOLEAN" | "BOOL" | "LOGICAL" => ColumnType::Boolean,
            "DATE" => ColumnType::Date,
            "TIME" | "TIME WITHOUT TIME ZONE" => ColumnType::Time,
            "TIMESTAMP" | "DATETIME" | "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE"
            | "TIMESTAMP WITHOUT TIME ZONE" | "TIMESTAMP_S" | "TIMESTAMP_MS" | "TIMESTAMP_NS" => {
                ColumnType::Timestamp
            }
            _ => ColumnType::Unknown(declared.trim().to_string()),
        }
    }

    pub fn category(&self) -> FieldCategory {
        match self {
            ColumnType::Integer | ColumnType::BigInt | ColumnType::Double | ColumnType::Decimal => {
                FieldCategory::Numeric
            }
            ColumnType::Date | ColumnType::Time | ColumnType::Timestamp => FieldCategory::Date,
            ColumnType::Boolean => FieldCategory::Boolean,
            ColumnType::Text | ColumnType::Unknown(_) => FieldCategory::Text,
        }
    }

    /// JasperReports field class for this column type.
    pub fn java_class(&self) -> &'static str {
        match self {
            ColumnType::Integer => "java.lang.Integer",
            ColumnType::BigInt => "java.lang.Long",
            ColumnType::Double => "java.lang.Double",
            ColumnType::Decimal => "java.math.BigDecimal",
            ColumnType::Boolean => "java.lang.Boolean",
            ColumnType::Date => "java.util.Date",
            ColumnType::Time => "java.sql.Time",
            ColumnType::Timestamp => "java.sql.Timestamp",
            ColumnType::Text | ColumnType::Unknown(_) => "java.lang.String",
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.category() == FieldCategory::Numeric
    }
}

impl From<&ArrowType> for ColumnType {
    fn from(data_type: &ArrowType) -> Self {
        match data_type {
            ArrowType::Int8
            | ArrowType::Int16
            | ArrowType::Int32
            | ArrowType::UInt8
            | ArrowType::UInt16 => ColumnType::Integer,
            ArrowType::Int64 | ArrowType::UInt32 | ArrowType::UInt64 => ColumnType::BigInt,
            ArrowType::Float16 | ArrowType::Float32 | ArrowType::Float64 => ColumnType::Double,
            ArrowType::Decimal128(_, _) | ArrowType::Decimal256(_, _) => ColumnType::Decimal,
            ArrowType::Utf8 | ArrowType::LargeUtf8 | ArrowType::Utf8View => ColumnType::Text,
            ArrowType::Boolean => ColumnType::Boolean,
            ArrowType::Date32 | ArrowType::Date64 => ColumnType::Date,
            ArrowType::Time32(_) | ArrowType::Time64(_) => ColumnType::Time,
            ArrowType::Timestamp(_, _) => ColumnType::Timestamp,
            ArrowType::Dictionary(_, value) => ColumnType::from(value.as_ref()),
            other => ColumnType::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
}

/// Declared keys are authoritative; heuristic ones come from `<name>_id` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    Declared,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
    pub kind: RelationshipKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub unique: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    /// Lookup key: bare for default schemas, `schema.table` otherwise.
    pub name: String,
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub relationships: Vec<Relationship>,
    pub indexes: Vec<IndexInfo>,
    pub row_count: u64,
    pub sample_rows: Vec<Map<String, Value>>,
}

impl TableInfo {
    pub fn new(schema: &str, table: &str) -> Self {
        Self {
            name: table_key(schema, table),
            schema: schema.to_string(),
            table: table.to_string(),
            columns: Vec::new(),
            relationships: Vec::new(),
            indexes: Vec::new(),
            row_count: 0,
            sample_rows: Vec::new(),
        }
    }

    pub fn has_primary_key(&self) -> bool {
        self.columns.iter().any(|c| c.primary_key)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Length of the longest form of this table's name mentioned in `text` (lowercase).
    pub fn mention_length(&self, text: &str) -> Option<usize> {
        let mut candidates = name_variants(&self.table);
        if self.name != self.table {
            candidates.push(self.name.to_lowercase());
        }

        candidates
            .iter()
            .filter(|c| contains_word(text, c))
            .map(|c| c.len())
            .max()
    }

    /// Table reference usable inside generated SQL.
    pub fn sql_name(&self) -> String {
        if is_default_schema(&self.schema) {
            quote_ident(&self.table)
        } else {
            format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub tables: Vec<TableInfo>,
    pub warnings: Vec<String>,
}

impl SchemaDescription {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Looks a table up by key, bare name or `schema.table`, case-insensitively.
    /// `main.x` and `public.x` both resolve to a table in a default schema.
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        let wanted = name.trim().trim_matches('"');
        if let Some(found) = self
            .tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(wanted))
            .or_else(|| self.tables.iter().find(|t| t.table.eq_ignore_ascii_case(wanted)))
        {
            return Some(found);
        }

        let parts: Vec<&str> = wanted.split('.').map(|p| p.trim().trim_matches('"')).collect();
        let [.., schema, table] = parts.as_slice() else {
            return None;
        };
        self.tables.iter().find(|t| {
            t.table.eq_ignore_ascii_case(table)
                && (t.schema.eq_ignore_ascii_case(schema)
                    || (is_default_schema(schema) && is_default_schema(&t.schema)))
        })
    }

    /// Adds `<singular>_id -> <table>.id` relationships where nothing is declared.
    pub fn infer_heuristic_relationships(&mut self) {
        let targets: Vec<(String, String, String)> = self
            .tables
            .iter()
            .filter(|t| t.has_primary_key() && t.column("id").is_some())
            .map(|t| (t.name.clone(), t.table.to_lowercase(), singularize(&t.table.to_lowercase())))
            .collect();

        for table in self.tables.iter_mut() {
            if !table.has_primary_key() {
                continue;
            }

            let mut inferred = Vec::new();
            for column in &table.columns {
                let lower = column.name.to_lowercase();
                let Some(prefix) = lower.strip_suffix("_id") else {
                    continue;
                };
                if prefix.is_empty()
                    || table.relationships.iter().any(|r| r.source_column == column.name)
                {
                    continue;
                }

                let target = targets
                    .iter()
                    .find(|(_, plain, singular)| singular == prefix || plain == prefix);

                if let Some((target_name, _, _)) = target {
                    if *target_name == table.name && column.primary_key {
                        continue;
                    }
                    inferred.push(Relationship {
                        source_column: column.name.clone(),
                        target_table: target_name.clone(),
                        target_column: "id".to_string(),
                        kind: RelationshipKind::Heuristic,
                    });
                }
            }
            table.relationships.extend(inferred);
        }
    }
}

pub fn is_default_schema(schema: &str) -> bool {
    DEFAULT_SCHEMAS.iter().any(|s| s.eq_ignore_ascii_case(schema))
}

pub fn table_key(schema: &str, table: &str) -> String {
    if is_default_schema(schema) || schema.is_empty() {
        table.to_string()
    } else {
        format!("{}.{}", schema, table)
    }
}

/// Lowercase name, its singular, and both with underscores read as spaces.
pub fn name_variants(name: &str) -> Vec<String> {
    let lower = name.to_lowercase();
    let mut variants = vec![lower.clone(), singularize(&lower)];
    if lower.contains('_') {
        let spaced = lower.replace('_', " ");
        variants.push(singularize(&spaced));
        variants.push(spaced);
    }
    variants.dedup();
    variants
}

/// Whole-word match of `word` inside `text`, with `\b` boundary rules.
pub fn contains_word(text: &str, word: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let (Some(first), Some(last)) = (word.chars().next(), word.chars().next_back()) else {
        return false;
    };

    text.match_indices(word).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + word.len()..].chars().next();
        before.is_some_and(is_word) != is_word(first)
            && after.is_some_and(is_word) != is_word(last)
    })
}

/// English plural to singular, good enough for table names.
pub fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{}y", stem);
        }
    }
    for suffix in ["sses", "ches", "shes", "xes", "zes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with('s') && !word.ends_with("ss") && word.len() > 1 {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}
