use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a generated query came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Ai,
    Fallback,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Ai => write!(f, "ai"),
            Provenance::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

// Optional layout hints the model may return next to the SQL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutHints {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub orientation: Option<Orientation>,
    #[serde(default)]
    pub show_summary: Option<bool>,
}

/// SQL produced for one request. An empty query means generation had nothing to work with.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedQuery {
    sql: String,
    provenance: Provenance,
    explanation: Option<String>,
    hints: LayoutHints,
}

impl GeneratedQuery {
    pub fn new(sql: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            sql: sql.into(),
            provenance,
            explanation: None,
            hints: LayoutHints::default(),
        }
    }

    pub fn empty(provenance: Provenance, reason: impl Into<String>) -> Self {
        Self {
            sql: String::new(),
            provenance,
            explanation: Some(reason.into()),
            hints: LayoutHints::default(),
        }
    }

    pub fn with_explanation(mut self, explanation: Option<String>) -> Self {
        self.explanation = explanation;
        self
    }

    pub fn with_hints(mut self, hints: LayoutHints) -> Self {
        self.hints = hints;
        self
    }

    /// Same query with different SQL text (after gating or limiting).
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = sql.into();
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    pub fn hints(&self) -> &LayoutHints {
        &self.hints
    }

    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }
}
