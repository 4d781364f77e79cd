use serde::Serialize;
use sqlparser::tokenizer::Token;
use std::fmt;

use crate::schema::contains_word;
use crate::sql::guard::{bare_keyword, tokenize};

/// What the request asks for, judged from its wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Aggregation,
    Counting,
    Average,
    Listing,
    Comparison,
    TrendAnalysis,
    General,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryType::Aggregation => "aggregation",
            QueryType::Counting => "counting",
            QueryType::Average => "average",
            QueryType::Listing => "listing",
            QueryType::Comparison => "comparison",
            QueryType::TrendAnalysis => "trend_analysis",
            QueryType::General => "general",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

// First match wins.
const REQUEST_KINDS: &[(QueryType, &[&str])] = &[
    (
        QueryType::Aggregation,
        &["sum", "total", "amount", "sales", "revenue", "cost", "price"],
    ),
    (
        QueryType::Counting,
        &["count", "number", "number of", "how many", "quantity"],
    ),
    (QueryType::Average, &["average", "avg", "mean", "median"]),
    (
        QueryType::Listing,
        &["list", "show", "display", "get", "find", "search"],
    ),
    (
        QueryType::Comparison,
        &["compare", "difference", "vs", "versus"],
    ),
    (
        QueryType::TrendAnalysis,
        &["trend", "over time", "monthly", "yearly", "daily"],
    ),
];

pub fn classify_request(request: &str) -> QueryType {
    let text = request.to_lowercase();
    REQUEST_KINDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| contains_word(&text, w)))
        .map_or(QueryType::General, |(kind, _)| *kind)
}

/// Scores the SQL's structure: joins, grouping, set operations, CTEs, CASE and
/// nesting all add weight.
pub fn assess_complexity(sql: &str) -> Complexity {
    let Ok(tokens) = tokenize(sql) else {
        return Complexity::Low;
    };

    let has = |word: &str| tokens.iter().any(|t| bare_keyword(t).as_deref() == Some(word));
    let weights = [
        ("JOIN", 2),
        ("GROUP", 1),
        ("HAVING", 1),
        ("UNION", 2),
        ("WITH", 2),
        ("CASE", 1),
    ];

    let mut score: u32 = weights
        .iter()
        .filter(|(word, _)| has(word))
        .map(|(_, weight)| weight)
        .sum();
    if tokens.iter().any(|t| matches!(t, Token::LParen)) {
        score += 1;
    }

    match score {
        0..=1 => Complexity::Low,
        2..=3 => Complexity::Medium,
        _ => Complexity::High,
    }
}
