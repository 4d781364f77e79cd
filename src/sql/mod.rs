pub mod classify;
pub mod fallback;
pub mod guard;

use crate::sql::guard::FORBIDDEN_KEYWORDS;

const RESERVED: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "between", "both", "by",
    "case", "cast", "check", "collate", "column", "constraint", "cross", "default", "desc",
    "distinct", "else", "end", "except", "false", "fetch", "for", "foreign", "from", "full",
    "group", "having", "in", "inner", "intersect", "into", "is", "join", "lateral", "left",
    "like", "limit", "natural", "not", "null", "offset", "on", "only", "or", "order", "outer",
    "over", "partition", "pivot", "primary", "qualify", "range", "references", "returning",
    "right", "rows", "select", "table", "then", "to", "true", "union", "unique", "unpivot",
    "user", "using", "values", "when", "where", "window", "with",
];

/// Quotes an identifier unless it is a plain lowercase name. Reserved words and
/// anything the read-only gate rejects as a bare keyword are always quoted.
pub fn quote_ident(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !RESERVED.contains(&name)
        && !FORBIDDEN_KEYWORDS.iter().any(|kw| kw.eq_ignore_ascii_case(name));

    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}
