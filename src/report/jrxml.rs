use minijinja::{Environment, context};
use tracing::{debug, error};

use crate::error::ReportError;
use crate::report::model::ReportSpec;

const REPORT_TEMPLATE: &str = "report.jrxml";

/// Renders report specs into JasperReports JRXML.
pub struct JrxmlGenerator {
    env: Environment<'static>,
}

impl JrxmlGenerator {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);

        env.add_template(REPORT_TEMPLATE, include_str!("../../templates/report.jrxml"))?;

        env.add_filter("xml", |value: String| escape_xml(&value));
        env.add_filter("cdata", |value: String| escape_cdata(&value));
        env.add_filter("java_string", |value: String| java_string_literal(&value));

        Ok(Self { env })
    }

    pub fn render(&self, spec: &ReportSpec) -> Result<String, ReportError> {
        let template = self.env.get_template(REPORT_TEMPLATE).map_err(|e| {
            error!("Report template not found: {}", e);
            ReportError::Internal(format!("report template unavailable: {}", e))
        })?;

        let jrxml = template
            .render(context! {
                report => spec,
                orientation => spec.layout.orientation_name(),
                column_width => spec.layout.column_width(),
            })
            .map_err(|e| {
                error!("Report template render error: {}", e);
                ReportError::Internal(format!("failed to render report: {}", e))
            })?;

        debug!(
            "Rendered report {} with {} fields ({} bytes)",
            spec.report_name,
            spec.fields.len(),
            jrxml.len()
        );
        Ok(jrxml)
    }
}

/// XML 1.0 forbids most control characters even inside CDATA.
fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\u{FFFE}' && c != '\u{FFFF}')
}

pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars().filter(|c| is_xml_char(*c)) {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            _ => out.push(c),
        }
    }
    out
}

/// Content for a `<![CDATA[...]]>` section; `]]>` is split across two sections.
pub fn escape_cdata(value: &str) -> String {
    value
        .chars()
        .filter(|c| is_xml_char(*c))
        .collect::<String>()
        .replace("]]>", "]]]]><![CDATA[>")
}

const CHUNK_MARKERS: &[&str] = &["F{", "P{", "V{", "R{", "X{", "P!{"];

/// A quoted Java string literal for use inside report expressions. A `$` that
/// would open a field, parameter, variable or resource chunk is doubled.
pub fn java_string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for (i, c) in value.char_indices() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' if CHUNK_MARKERS.iter().any(|m| value[i + 1..].starts_with(m)) => {
                out.push_str("$$")
            }
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
