//! Renders log entries as colored HTML fragments for chat messages.

use crate::error::FormatError;
use crate::types::{LogEntry, Severity};
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Field that duplicates the message in logrus-style entries.
const MESSAGE_FIELD: &str = "msg";
const FIELD_SEPARATOR: &str = ", ";

/// Font color per severity, indexed by `Severity as usize`.
const LEVEL_COLORS: [&str; Severity::ALL.len()] = [
    "lightblue", // trace
    "lightblue", // debug
    "green",     // info
    "orange",    // warn
    "red",       // error
    "red",       // fatal
    "red",       // panic
];

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));

pub trait Formatter: Send + Sync {
    fn format(&self, entry: &LogEntry) -> Result<String, FormatError>;
}

pub fn color_for(level: Severity) -> &'static str {
    LEVEL_COLORS[level as usize]
}

/// `<font color="..">[k=v, ..] - message</font>`
#[derive(Debug, Clone, Default)]
pub struct HtmlFormatter {
    /// Wrap the message text in `<b>`.
    pub bold_messages: bool,
}

impl HtmlFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bold_messages(mut self, bold: bool) -> Self {
        self.bold_messages = bold;
        self
    }
}

impl Formatter for HtmlFormatter {
    fn format(&self, entry: &LogEntry) -> Result<String, FormatError> {
        let rendered = render_fields(entry);
        let fields = escape_html(&rendered);
        let message = escape_html(entry.message.trim());

        if fields.is_empty() && message.is_empty() {
            return Err(FormatError::EmptyEvent);
        }

        let mut html = format!(r#"<font color="{}">"#, color_for(entry.level));
        if !fields.is_empty() {
            html.push('[');
            html.push_str(&fields);
            html.push_str("] - ");
        }
        if !message.is_empty() {
            if self.bold_messages {
                html.push_str("<b>");
                html.push_str(&message);
                html.push_str("</b>");
            } else {
                html.push_str(&message);
            }
        }
        html.push_str("</font>");
        Ok(html)
    }
}

/// `key=value` pairs in key order, skipping the `msg` field.
pub fn render_fields(entry: &LogEntry) -> String {
    entry
        .fields
        .iter()
        .filter(|(key, _)| key.as_str() != MESSAGE_FIELD)
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => format!("{}={}", key, s),
            other => format!("{}={}", key, other),
        })
        .collect::<Vec<_>>()
        .join(FIELD_SEPARATOR)
}

pub fn escape_html(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Strips tags and unescapes what [`escape_html`] produces.
pub fn to_plain_text(html: &str) -> String {
    TAG.replace_all(html, "")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
