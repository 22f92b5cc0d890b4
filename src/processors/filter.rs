use regex::{Regex, RegexBuilder};
use scraper::{Html, Selector};
use tracing::debug;

use crate::models::Watch;
use crate::utils::error::CheckError;

/// Narrows fetched content to the text that gets compared.
pub trait TextFilter: Send + Sync {
    fn apply(&self, content: &str, content_type: &str, watch: &Watch) -> Result<String, CheckError>;
}

/// CSS include filters, HTML-to-text and regex extraction.
#[derive(Debug, Clone, Default)]
pub struct HtmlTextFilter;

impl HtmlTextFilter {
    pub fn new() -> Self {
        Self
    }
}

fn looks_like_html(content: &str, content_type: &str) -> bool {
    let content_type = content_type.to_lowercase();
    if content_type.contains("html") || content_type.contains("xml") {
        return true;
    }
    if content_type.is_empty() {
        return content.trim_start().starts_with('<');
    }
    false
}

fn is_xpath(filter: &str) -> bool {
    let filter = filter.trim();
    filter.starts_with('/') || filter.starts_with("(/") || filter.starts_with("xpath:")
}

/// Outer HTML of everything the include filters matched. `None` when no
/// filter matched anything.
fn select_fragments(document: &Html, filters: &[String]) -> Result<Option<String>, CheckError> {
    let mut fragments = Vec::new();
    for filter in filters.iter().map(|f| f.trim()).filter(|f| !f.is_empty()) {
        if is_xpath(filter) {
            return Err(CheckError::Unexpected(format!(
                "xPath filter '{}' is not supported for this content",
                filter
            )));
        }
        let selector = Selector::parse(filter)
            .map_err(|e| CheckError::Unexpected(format!("Invalid CSS filter '{}': {:?}", filter, e)))?;
        fragments.extend(document.select(&selector).map(|el| el.html()));
    }
    if fragments.is_empty() {
        Ok(None)
    } else {
        Ok(Some(fragments.join("\n")))
    }
}

/// Visible text, one non-empty text node per line.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let skip = Selector::parse("script, style, noscript, template").ok();
    let hidden: Vec<_> = skip
        .as_ref()
        .map(|s| document.select(s).map(|el| el.id()).collect())
        .unwrap_or_default();

    let mut lines = Vec::new();
    for node in document.tree.nodes() {
        let Some(text) = node.value().as_text() else { continue };
        if node.ancestors().any(|a| hidden.contains(&a.id())) {
            continue;
        }
        let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}

/// `/pattern/flags` is a regex; anything else a case-insensitive literal.
fn compile_extract(rule: &str) -> Result<Regex, CheckError> {
    let rule = rule.trim();
    let (pattern, flags) = match rule.strip_prefix('/').and_then(|r| r.rsplit_once('/')) {
        Some((pattern, flags)) if !pattern.is_empty() => (pattern.to_string(), flags),
        _ => (regex::escape(rule), "i"),
    };
    RegexBuilder::new(&pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .build()
        .map_err(|e| CheckError::Unexpected(format!("Invalid extract rule '{}': {}", rule, e)))
}

/// Every match of every rule, one per line. Capture groups are joined with
/// a space when present.
pub fn extract_matches(text: &str, rules: &[String]) -> Result<String, CheckError> {
    let mut lines = Vec::new();
    for rule in rules.iter().filter(|r| !r.trim().is_empty()) {
        let regex = compile_extract(rule)?;
        for caps in regex.captures_iter(text) {
            let groups: Vec<&str> = caps.iter().skip(1).flatten().map(|m| m.as_str()).collect();
            if groups.is_empty() {
                if let Some(whole) = caps.get(0) {
                    lines.push(whole.as_str().to_string());
                }
            } else {
                lines.push(groups.join(" "));
            }
        }
    }
    Ok(lines.join("\n"))
}

impl TextFilter for HtmlTextFilter {
    fn apply(&self, content: &str, content_type: &str, watch: &Watch) -> Result<String, CheckError> {
        let filters: Vec<String> = watch
            .include_filters
            .iter()
            .filter(|f| !f.trim().is_empty())
            .cloned()
            .collect();

        let mut text = if looks_like_html(content, content_type) {
            let html = if filters.is_empty() {
                content.to_string()
            } else {
                let document = Html::parse_document(content);
                select_fragments(&document, &filters)?.ok_or_else(|| {
                    CheckError::FilterNotFoundInResponse {
                        filter: filters.join(", "),
                    }
                })?
            };
            html_to_text(&html)
        } else {
            debug!("Skipping HTML filters for content type '{}'", content_type);
            content.to_string()
        };

        if !watch.extract_text.is_empty() {
            text = extract_matches(&text, &watch.extract_text)?;
        }

        if text.trim().is_empty() && !content.trim().is_empty() {
            return Err(CheckError::ReplyWithContentButNoText);
        }
        Ok(text.trim().to_string())
    }
}
