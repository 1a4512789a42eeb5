use crate::error::EngineError;
use crate::matcher::CompiledMatcher;
use tracing::error;

/// Escapes the five HTML-significant characters.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 8);
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Renders `content` as HTML with every keyword occurrence replaced by the
/// anchor returned from `link_lookup`.
///
/// `link_lookup` must come from the same snapshot as `matcher`; a keyword it
/// cannot resolve is reported as [`EngineError::LinkLookupMissing`].
pub fn render<'a, F>(
    content: &str,
    matcher: &CompiledMatcher,
    line_break: &str,
    link_lookup: F,
) -> Result<String, EngineError>
where
    F: Fn(&str) -> Option<&'a str>,
{
    if content.is_empty() {
        return Ok(String::new());
    }
    let escaped = escape_html(content);
    let mut out = String::with_capacity(escaped.len() + escaped.len() / 4);
    let mut cursor = 0;
    for found in matcher.scan(&escaped) {
        let Some(link) = link_lookup(found.keyword) else {
            error!(
                keyword = found.keyword,
                generation = matcher.generation(),
                "matched keyword has no link"
            );
            return Err(EngineError::LinkLookupMissing {
                keyword: found.keyword.to_string(),
            });
        };
        push_text(&mut out, &escaped[cursor..found.start], line_break);
        out.push_str(link);
        cursor = found.end;
    }
    push_text(&mut out, &escaped[cursor..], line_break);
    Ok(out)
}

// Links are spliced verbatim; only plain text spans get line breaks.
fn push_text(out: &mut String, text: &str, line_break: &str) {
    let mut lines = text.split('\n');
    if let Some(first) = lines.next() {
        out.push_str(first);
    }
    for line in lines {
        out.push_str(line_break);
        out.push_str(line);
    }
}
