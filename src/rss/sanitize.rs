//! HTML to plain-text conversion for excerpts.

use scraper::{ElementRef, Html};

/// Elements whose content never contributes text.
const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "template", "img", "picture", "iframe", "svg", "video",
    "audio", "object", "embed", "canvas",
];

/// Strip HTML from `html` and bound the result to `max_length` characters.
///
/// Returns `None` for missing or empty input and for markup without any text.
/// Longer text is cut to `max_length - 3` characters, trimmed back to the last
/// space, and suffixed with `"..."`.
pub fn strip_html(html: Option<&str>, max_length: usize) -> Option<String> {
    let html = html?;
    if html.trim().is_empty() {
        return None;
    }

    let fragment = Html::parse_fragment(html);
    let mut raw = String::with_capacity(html.len());
    collect_text(fragment.root_element(), &mut raw);

    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }

    Some(truncate_text(&text, max_length))
}

fn collect_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        if let Some(el) = child.value().as_element() {
            if SKIPPED_ELEMENTS.contains(&el.name()) {
                continue;
            }
            if let Some(child_ref) = ElementRef::wrap(child) {
                collect_text(child_ref, out);
            }
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        }
    }
}

/// Cut `text` to at most `max_length` characters on a word boundary.
fn truncate_text(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }

    // No room for an ellipsis.
    if max_length < 3 {
        return text.chars().take(max_length).collect();
    }

    let head: String = text.chars().take(max_length - 3).collect();
    let head = match head.rfind(' ') {
        Some(idx) => &head[..idx],
        None => head.as_str(),
    };
    format!("{head}...")
}
