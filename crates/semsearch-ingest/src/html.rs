//! Visible-text extraction from HTML pages.

use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};

/// Elements whose content is never user-visible text.
const SKIPPED_ELEMENTS: [&str; 7] = ["script", "style", "noscript", "iframe", "svg", "template", "head"];

/// Extract the visible text of an HTML document, one text run per line.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts = Vec::new();
    collect_text(document.root_element(), &mut parts);
    parts.join("\n")
}

/// The trimmed `<title>` of a page, if it has a non-empty one.
pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn collect_text(element: ElementRef<'_>, parts: &mut Vec<String>) {
    if SKIPPED_ELEMENTS.contains(&element.value().name()) {
        return;
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
            Node::Element(_) => {
                if let Some(child_element) = ElementRef::wrap(child) {
                    collect_text(child_element, parts);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_skips_scripts_and_styles() {
        let html = r#"<html><head><title>T</title><style>p{color:red}</style></head>
            <body><h1>Hello</h1><script>var x = 1;</script><p>World</p></body></html>"#;
        let text = extract_text(html);
        assert_eq!(text, "Hello\nWorld");
    }

    #[test]
    fn test_extract_text_without_body() {
        let text = extract_text("just <b>bold</b> text");
        assert!(text.contains("just"));
        assert!(text.contains("bold"));
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(
            extract_title("<html><head><title> Docs </title></head></html>").as_deref(),
            Some("Docs")
        );
        assert_eq!(extract_title("<html><body>x</body></html>"), None);
        assert_eq!(extract_title("<title>   </title>"), None);
    }
}
