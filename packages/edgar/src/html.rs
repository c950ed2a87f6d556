//! HTML stripping for phrase detection over filing documents.

use scraper::{Html, Selector};

/// Strip markup and collapse whitespace. Script, style, and head content is
/// removed before text extraction so boilerplate never matches the
/// confirmation phrase.
pub fn clean_html(raw: &str) -> String {
    let document = Html::parse_document(raw);

    let mut stripped = document.root_element().html();
    for selector_str in ["script", "style", "head", "meta", "title"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            for element in document.select(&selector) {
                stripped = stripped.replace(&element.html(), " ");
            }
        }
    }

    let text_only = Html::parse_document(&stripped);
    let text: String = text_only.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_collapses_whitespace() {
        let html = "<html><body><p>initial   public\n offering</p></body></html>";
        assert_eq!(clean_html(html), "initial public offering");
    }

    #[test]
    fn drops_script_and_style_content() {
        let html = r#"<html><head><title>skip me</title><style>.x{color:red}</style></head>
            <body><script>var hidden = "phrase";</script><div>visible text</div></body></html>"#;
        let cleaned = clean_html(html);
        assert!(cleaned.contains("visible text"));
        assert!(!cleaned.contains("hidden"));
        assert!(!cleaned.contains("skip me"));
        assert!(!cleaned.contains("color:red"));
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(clean_html("already plain"), "already plain");
    }
}
