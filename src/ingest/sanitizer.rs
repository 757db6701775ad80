//! HTML sanitization for submitted content

use scraper::Html;

/// Strip HTML tags and collapse whitespace.
pub fn clean_html(html_content: &str) -> String {
    if html_content.is_empty() {
        return String::new();
    }

    let document = Html::parse_document(html_content);
    let text: Vec<&str> = document.root_element().text().collect();
    // Joining on spaces and re-splitting collapses runs of whitespace from
    // both the markup and the extracted text nodes.
    text.join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
