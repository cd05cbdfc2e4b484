use std::sync::LazyLock;

use scraper::{Html, Selector};

// Notice links in the index page's left bar.
static NOTICE_LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.w3-leftbar").unwrap());
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h3").unwrap());

/// `href` of every notice anchor on the index page, in document order and
/// exactly as written. Anchors without an `href`, or with a blank one, are
/// skipped.
pub fn notice_links(index_html: &str) -> Vec<String> {
    let doc = Html::parse_document(index_html);
    doc.select(&NOTICE_LINK_SEL)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| !href.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Text of the first `<h3>` on a notice page, trimmed. Empty if there is none.
pub fn notice_title(notice_html: &str) -> String {
    let doc = Html::parse_document(notice_html);
    doc.select(&TITLE_SEL)
        .next()
        .map(|h| h.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}
