/// Outage categories we alert on.
pub const DEFAULT_KEYWORDS: &[&str] = &["ELECTRICAL", "POWER"];

/// Plain substring test on upper-cased text. No word boundaries, so
/// "PowerPoint" counts as a power keyword.
#[derive(Debug, Clone)]
pub struct KeywordSet {
    keywords: Vec<String>,
}

impl KeywordSet {
    pub fn new<T: AsRef<str>>(keywords: impl IntoIterator<Item = T>) -> Self {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_uppercase())
            .filter(|k| !k.is_empty())
            .collect();
        KeywordSet { keywords }
    }

    pub fn has_keyword(&self, text: &str) -> bool {
        let upper = text.to_uppercase();
        self.keywords.iter().any(|k| upper.contains(k.as_str()))
    }
}

impl Default for KeywordSet {
    fn default() -> Self {
        KeywordSet::new(DEFAULT_KEYWORDS.iter().copied())
    }
}
