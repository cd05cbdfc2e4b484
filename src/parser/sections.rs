use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static WHERE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)<div class="section-header">Where is this happening\?</div>\s*<p class="section-text">([^<]+)</p>"#,
    )
    .unwrap()
});
static WHAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)<div class="section-header">What is happening\?</div>\s*<p class="section-text">([^<]+)</p>"#,
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectionKind {
    Where,
    What,
}

impl SectionKind {
    pub const ALL: [SectionKind; 2] = [SectionKind::Where, SectionKind::What];

    pub fn as_str(self) -> &'static str {
        match self {
            SectionKind::Where => "where",
            SectionKind::What => "what",
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            SectionKind::Where => &*WHERE_RE,
            SectionKind::What => &*WHAT_RE,
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type SectionMap = BTreeMap<SectionKind, String>;

/// Pull the "Where is this happening?" / "What is happening?" paragraphs out
/// of a notice page. Only the first occurrence of each is used; a section
/// whose paragraph contains nested markup is treated as absent.
pub fn extract_sections(markup: &str) -> SectionMap {
    SectionKind::ALL
        .into_iter()
        .filter_map(|kind| {
            let caps = kind.pattern().captures(markup)?;
            Some((kind, caps[1].to_string()))
        })
        .collect()
}
