pub mod buildings;
pub mod html;
pub mod keywords;
pub mod sections;

use std::fmt;

use buildings::{AliasTable, BuildingMatcher};
use keywords::KeywordSet;
use sections::SectionKind;

/// Which check made an announcement relevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    /// Keyword and building both in the title.
    Title,
    /// Keyword and building both somewhere on the page.
    Page,
    /// Keyword and building both in one extracted section.
    Section(SectionKind),
    /// Keyword only in the title, building in the section.
    TitleKeywordSection(SectionKind),
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchReason::Title => f.write_str("title"),
            MatchReason::Page => f.write_str("page"),
            MatchReason::Section(kind) => write!(f, "{kind} section"),
            MatchReason::TitleKeywordSection(kind) => write!(f, "title keyword + {kind} section"),
        }
    }
}

/// Layered relevance check: title, then the whole page, then the
/// where/what sections of the page.
#[derive(Debug, Clone)]
pub struct Classifier {
    buildings: BuildingMatcher,
    keywords: KeywordSet,
}

impl Classifier {
    pub fn new(buildings: BuildingMatcher, keywords: KeywordSet) -> Self {
        Classifier { buildings, keywords }
    }

    /// Default alias and keyword tables for the given building codes.
    pub fn for_buildings<T: AsRef<str>>(targets: impl IntoIterator<Item = T>) -> Self {
        Classifier::new(
            BuildingMatcher::new(AliasTable::default(), targets),
            KeywordSet::default(),
        )
    }

    pub fn buildings(&self) -> &BuildingMatcher {
        &self.buildings
    }

    pub fn keywords(&self) -> &KeywordSet {
        &self.keywords
    }

    pub fn is_relevant(&self, title: &str, full_text: &str) -> bool {
        self.classify(title, full_text).is_some()
    }

    pub fn classify(&self, title: &str, full_text: &str) -> Option<MatchReason> {
        let title_kw = self.keywords.has_keyword(title);
        if title_kw && self.buildings.matches(title) {
            return Some(MatchReason::Title);
        }
        if full_text.is_empty() {
            return None;
        }
        if self.keywords.has_keyword(full_text) && self.buildings.matches(full_text) {
            return Some(MatchReason::Page);
        }

        for (kind, text) in sections::extract_sections(full_text) {
            if !self.buildings.matches(&text) {
                continue;
            }
            if self.keywords.has_keyword(&text) {
                return Some(MatchReason::Section(kind));
            }
            if title_kw {
                return Some(MatchReason::TitleKeywordSection(kind));
            }
        }
        None
    }
}
