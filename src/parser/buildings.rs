use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

// "ENGINEERING 2", "ENGINEERING 2 & 3", "ENGINEERING 2 AND 3"
static ENG_RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ENGINEERING [0-9](?: ?[&AND]+ ?[0-9]+)*").unwrap());
static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());

/// Free-text building names seen on facilities notices → canonical codes.
pub const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("ENGINEERING 2", "E2"),
    ("ENGINEERING 3", "E3"),
    ("CARL A POLLOCK HALL", "CPH"),
    ("CARL A.POLLOCK HALL", "CPH"),
    ("CARL POLLOCK HALL", "CPH"),
    ("DOUGLAS WRIGHT ENGINEERING", "DWE"),
    ("PHYSICS", "PHY"),
    ("SOUTH CAMPUS HALL", "SCH"),
];

/// Maps building names to canonical codes. Unknown names pass through
/// upper-cased and trimmed.
#[derive(Debug, Clone)]
pub struct AliasTable {
    aliases: HashMap<String, String>,
}

impl AliasTable {
    pub fn new<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let aliases = entries
            .into_iter()
            .map(|(k, v)| (canonical(k.as_ref()), canonical(v.as_ref())))
            .collect();
        AliasTable { aliases }
    }

    pub fn normalize(&self, text: &str) -> String {
        let key = canonical(text);
        match self.aliases.get(&key) {
            Some(code) => code.clone(),
            None => key,
        }
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        AliasTable::new(DEFAULT_ALIASES.iter().copied())
    }
}

fn canonical(s: &str) -> String {
    s.trim().to_uppercase()
}

/// Decides whether a block of text references one of the configured buildings.
#[derive(Debug, Clone)]
pub struct BuildingMatcher {
    aliases: AliasTable,
    targets: Vec<String>,
}

impl BuildingMatcher {
    pub fn new<T: AsRef<str>>(aliases: AliasTable, targets: impl IntoIterator<Item = T>) -> Self {
        let targets = targets
            .into_iter()
            .map(|t| canonical(t.as_ref()))
            .filter(|t| !t.is_empty())
            .collect();
        BuildingMatcher { aliases, targets }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn matches(&self, text: &str) -> bool {
        let text = text.to_uppercase();
        self.matches_engineering_range(&text) || self.matches_fragments(&text)
    }

    /// "Engineering 2 & 3" names two buildings; expand every number into its
    /// own "ENGINEERING n" and normalize each.
    fn matches_engineering_range(&self, upper: &str) -> bool {
        ENG_RANGE_RE.find_iter(upper).any(|m| {
            DIGITS_RE.find_iter(m.as_str()).any(|n| {
                let code = self.aliases.normalize(&format!("ENGINEERING {}", n.as_str()));
                self.is_target(&code)
            })
        })
    }

    /// Split on commas, " AND " and " & ", then compare each fragment raw and
    /// normalized. Containment is a substring test, so a short code inside an
    /// unrelated word also matches.
    fn matches_fragments(&self, upper: &str) -> bool {
        split_buildings(upper).into_iter().any(|part| {
            let raw = part.trim();
            let norm = self.aliases.normalize(raw);
            self.targets.iter().any(|t| {
                raw == t || norm == *t || raw.contains(t.as_str()) || norm.contains(t.as_str())
            })
        })
    }

    fn is_target(&self, code: &str) -> bool {
        self.targets.iter().any(|t| t.eq_ignore_ascii_case(code))
    }
}

fn split_buildings(upper: &str) -> Vec<&str> {
    // Splitting on each delimiter in turn gives the same fragments as
    // replacing both with a comma first.
    upper
        .split(',')
        .flat_map(|s| s.split(" AND "))
        .flat_map(|s| s.split(" & "))
        .collect()
}
