//! Indicator definitions - what the pipeline is asked to find.

use serde::{Deserialize, Serialize};

/// ESG pillar an indicator belongs to.
///
/// The orchestrator extracts one category at a time, so the category is
/// also the unit of an indicator group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[serde(alias = "Environmental", alias = "E")]
    Environmental,
    #[serde(alias = "Social", alias = "S")]
    Social,
    #[serde(alias = "Governance", alias = "G")]
    Governance,
}

impl Category {
    /// All categories in reporting order.
    pub const ALL: [Category; 3] = [Self::Environmental, Self::Social, Self::Governance];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Environmental => "environmental",
            Self::Social => "social",
            Self::Governance => "governance",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single indicator to extract (e.g. Scope 1 emissions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorDefinition {
    /// Stable identifier (E1, S3, G2, ...)
    pub id: String,

    /// Human readable name
    pub name: String,

    /// ESG pillar
    pub category: Category,

    /// Unit the value is expected in
    #[serde(alias = "unit")]
    pub expected_unit: String,

    /// Phrases that suggest a page discusses this indicator
    #[serde(default)]
    pub search_terms: Vec<String>,

    /// Section headings that usually contain this indicator
    #[serde(default)]
    pub section_hints: Vec<String>,

    /// Plausible value range, used to annotate suspicious values
    #[serde(default)]
    pub expected_range: Option<(f64, f64)>,

    /// Regexes tried against the raw pages before any model call.
    ///
    /// Matched case-insensitively; the first capture group that reads as a
    /// number is the value.
    #[serde(default)]
    pub table_patterns: Vec<String>,
}

impl IndicatorDefinition {
    /// Create a new definition without retrieval hints.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: Category,
        expected_unit: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            expected_unit: expected_unit.into(),
            search_terms: Vec::new(),
            section_hints: Vec::new(),
            expected_range: None,
            table_patterns: Vec::new(),
        }
    }

    /// Add search terms.
    pub fn with_search_terms(mut self, terms: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.search_terms = terms.into_iter().map(|t| t.into()).collect();
        self
    }

    /// Add section hints.
    pub fn with_section_hints(mut self, hints: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.section_hints = hints.into_iter().map(|h| h.into()).collect();
        self
    }

    /// Set the plausible value range.
    pub fn with_expected_range(mut self, min: f64, max: f64) -> Self {
        self.expected_range = Some((min, max));
        self
    }

    /// Add regex patterns for the fast path.
    pub fn with_table_patterns(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.table_patterns = patterns.into_iter().map(|p| p.into()).collect();
        self
    }

    /// Whether the value is a calendar year (target years and the like).
    pub fn is_year_valued(&self) -> bool {
        self.expected_unit.eq_ignore_ascii_case("year")
    }

    /// Whether `value` lies inside the expected range (true when no range is set).
    pub fn in_expected_range(&self, value: f64) -> bool {
        match self.expected_range {
            Some((min, max)) => value >= min && value <= max,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_deserializes_any_case() {
        let lower: Category = serde_json::from_str("\"social\"").unwrap();
        let title: Category = serde_json::from_str("\"Governance\"").unwrap();
        assert_eq!(lower, Category::Social);
        assert_eq!(title, Category::Governance);
    }

    #[test]
    fn test_expected_range() {
        let def = IndicatorDefinition::new("S2", "Female Employees Percentage", Category::Social, "%")
            .with_expected_range(20.0, 80.0);

        assert!(def.in_expected_range(45.0));
        assert!(!def.in_expected_range(95.0));
        assert!(IndicatorDefinition::new("X", "X", Category::Social, "%").in_expected_range(1e9));
    }
}
