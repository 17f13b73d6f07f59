//! The indicator catalog.
//!
//! Constructed once at startup and shared as `Arc<IndicatorCatalog>`; every
//! component that needs definitions receives it explicitly.

use std::collections::HashSet;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::error::{CatalogError, CatalogResult};
use crate::types::indicator::{Category, IndicatorDefinition};

/// Immutable, ordered registry of indicator definitions.
#[derive(Debug, Clone)]
pub struct IndicatorCatalog {
    indicators: Vec<IndicatorDefinition>,
}

/// Indicators of one category, extracted together in one prompt.
#[derive(Debug, Clone)]
pub struct IndicatorGroup {
    pub category: Category,
    pub indicators: Vec<IndicatorDefinition>,
}

#[derive(Deserialize)]
struct CatalogFile {
    indicators: Vec<IndicatorDefinition>,
}

/// Compile a table pattern the way the fast path runs it.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

impl IndicatorCatalog {
    /// Build a catalog, rejecting empty catalogs, blank fields and duplicate ids.
    pub fn new(indicators: Vec<IndicatorDefinition>) -> CatalogResult<Self> {
        if indicators.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut seen = HashSet::new();
        for def in &indicators {
            if def.id.trim().is_empty() {
                return Err(CatalogError::MissingField { field: "id" });
            }
            if def.name.trim().is_empty() {
                return Err(CatalogError::MissingField { field: "name" });
            }
            if !seen.insert(def.id.as_str()) {
                return Err(CatalogError::DuplicateId(def.id.clone()));
            }
            for pattern in &def.table_patterns {
                compile_pattern(pattern).map_err(|e| CatalogError::InvalidPattern {
                    id: def.id.clone(),
                    reason: e.to_string(),
                })?;
            }
        }

        Ok(Self { indicators })
    }

    /// Load a catalog from a JSON or TOML file.
    ///
    /// Both formats accept either a top-level `indicators` list or (JSON
    /// only) a bare array of definitions.
    pub fn from_path(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        if is_toml {
            Self::from_toml_str(&raw)
        } else {
            Self::from_json_str(&raw)
        }
    }

    /// Parse a JSON catalog.
    pub fn from_json_str(raw: &str) -> CatalogResult<Self> {
        let indicators = match serde_json::from_str::<CatalogFile>(raw) {
            Ok(file) => file.indicators,
            Err(_) => serde_json::from_str::<Vec<IndicatorDefinition>>(raw)
                .map_err(|e| CatalogError::Parse(e.to_string()))?,
        };
        Self::new(indicators)
    }

    /// Parse a TOML catalog (`[[indicators]]` tables).
    pub fn from_toml_str(raw: &str) -> CatalogResult<Self> {
        let file: CatalogFile =
            toml::from_str(raw).map_err(|e| CatalogError::Parse(e.to_string()))?;
        Self::new(file.indicators)
    }

    /// The built-in CSRD catalog: eight environmental, seven social and
    /// five governance indicators.
    pub fn builtin() -> Self {
        use Category::{Environmental as E, Governance as G, Social as S};

        let indicators = vec![
            IndicatorDefinition::new("E1", "Scope 1 GHG Emissions", E, "tCO2e")
                .with_search_terms(["scope 1", "direct emissions", "gross scope 1", "scope 1 ghg", "alcance 1", "emissions directes"])
                .with_section_hints(["GHG", "emissions", "climate", "E1-6"])
                .with_table_patterns([r"scope\s*1.*?(\d[\d\s,\.]+)\s*(tco2|tonnes|t\s*co|ktco2)", r"direct\s+emissions.*?(\d[\d\s,\.]+)", r"emissions\s+directes.*?(\d[\d\s,\.]+)", r"(\d{2,3})\s*ktco2e"])
                .with_expected_range(100.0, 1_000_000.0),
            IndicatorDefinition::new("E2", "Scope 2 GHG Emissions", E, "tCO2e")
                .with_search_terms(["scope 2", "indirect emissions", "market-based", "location-based", "purchased electricity", "alcance 2"])
                .with_section_hints(["GHG", "emissions", "scope 2", "E1-6"])
                .with_table_patterns([r"scope\s*2.*?(\d[\d\s,\.]+)\s*(tco2|tonnes|ktco2)", r"market.based.*?(\d[\d\s,\.]+)", r"location.based.*?(\d[\d\s,\.]+)"])
                .with_expected_range(100.0, 1_000_000.0),
            IndicatorDefinition::new("E3", "Scope 3 GHG Emissions", E, "tCO2e")
                .with_search_terms(["scope 3", "financed emissions", "value chain", "category 15", "portfolio emissions", "alcance 3"])
                .with_section_hints(["scope 3", "financed", "value chain", "E1-6"])
                .with_table_patterns([r"(?:total|gross)\s*(?:indirect)?\s*(?:scope\s*3|scope3).*?(\d{5,})", r"scope\s*3.*?total.*?(\d{5,})", r"financed\s+emissions.*?(\d{5,})"])
                .with_expected_range(100_000.0, 500_000_000.0),
            IndicatorDefinition::new("E4", "GHG Emissions Intensity", E, "tCO2e/EUR M revenue")
                .with_search_terms(["emissions intensity", "carbon intensity", "ghg intensity", "tco2e per", "intensite carbone"])
                .with_section_hints(["intensity", "per revenue"])
                .with_table_patterns([r"intensity.*?(\d[\d\s,\.]+)\s*(tco2|kg)"])
                .with_expected_range(0.01, 10_000.0),
            IndicatorDefinition::new("E5", "Total Energy Consumption", E, "MWh")
                .with_search_terms(["energy consumption", "total energy", "electricity consumption", "mwh", "consommation d'energie"])
                .with_section_hints(["energy", "consumption", "E1-5"])
                .with_table_patterns([r"total\s+energy\s+consumption.*?(\d{5,})[\s,]*(mwh|gj|gwh)?", r"(\d{5,})\s*mwh"])
                .with_expected_range(10_000.0, 10_000_000.0),
            IndicatorDefinition::new("E6", "Renewable Energy Percentage", E, "%")
                .with_search_terms(["renewable energy", "renewable sources", "green electricity", "share of renewable", "energie renouvelable"])
                .with_section_hints(["renewable", "energy mix", "E1-5"])
                .with_table_patterns([r"renewable.*?energy.*?(\d{1,3}(?:\.\d+)?)\s*%", r"share\s+(?:of\s+)?renewable.*?(\d{1,3}(?:\.\d+)?)\s*%"])
                .with_expected_range(0.0, 100.0),
            IndicatorDefinition::new("E7", "Net Zero Target Year", E, "year")
                .with_search_terms(["net zero", "carbon neutral", "net-zero target", "decarbonization", "neutralite carbone"])
                .with_section_hints(["net zero", "target", "E1-4"])
                .with_table_patterns([r"net\s*zero.*?(20[3-5]\d)", r"carbon\s+neutral.*?(20[3-5]\d)"])
                .with_expected_range(2025.0, 2100.0),
            IndicatorDefinition::new("E8", "Green Financing Volume", E, "EUR M")
                .with_search_terms(["green financing", "sustainable finance", "green loans", "green bonds", "financement vert"])
                .with_section_hints(["green", "sustainable", "financing", "taxonomy"])
                .with_expected_range(100.0, 1_000_000.0),
            IndicatorDefinition::new("S1", "Total Employees", S, "FTE")
                .with_search_terms(["total employees", "headcount", "workforce", "number of employees", "full-time equivalent", "effectif total"])
                .with_section_hints(["employees", "workforce", "S1-6"])
                .with_table_patterns([r"total\s+(?:number\s+of\s+)?employees.*?(\d{4,6})", r"headcount.*?(\d{4,6})", r"total\s+salaried\s+employees.*?(\d{5,6})"])
                .with_expected_range(1_000.0, 500_000.0),
            IndicatorDefinition::new("S2", "Female Employees Percentage", S, "%")
                .with_search_terms(["female employees", "women", "gender diversity", "gender breakdown", "femmes"])
                .with_section_hints(["gender", "diversity", "S1-9"])
                .with_table_patterns([r"female.*?(\d{1,3}(?:\.\d+)?)\s*%", r"women.*?(\d{1,3}(?:\.\d+)?)\s*%"])
                .with_expected_range(0.0, 100.0),
            IndicatorDefinition::new("S3", "Gender Pay Gap", S, "%")
                .with_search_terms(["gender pay gap", "pay gap", "wage gap", "remuneration gap", "brecha salarial"])
                .with_section_hints(["pay gap", "remuneration", "S1-16"])
                .with_table_patterns([r"pay\s+gap.*?(\d{1,3}(?:\.\d+)?)\s*%"])
                .with_expected_range(-100.0, 100.0),
            IndicatorDefinition::new("S4", "Training Hours per Employee", S, "hours")
                .with_search_terms(["training hours", "learning hours", "hours per employee", "average training", "heures de formation"])
                .with_section_hints(["training", "learning", "S1-13"])
                .with_table_patterns([r"training.*?per\s*employee.*?(\d{1,3}(?:\.\d+)?)\s*(hours|h)?"])
                .with_expected_range(0.0, 200.0),
            IndicatorDefinition::new("S5", "Employee Turnover Rate", S, "%")
                .with_search_terms(["turnover rate", "attrition", "employee turnover", "voluntary turnover", "taux de rotation"])
                .with_section_hints(["turnover", "attrition", "S1-6"])
                .with_table_patterns([r"turnover.*?(\d{1,3}(?:\.\d+)?)\s*%", r"attrition.*?(\d{1,3}(?:\.\d+)?)\s*%"])
                .with_expected_range(0.0, 100.0),
            IndicatorDefinition::new("S6", "Work-Related Accidents", S, "count")
                .with_search_terms(["work accidents", "occupational injuries", "safety incidents", "ltifr", "accidents du travail"])
                .with_section_hints(["accident", "safety", "S1-14"])
                .with_expected_range(0.0, 10_000.0),
            IndicatorDefinition::new("S7", "Collective Bargaining Coverage", S, "%")
                .with_search_terms(["collective bargaining", "union coverage", "collective agreement", "convenio colectivo"])
                .with_section_hints(["collective", "bargaining", "S1-8"])
                .with_table_patterns([r"collective\s+bargaining.*?(\d{1,3}(?:\.\d+)?)\s*%"])
                .with_expected_range(0.0, 100.0),
            IndicatorDefinition::new("G1", "Board Female Representation", G, "%")
                .with_search_terms(["board diversity", "female directors", "women on board", "board composition", "femmes au conseil"])
                .with_section_hints(["board", "diversity", "directors"])
                .with_table_patterns([r"(?:board|conseil).*?(?:female|women|femme).*?(\d{1,3}(?:\.\d+)?)\s*%"])
                .with_expected_range(0.0, 100.0),
            IndicatorDefinition::new("G2", "Board Meetings per Year", G, "count")
                .with_search_terms(["board meetings", "meetings per year", "number of meetings", "board met", "reunions du conseil"])
                .with_section_hints(["board", "meetings", "governance"])
                .with_table_patterns([r"board.*?met.*?(\d+)\s*(times|occasions)"])
                .with_expected_range(1.0, 60.0),
            IndicatorDefinition::new("G3", "Corruption Incidents", G, "count")
                .with_search_terms(["corruption incidents", "bribery", "ethics violations", "anti-corruption", "cas de corruption"])
                .with_section_hints(["corruption", "ethics", "G1-4"])
                .with_expected_range(0.0, 100.0),
            IndicatorDefinition::new("G4", "Average Supplier Payment Days", G, "days")
                .with_search_terms(["payment days", "supplier payment", "days payable", "payment terms", "delai de paiement"])
                .with_section_hints(["payment", "supplier", "G1-2"])
                .with_table_patterns([r"payment.*?(\d+(?:\.\d+)?)\s*days"])
                .with_expected_range(1.0, 180.0),
            IndicatorDefinition::new("G5", "Suppliers Screened for ESG", G, "%")
                .with_search_terms(["supplier screening", "esg assessment", "supplier evaluation", "supply chain esg", "evaluation fournisseurs"])
                .with_section_hints(["supplier", "screening", "G1-2"])
                .with_table_patterns([r"supplier.*?screen.*?(\d{1,3}(?:\.\d+)?)\s*%"])
                .with_expected_range(0.0, 100.0),
        ];

        Self { indicators }
    }

    /// Look up a definition by id.
    pub fn get(&self, id: &str) -> Option<&IndicatorDefinition> {
        self.indicators.iter().find(|d| d.id == id)
    }

    /// Whether the catalog defines `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Iterate definitions in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &IndicatorDefinition> {
        self.indicators.iter()
    }

    /// All definitions in catalog order.
    pub fn indicators(&self) -> &[IndicatorDefinition] {
        &self.indicators
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    /// Split the catalog into per-category groups, skipping empty ones.
    pub fn groups(&self) -> Vec<IndicatorGroup> {
        Category::ALL
            .iter()
            .filter_map(|&category| {
                let indicators: Vec<_> = self
                    .indicators
                    .iter()
                    .filter(|d| d.category == category)
                    .cloned()
                    .collect();

                (!indicators.is_empty()).then_some(IndicatorGroup {
                    category,
                    indicators,
                })
            })
            .collect()
    }
}
