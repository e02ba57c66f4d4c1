//! Read-only entity structs for the BPS dataset.

use serde::{Deserialize, Serialize};

/// A biophysical setting model row from `bps_models`, with its display name
/// joined from `ref_con_long`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Model {
    /// Composite identifier, e.g. `10080_1_2_3` (base id followed by zone suffixes).
    pub model_id: String,
    pub bps_name: Option<String>,
    pub vegetation_type: Option<String>,
    /// Raw comma-separated zone list as stored.
    pub map_zones: Option<String>,
    pub geographic_range: Option<String>,
    pub biophysical_site_description: Option<String>,
    pub vegetation_description: Option<String>,
    /// Stored document file name; existence is the resolver's concern.
    pub document: Option<String>,
}

impl Model {
    /// Numeric base id: the leading segment of the identifier.
    pub fn base_id(&self) -> Option<u32> {
        self.model_id.split('_').next()?.trim().parse().ok()
    }

    /// Zone suffixes encoded in the identifier after the base id.
    pub fn id_zone_suffixes(&self) -> Vec<&str> {
        self.model_id
            .split('_')
            .skip(1)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Zone numbers parsed from `map_zones`; entries that are not integers are skipped.
    pub fn zones(&self) -> Vec<u32> {
        parse_zone_list(self.map_zones.as_deref().unwrap_or(""))
    }

    /// Best label for display: the BPS name when present, else the identifier.
    pub fn display_name(&self) -> &str {
        self.bps_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.model_id)
    }
}

/// Parse a comma-separated zone list such as `"1, 2,7"`.
pub fn parse_zone_list(raw: &str) -> Vec<u32> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<u32>().ok())
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ModelerRole {
    Modeler,
    Reviewer,
}

/// A contributor attached to a model through the `models` junction table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Modeler {
    pub name: String,
    pub email: Option<String>,
    pub role: ModelerRole,
}

/// One matched model with its resolved join data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    pub model: Model,
    pub modelers: Vec<Modeler>,
    /// Copied verbatim from the model row.
    pub document: Option<String>,
    /// Searchable columns that contained the term; empty for filter-only listings.
    pub matched_columns: Vec<String>,
}

/// Return-interval bounds observed for one fire severity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FireIntervalRange {
    pub severity: String,
    pub min_years: f64,
    pub max_years: f64,
}

/// Dataset-wide summary used to seed filter choices.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DatasetOverview {
    pub total_models: i64,
    pub vegetation_types: Vec<String>,
    pub map_zones: Vec<u32>,
    pub fire_ranges: Vec<FireIntervalRange>,
}
