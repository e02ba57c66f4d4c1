//! Declarative description of the BPS schema.
//!
//! The catalog is the single source for three decisions:
//!
//! - which columns the free-text search matches against (the flattened
//!   *model view*: `bps_models` plus the display name joined from `ref_con_long`),
//! - which tables an ad-hoc query may reference,
//! - how each per-model fact table is keyed, projected and ordered.
//!
//! It is built once and never mutated; [`crate::explorer::Explorer`] owns it.

use serde::Serialize;

pub const MODEL_TABLE: &str = "bps_models";
pub const MODEL_KEY: &str = "bps_model_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    Numeric,
    Identifier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    /// Table the value is read from.
    pub table: &'static str,
    pub name: &'static str,
    pub kind: ColumnKind,
    /// Participates in free-text matching.
    pub searchable: bool,
}

impl ColumnDescriptor {
    const fn new(table: &'static str, name: &'static str, kind: ColumnKind) -> Self {
        Self {
            table,
            name,
            kind,
            searchable: false,
        }
    }

    const fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Per-model fact tables reachable through [`crate::explorer::Explorer::model_facts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Indicators,
    FireFrequency,
    DeterministicTransitions,
    ProbabilisticTransitions,
    ReferenceConditions,
    ReferenceConditionsModified,
    SuccessionClasses,
}

impl FactKind {
    pub const ALL: [FactKind; 7] = [
        FactKind::Indicators,
        FactKind::FireFrequency,
        FactKind::DeterministicTransitions,
        FactKind::ProbabilisticTransitions,
        FactKind::ReferenceConditions,
        FactKind::ReferenceConditionsModified,
        FactKind::SuccessionClasses,
    ];

    pub fn table(self) -> &'static str {
        match self {
            FactKind::Indicators => "bps_indicators",
            FactKind::FireFrequency => "fire_frequency",
            FactKind::DeterministicTransitions => "deterministic",
            FactKind::ProbabilisticTransitions => "probabilistic",
            FactKind::ReferenceConditions => "ref_con_long",
            FactKind::ReferenceConditionsModified => "ref_con_modified",
            FactKind::SuccessionClasses => "scls_descriptions",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: &'static str,
    /// Column holding the model identifier, when the table is keyed per model.
    pub model_key: Option<&'static str>,
    /// Declared columns. An empty list means "project every column".
    pub columns: Vec<ColumnDescriptor>,
    pub order_by: Vec<(&'static str, SortOrder)>,
}

impl TableDescriptor {
    fn new(name: &'static str, model_key: Option<&'static str>) -> Self {
        Self {
            name,
            model_key,
            columns: Vec::new(),
            order_by: Vec::new(),
        }
    }

    fn column(mut self, name: &'static str, kind: ColumnKind) -> Self {
        self.columns.push(ColumnDescriptor::new(self.name, name, kind));
        self
    }

    fn order(mut self, column: &'static str, order: SortOrder) -> Self {
        self.order_by.push((column, order));
        self
    }

    /// SQL projection list for fact lookups.
    pub fn projection(&self) -> String {
        if self.columns.is_empty() {
            return "*".to_string();
        }
        self.columns
            .iter()
            .map(|c| quote_ident(c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// SQL `ORDER BY` body, empty when the table declares no ordering.
    pub fn order_clause(&self) -> String {
        self.order_by
            .iter()
            .map(|(col, order)| match order {
                SortOrder::Asc => format!("{} ASC", quote_ident(col)),
                SortOrder::Desc => format!("{} DESC", quote_ident(col)),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    tables: Vec<TableDescriptor>,
    model_view: Vec<ColumnDescriptor>,
}

impl SchemaCatalog {
    /// Build a catalog from explicit parts. The model view must start with the model key.
    pub fn new(tables: Vec<TableDescriptor>, model_view: Vec<ColumnDescriptor>) -> Self {
        Self { tables, model_view }
    }

    /// The catalog describing the BPS database layout.
    pub fn bps() -> Self {
        use ColumnKind::{Identifier, Numeric, Text};
        use SortOrder::{Asc, Desc};

        let tables = vec![
            TableDescriptor::new(MODEL_TABLE, Some(MODEL_KEY))
                .column(MODEL_KEY, Identifier)
                .column("vegetation_type", Text)
                .column("map_zones", Text)
                .column("geographic_range", Text)
                .column("biophysical_site_description", Text)
                .column("vegetation_description", Text)
                .column("document", Identifier)
                .order(MODEL_KEY, Asc),
            TableDescriptor::new("modelers", None)
                .column("modeler_id", Numeric)
                .column("modelers", Text)
                .column("modeler_email", Text),
            TableDescriptor::new("models", Some(MODEL_KEY))
                .column(MODEL_KEY, Identifier)
                .column("modeler_id", Numeric)
                .column("reviewers", Text)
                .column("reviewer_email", Text)
                .order("modeler_id", Asc),
            TableDescriptor::new(FactKind::Indicators.table(), Some(MODEL_KEY))
                .column("symbol", Identifier)
                .column("scientific_name", Text)
                .column("common_name", Text)
                .order("scientific_name", Asc),
            TableDescriptor::new(FactKind::FireFrequency.table(), Some(MODEL_KEY))
                .column("severity", Text)
                .column("return_interval(years)", Numeric)
                .column("percent_of_all_fires", Numeric)
                .order("percent_of_all_fires", Desc),
            TableDescriptor::new(FactKind::DeterministicTransitions.table(), Some(MODEL_KEY))
                .column("state_class_source", Text)
                .column("state_class_to", Text)
                .column("agemin", Numeric)
                .column("agemax", Numeric)
                .order("state_class_source", Asc)
                .order("agemin", Asc),
            TableDescriptor::new(FactKind::ProbabilisticTransitions.table(), Some(MODEL_KEY))
                .column("state_class_source", Text)
                .column("state_class_to", Text)
                .column("transition_type_id", Identifier)
                .column("probability", Numeric)
                .column("return_interval(years)", Numeric)
                .column("age_reset", Text)
                .column("tst_min", Numeric)
                .order("state_class_source", Asc)
                .order("probability", Desc),
            TableDescriptor::new(FactKind::ReferenceConditions.table(), Some(MODEL_KEY))
                .column("ref_label", Text)
                .column("ref_percent", Numeric)
                .column("bps_name", Text)
                .order("ref_label", Asc),
            TableDescriptor::new(FactKind::ReferenceConditionsModified.table(), Some("Model_Code")),
            TableDescriptor::new(FactKind::SuccessionClasses.table(), Some(MODEL_KEY))
                .column("ref_label", Text)
                .column("state_class_id", Identifier)
                .column("description", Text)
                .order("ref_label", Asc),
        ];

        let model_view = vec![
            ColumnDescriptor::new(MODEL_TABLE, MODEL_KEY, Identifier).searchable(),
            ColumnDescriptor::new("ref_con_long", "bps_name", Text).searchable(),
            ColumnDescriptor::new(MODEL_TABLE, "vegetation_type", Text).searchable(),
            ColumnDescriptor::new(MODEL_TABLE, "map_zones", Text).searchable(),
            ColumnDescriptor::new(MODEL_TABLE, "geographic_range", Text).searchable(),
            ColumnDescriptor::new(MODEL_TABLE, "biophysical_site_description", Text).searchable(),
            ColumnDescriptor::new(MODEL_TABLE, "vegetation_description", Text).searchable(),
            ColumnDescriptor::new(MODEL_TABLE, "document", Identifier),
        ];

        Self::new(tables, model_view)
    }

    /// Searchable columns of `table`, in declaration order.
    ///
    /// For [`MODEL_TABLE`] this is the flattened model view, so the joined
    /// display name is included.
    pub fn searchable_columns(&self, table: &str) -> Vec<&ColumnDescriptor> {
        if table.eq_ignore_ascii_case(MODEL_TABLE) {
            return self.model_view.iter().filter(|c| c.searchable).collect();
        }
        self.table(table)
            .map(|t| t.columns.iter().filter(|c| c.searchable).collect())
            .unwrap_or_default()
    }

    /// Every column of the model view, searchable or not.
    pub fn model_view(&self) -> &[ColumnDescriptor] {
        &self.model_view
    }

    pub fn is_table_allowed(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    /// Key column joining `table` to `bps_models.bps_model_id`.
    pub fn join_key(&self, table: &str) -> Option<&'static str> {
        self.table(table).and_then(|t| t.model_key)
    }

    pub fn fact_table(&self, kind: FactKind) -> Option<&TableDescriptor> {
        self.table(kind.table())
    }
}

impl Default for SchemaCatalog {
    fn default() -> Self {
        Self::bps()
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
