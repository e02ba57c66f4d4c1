use std::collections::BTreeMap;
use std::str::FromStr;

use itertools::Itertools;
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};
use serde::Serialize;

use crate::model::types::{Model, Modeler, ModelerRole, SearchResult};
use crate::search::catalog::{
    ColumnDescriptor, FactKind, MODEL_KEY, MODEL_TABLE, SchemaCatalog, quote_ident,
};
use crate::storage::sqlite::{CONTAINS_FN, STARTS_WITH_FN, value_text};

/// Case-insensitive literal substring test. `%` and `_` have no special meaning.
pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Case-insensitive prefix test.
pub fn starts_with_ci(haystack: &str, prefix: &str) -> bool {
    haystack.to_lowercase().starts_with(&prefix.to_lowercase())
}

/// Inclusive fire return-interval bounds in years; `max_years: None` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IntervalRange {
    pub min_years: u32,
    pub max_years: Option<u32>,
}

impl IntervalRange {
    pub fn new(min_years: u32, max_years: Option<u32>) -> Self {
        Self {
            min_years,
            max_years,
        }
    }

    pub fn contains(&self, years: f64) -> bool {
        years >= f64::from(self.min_years) && self.max_years.is_none_or(|max| years <= f64::from(max))
    }
}

/// Named return-interval bands offered to users who do not want to type numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirePreset {
    VeryFrequent,
    Frequent,
    Moderate,
    Infrequent,
    VeryInfrequent,
    Rare,
}

impl FirePreset {
    pub fn range(self) -> IntervalRange {
        match self {
            FirePreset::VeryFrequent => IntervalRange::new(0, Some(10)),
            FirePreset::Frequent => IntervalRange::new(10, Some(50)),
            FirePreset::Moderate => IntervalRange::new(50, Some(100)),
            FirePreset::Infrequent => IntervalRange::new(100, Some(500)),
            FirePreset::VeryInfrequent => IntervalRange::new(500, Some(1000)),
            FirePreset::Rare => IntervalRange::new(1000, None),
        }
    }
}

impl FromStr for FirePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "very-frequent" => Ok(FirePreset::VeryFrequent),
            "frequent" => Ok(FirePreset::Frequent),
            "moderate" => Ok(FirePreset::Moderate),
            "infrequent" => Ok(FirePreset::Infrequent),
            "very-infrequent" => Ok(FirePreset::VeryInfrequent),
            "rare" => Ok(FirePreset::Rare),
            other => Err(format!("unknown fire preset {other:?}")),
        }
    }
}

/// One `SEVERITY=RANGE` fire filter, e.g. `Replacement=10..50`, `Replacement=1000..`,
/// or `Low (Surface)=frequent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireFilter {
    pub severity: String,
    pub range: IntervalRange,
}

impl FromStr for FireFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (severity, spec) = s
            .rsplit_once('=')
            .ok_or_else(|| format!("expected SEVERITY=RANGE, got {s:?}"))?;
        let severity = severity.trim();
        if severity.is_empty() {
            return Err(format!("missing severity in {s:?}"));
        }
        let spec = spec.trim();
        let range = if let Some((lo, hi)) = spec.split_once("..") {
            let min = if lo.trim().is_empty() {
                0
            } else {
                lo.trim()
                    .parse()
                    .map_err(|_| format!("invalid minimum {lo:?} in {s:?}"))?
            };
            let max = if hi.trim().is_empty() {
                None
            } else {
                Some(
                    hi.trim()
                        .parse()
                        .map_err(|_| format!("invalid maximum {hi:?} in {s:?}"))?,
                )
            };
            if max.is_some_and(|m| m < min) {
                return Err(format!("minimum exceeds maximum in {s:?}"));
            }
            IntervalRange::new(min, max)
        } else {
            spec.parse::<FirePreset>()?.range()
        };
        Ok(FireFilter {
            severity: severity.to_string(),
            range,
        })
    }
}

/// Structured narrowing applied on top of (or instead of) a free-text term.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct SearchFilters {
    /// Case-insensitive prefix of `vegetation_type`. `"All"` means no filter.
    pub vegetation_type: Option<String>,
    /// Models listing any of these zones in `map_zones`.
    pub map_zones: Vec<u32>,
    /// Case-insensitive substring of the display name.
    pub bps_name: Option<String>,
    /// Every listed severity must have a return interval inside its range.
    pub fire_intervals: BTreeMap<String, IntervalRange>,
    pub limit: Option<usize>,
}

impl SearchFilters {
    pub fn with_fire(mut self, filter: FireFilter) -> Self {
        self.fire_intervals.insert(filter.severity, filter.range);
        self
    }

    /// Canonical form: trimmed text, blank and `"All"` dropped, zones sorted and unique.
    pub fn normalized(&self) -> Self {
        let text = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase)
        };
        SearchFilters {
            vegetation_type: text(&self.vegetation_type).filter(|v| v != "all"),
            map_zones: self.map_zones.iter().copied().sorted().dedup().collect(),
            bps_name: text(&self.bps_name),
            fire_intervals: self
                .fire_intervals
                .iter()
                .map(|(k, v)| (k.trim().to_string(), *v))
                .collect(),
            limit: self.limit,
        }
    }

    /// True when no predicate narrows the listing (the limit does not count).
    pub fn is_unfiltered(&self) -> bool {
        let n = self.normalized();
        n.vegetation_type.is_none()
            && n.map_zones.is_empty()
            && n.bps_name.is_none()
            && n.fire_intervals.is_empty()
    }
}

/// Positional parameter list for a generated statement.
#[derive(Default)]
struct Binder {
    values: Vec<Value>,
}

impl Binder {
    fn bind(&mut self, value: impl Into<Value>) -> String {
        self.values.push(value.into());
        format!("?{}", self.values.len())
    }
}

/// Generated statement plus its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelQuery {
    pub sql: String,
    pub params: Vec<Value>,
    /// Output columns, in model-view order.
    pub columns: Vec<&'static str>,
}

/// Builds and runs the model search statement from the catalog.
pub struct SearchClient<'a> {
    conn: &'a Connection,
    catalog: &'a SchemaCatalog,
}

impl<'a> SearchClient<'a> {
    pub fn new(conn: &'a Connection, catalog: &'a SchemaCatalog) -> Self {
        Self { conn, catalog }
    }

    /// Build the statement for `term` (already trimmed, possibly absent) and `filters`.
    ///
    /// The model view is flattened in a subquery so every catalog column,
    /// including ones joined from lookup tables, is matched by one predicate.
    pub fn build_query(&self, term: Option<&str>, filters: &SearchFilters) -> ModelQuery {
        let filters = filters.normalized();
        let view = self.catalog.model_view();
        let mut binder = Binder::default();

        let projection = view
            .iter()
            .map(|col| format!("{} AS {}", self.column_source(col), quote_ident(col.name)))
            .join(",\n       ");
        let mut sql = format!(
            "SELECT {} FROM (\n  SELECT {projection}\n  FROM {} AS bm\n) AS m",
            view.iter()
                .map(|c| format!("m.{}", quote_ident(c.name)))
                .join(", "),
            quote_ident(MODEL_TABLE),
        );

        let mut clauses: Vec<String> = Vec::new();

        if let Some(term) = term {
            let slot = binder.bind(term.to_string());
            let any_column = self
                .catalog
                .searchable_columns(MODEL_TABLE)
                .iter()
                .map(|c| format!("{CONTAINS_FN}(m.{}, {slot})", quote_ident(c.name)))
                .join(" OR ");
            clauses.push(format!("({any_column})"));
        }

        if let Some(veg) = &filters.vegetation_type {
            let slot = binder.bind(veg.clone());
            clauses.push(format!("{STARTS_WITH_FN}(m.\"vegetation_type\", {slot})"));
        }

        if !filters.map_zones.is_empty() {
            let zones = filters
                .map_zones
                .iter()
                .map(|zone| {
                    let slot = binder.bind(format!(",{zone},"));
                    format!("instr(',' || replace(m.\"map_zones\", ' ', '') || ',', {slot}) > 0")
                })
                .join(" OR ");
            clauses.push(format!("({zones})"));
        }

        if let Some(name) = &filters.bps_name {
            let slot = binder.bind(name.clone());
            clauses.push(format!("{CONTAINS_FN}(m.\"bps_name\", {slot})"));
        }

        if !filters.fire_intervals.is_empty() {
            let fire_table = FactKind::FireFrequency.table();
            let fire_key = self.catalog.join_key(fire_table).unwrap_or(MODEL_KEY);
            for (severity, range) in &filters.fire_intervals {
                let severity_slot = binder.bind(severity.clone());
                let min_slot = binder.bind(i64::from(range.min_years));
                let mut exists = format!(
                    "EXISTS (SELECT 1 FROM {} AS ff WHERE ff.{} = m.{} \
                     AND ff.\"severity\" = {severity_slot} \
                     AND ff.\"return_interval(years)\" >= {min_slot}",
                    quote_ident(fire_table),
                    quote_ident(fire_key),
                    quote_ident(MODEL_KEY),
                );
                if let Some(max) = range.max_years {
                    let max_slot = binder.bind(i64::from(max));
                    exists.push_str(&format!(" AND ff.\"return_interval(years)\" <= {max_slot}"));
                }
                exists.push(')');
                clauses.push(exists);
            }
        }

        if !clauses.is_empty() {
            sql.push_str("\nWHERE ");
            sql.push_str(&clauses.join("\n  AND "));
        }
        sql.push_str(&format!("\nORDER BY m.{} ASC", quote_ident(MODEL_KEY)));
        if let Some(limit) = filters.limit {
            let slot = binder.bind(i64::try_from(limit).unwrap_or(i64::MAX));
            sql.push_str(&format!("\nLIMIT {slot}"));
        }

        ModelQuery {
            sql,
            params: binder.values,
            columns: view.iter().map(|c| c.name).collect(),
        }
    }

    /// SQL expression reading `col` for the current `bm` row.
    fn column_source(&self, col: &ColumnDescriptor) -> String {
        if col.table.eq_ignore_ascii_case(MODEL_TABLE) {
            return format!("bm.{}", quote_ident(col.name));
        }
        let key = self.catalog.join_key(col.table).unwrap_or(MODEL_KEY);
        format!(
            "(SELECT t.{col} FROM {table} AS t WHERE t.{key} = bm.{model_key} AND t.{col} IS NOT NULL LIMIT 1)",
            col = quote_ident(col.name),
            table = quote_ident(col.table),
            key = quote_ident(key),
            model_key = quote_ident(MODEL_KEY),
        )
    }

    /// Run the model statement and attach modelers, documents, and matched columns.
    pub fn search(
        &self,
        term: Option<&str>,
        filters: &SearchFilters,
    ) -> rusqlite::Result<Vec<SearchResult>> {
        let term = term.map(str::trim).filter(|t| !t.is_empty());
        let query = self.build_query(term, filters);
        tracing::info!(
            backend = "sqlite",
            term = term.unwrap_or(""),
            limit = ?filters.limit,
            "search_start"
        );

        let mut stmt = self.conn.prepare(&query.sql)?;
        let rows = stmt.query_map(params_from_iter(query.params.iter()), |row| {
            let mut values = Vec::with_capacity(query.columns.len());
            for i in 0..query.columns.len() {
                values.push(value_text(row.get_ref(i)?));
            }
            Ok(values)
        })?;

        let mut results = Vec::new();
        for row in rows {
            let values = row?;
            let field = |name: &str| -> Option<String> {
                query
                    .columns
                    .iter()
                    .position(|c| *c == name)
                    .and_then(|i| values[i].clone())
            };
            let model = Model {
                model_id: field(MODEL_KEY).unwrap_or_default(),
                bps_name: field("bps_name"),
                vegetation_type: field("vegetation_type"),
                map_zones: field("map_zones"),
                geographic_range: field("geographic_range"),
                biophysical_site_description: field("biophysical_site_description"),
                vegetation_description: field("vegetation_description"),
                document: field("document"),
            };
            let matched_columns = match term {
                Some(term) => self
                    .catalog
                    .searchable_columns(MODEL_TABLE)
                    .iter()
                    .filter(|c| field(c.name).is_some_and(|v| contains_ci(&v, term)))
                    .map(|c| c.name.to_string())
                    .collect(),
                None => Vec::new(),
            };
            let modelers = self.modelers_for(&model.model_id)?;
            results.push(SearchResult {
                document: model.document.clone(),
                model,
                modelers,
                matched_columns,
            });
        }

        tracing::info!(backend = "sqlite", hits = results.len(), "search_done");
        Ok(results)
    }

    /// Modelers and reviewers recorded for `model_id` through the junction table.
    pub fn modelers_for(&self, model_id: &str) -> rusqlite::Result<Vec<Modeler>> {
        let mut stmt = self.conn.prepare_cached(
            r#"SELECT p."modelers", p."modeler_email", j."reviewers", j."reviewer_email"
               FROM "models" AS j
               LEFT JOIN "modelers" AS p ON p."modeler_id" = j."modeler_id"
               WHERE j."bps_model_id" = ?1
               ORDER BY j."modeler_id""#,
        )?;
        let rows = stmt.query_map(params![model_id], |row| {
            Ok((
                value_text(row.get_ref(0)?),
                value_text(row.get_ref(1)?),
                value_text(row.get_ref(2)?),
                value_text(row.get_ref(3)?),
            ))
        })?;

        let mut people = Vec::new();
        for row in rows {
            let (name, email, reviewer, reviewer_email) = row?;
            if let Some(person) = person(name, email, ModelerRole::Modeler) {
                people.push(person);
            }
            if let Some(person) = person(reviewer, reviewer_email, ModelerRole::Reviewer) {
                people.push(person);
            }
        }
        Ok(people
            .into_iter()
            .unique_by(|m| (m.role, m.name.to_lowercase()))
            .collect())
    }
}

fn person(name: Option<String>, email: Option<String>, role: ModelerRole) -> Option<Modeler> {
    let email = email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty());
    let name = name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .or_else(|| email.clone())?;
    Some(Modeler { name, email, role })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_is_literal_and_case_insensitive() {
        assert!(contains_ci("Oregon White Oak Woodland", "OAK"));
        assert!(contains_ci("ÖSTERREICH", "österreich"));
        assert!(!contains_ci("oak", "o%k"));
        assert!(contains_ci("anything", ""));
    }

    #[test]
    fn fire_filter_parsing() {
        let f: FireFilter = "Replacement=10..50".parse().unwrap();
        assert_eq!(f.severity, "Replacement");
        assert_eq!(f.range, IntervalRange::new(10, Some(50)));

        let f: FireFilter = "Low (Surface)=rare".parse().unwrap();
        assert_eq!(f.range, IntervalRange::new(1000, None));

        let f: FireFilter = "All Fires=..25".parse().unwrap();
        assert_eq!(f.range, IntervalRange::new(0, Some(25)));

        assert!("Replacement".parse::<FireFilter>().is_err());
        assert!("Replacement=50..10".parse::<FireFilter>().is_err());
        assert!("Replacement=sometimes".parse::<FireFilter>().is_err());
        assert!("=10..20".parse::<FireFilter>().is_err());
    }

    #[test]
    fn interval_contains() {
        let r = IntervalRange::new(10, Some(50));
        assert!(r.contains(10.0) && r.contains(50.0));
        assert!(!r.contains(50.5));
        assert!(IntervalRange::new(1000, None).contains(5000.0));
    }

    #[test]
    fn filters_normalize() {
        let filters = SearchFilters {
            vegetation_type: Some("All".into()),
            map_zones: vec![7, 1, 7],
            bps_name: Some("  ".into()),
            ..Default::default()
        };
        let n = filters.normalized();
        assert_eq!(n.vegetation_type, None);
        assert_eq!(n.map_zones, vec![1, 7]);
        assert_eq!(n.bps_name, None);
        assert!(!filters.is_unfiltered());
        assert!(SearchFilters::default().is_unfiltered());
    }

    #[test]
    fn generated_statement_uses_every_searchable_column() {
        let conn = Connection::open_in_memory().unwrap();
        let catalog = SchemaCatalog::bps();
        let client = SearchClient::new(&conn, &catalog);
        let q = client.build_query(Some("oak"), &SearchFilters::default());
        for col in catalog.searchable_columns(MODEL_TABLE) {
            assert!(
                q.sql.contains(&format!("{CONTAINS_FN}(m.\"{}\", ?1)", col.name)),
                "missing predicate for {}:\n{}",
                col.name,
                q.sql
            );
        }
        assert_eq!(q.params, vec![Value::Text("oak".into())]);
        assert!(q.sql.contains("ORDER BY m.\"bps_model_id\" ASC"));
        // Only the per-column lookups carry a LIMIT; the outer statement is unbounded.
        assert!(!q.sql.contains("\nLIMIT"));
        assert!(q.sql.trim_end().ends_with("ASC"));
    }

    #[test]
    fn filters_bind_in_order() {
        let conn = Connection::open_in_memory().unwrap();
        let catalog = SchemaCatalog::bps();
        let client = SearchClient::new(&conn, &catalog);
        let filters = SearchFilters {
            vegetation_type: Some("Forest".into()),
            map_zones: vec![7],
            limit: Some(5),
            ..Default::default()
        }
        .with_fire("Replacement=100..500".parse().unwrap());
        let q = client.build_query(None, &filters);
        assert_eq!(
            q.params,
            vec![
                Value::Text("forest".into()),
                Value::Text(",7,".into()),
                Value::Text("Replacement".into()),
                Value::Integer(100),
                Value::Integer(500),
                Value::Integer(5),
            ]
        );
        assert!(q.sql.contains("LIMIT ?6"));
    }

    #[test]
    fn person_falls_back_to_email() {
        let p = person(None, Some(" a@b.org ".into()), ModelerRole::Reviewer).unwrap();
        assert_eq!(p.name, "a@b.org");
        assert!(person(Some(" ".into()), None, ModelerRole::Modeler).is_none());
    }
}
