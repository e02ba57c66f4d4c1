use bps_explorer::config::ExplorerConfig;
use bps_explorer::explorer::Explorer;
use bps_explorer::model::types::{ModelerRole, SearchResult};
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::TRACE)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE bps_models (
    bps_model_id TEXT PRIMARY KEY,
    vegetation_type TEXT,
    map_zones TEXT,
    geographic_range TEXT,
    biophysical_site_description TEXT,
    vegetation_description TEXT,
    document TEXT
);
CREATE TABLE ref_con_long (bps_model_id TEXT, bps_name TEXT, ref_label TEXT, ref_percent REAL);
CREATE TABLE ref_con_modified (Model_Code TEXT, BpS_Name TEXT, "A" REAL, "B" REAL);
CREATE TABLE modelers (modeler_id INTEGER PRIMARY KEY, modelers TEXT, modeler_email TEXT);
CREATE TABLE models (bps_model_id TEXT, modeler_id INTEGER, reviewers TEXT, reviewer_email TEXT);
CREATE TABLE bps_indicators (bps_model_id TEXT, symbol TEXT, scientific_name TEXT, common_name TEXT);
CREATE TABLE fire_frequency (
    bps_model_id TEXT,
    severity TEXT,
    "return_interval(years)" REAL,
    percent_of_all_fires REAL
);
CREATE TABLE deterministic (
    bps_model_id TEXT, state_class_source TEXT, state_class_to TEXT, agemin INTEGER, agemax INTEGER
);
CREATE TABLE probabilistic (
    bps_model_id TEXT, state_class_source TEXT, state_class_to TEXT, transition_type_id TEXT,
    probability REAL, "return_interval(years)" REAL, age_reset TEXT, tst_min INTEGER
);
CREATE TABLE scls_descriptions (bps_model_id TEXT, ref_label TEXT, state_class_id TEXT, description TEXT);
CREATE TABLE secret_admin_table (secret TEXT);
INSERT INTO secret_admin_table VALUES ('hunter2');
"#;

/// One model row plus the rows hanging off it in the other tables.
#[derive(Debug, Clone, Default)]
pub struct ModelSpec {
    pub id: String,
    pub name: Option<String>,
    pub vegetation_type: Option<String>,
    pub map_zones: Option<String>,
    pub geographic_range: Option<String>,
    pub site_description: Option<String>,
    pub vegetation_description: Option<String>,
    pub document: Option<String>,
    /// (name, email)
    pub modelers: Vec<(String, Option<String>)>,
    /// (name, email)
    pub reviewers: Vec<(String, Option<String>)>,
    /// (severity, return interval, percent of all fires)
    pub fires: Vec<(String, f64, f64)>,
}

#[allow(dead_code)]
impl ModelSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn name(mut self, v: &str) -> Self {
        self.name = Some(v.into());
        self
    }

    pub fn vegetation(mut self, v: &str) -> Self {
        self.vegetation_type = Some(v.into());
        self
    }

    pub fn zones(mut self, v: &str) -> Self {
        self.map_zones = Some(v.into());
        self
    }

    pub fn geography(mut self, v: &str) -> Self {
        self.geographic_range = Some(v.into());
        self
    }

    pub fn site(mut self, v: &str) -> Self {
        self.site_description = Some(v.into());
        self
    }

    pub fn description(mut self, v: &str) -> Self {
        self.vegetation_description = Some(v.into());
        self
    }

    pub fn document(mut self, v: &str) -> Self {
        self.document = Some(v.into());
        self
    }

    pub fn modeler(mut self, name: &str, email: Option<&str>) -> Self {
        self.modelers.push((name.into(), email.map(Into::into)));
        self
    }

    pub fn reviewer(mut self, name: &str, email: Option<&str>) -> Self {
        self.reviewers.push((name.into(), email.map(Into::into)));
        self
    }

    pub fn fire(mut self, severity: &str, interval: f64, percent: f64) -> Self {
        self.fires.push((severity.into(), interval, percent));
        self
    }
}

/// A temporary BPS database (and documents directory) populated from [`ModelSpec`]s.
#[allow(dead_code)]
pub struct BpsFixture {
    pub dir: TempDir,
    pub db_path: PathBuf,
    pub docs_dir: PathBuf,
    pub models: Vec<ModelSpec>,
}

#[allow(dead_code)]
impl BpsFixture {
    pub fn build(models: Vec<ModelSpec>) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let db_path = dir.path().join("bps_database.db");
        let docs_dir = dir.path().join("all_bps_docs");
        std::fs::create_dir_all(&docs_dir).expect("docs dir");
        populate(&db_path, &models).expect("populate fixture db");
        Self {
            dir,
            db_path,
            docs_dir,
            models,
        }
    }

    /// A small dataset with oak, pine, and grassland models across a few zones.
    pub fn standard() -> Self {
        Self::build(standard_models())
    }

    pub fn config(&self) -> ExplorerConfig {
        ExplorerConfig {
            db_path: self.db_path.clone(),
            docs_dir: self.docs_dir.clone(),
            ..ExplorerConfig::for_database(&self.db_path)
        }
    }

    pub fn explorer(&self) -> Explorer {
        Explorer::new(self.config())
    }

    pub fn write_document(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.docs_dir.join(name);
        std::fs::write(&path, bytes).expect("write document");
        path
    }

    pub fn spec(&self, id: &str) -> &ModelSpec {
        self.models
            .iter()
            .find(|m| m.id == id)
            .unwrap_or_else(|| panic!("no fixture model {id}"))
    }
}

pub fn standard_models() -> Vec<ModelSpec> {
    vec![
        ModelSpec::new("10080_1_2_3_7")
            .name("Oregon White Oak Woodland")
            .vegetation("Forest and Woodland\nMap Zone 7")
            .zones("1, 2, 3, 7")
            .geography("Willamette Valley and Puget Trough")
            .site("Dry, well-drained slopes")
            .description("Open canopy of Quercus garryana")
            .document("10080_1_2_3_7.docx")
            .modeler("Ann Modeler", Some("ann@example.org"))
            .modeler("Bo Second", None)
            .reviewer("Cy Reviewer", Some("cy@example.org"))
            .fire("Replacement", 250.0, 5.0)
            .fire("Low (Surface)", 12.0, 80.0)
            .fire("All Fires", 10.0, 100.0),
        ModelSpec::new("10200_12")
            .name("Ponderosa Pine Forest")
            .vegetation("Forest and Woodland")
            .zones("12")
            .geography("Southern Rockies")
            .site("Montane benches")
            .description("Pinus ponderosa with scattered OAK understory")
            .document("10200_12.docx")
            .modeler("Dee Forester", Some("dee@example.org"))
            .fire("Replacement", 150.0, 10.0)
            .fire("All Fires", 8.0, 100.0),
        ModelSpec::new("11350_17_18")
            .name("Great Basin Grassland")
            .vegetation("Grassland")
            .zones("17,18")
            .geography("Great Basin")
            .site("Valley floors")
            .description("Bunchgrass steppe")
            .modeler("Eve Steppe", None)
            .reviewer("Ann Modeler", Some("ann@example.org"))
            .fire("Replacement", 30.0, 60.0),
        ModelSpec::new("13030_27")
            .name("Appalachian Oak-Hickory")
            .vegetation("Forest and Woodland Map Zone 27")
            .zones("27")
            .geography("Central Appalachians")
            .site("Ridges and upper slopes")
            .description("Mixed hardwoods")
            .document("13030_27.docx")
            .fire("Replacement", 1200.0, 2.0),
        ModelSpec::new("19000_70")
            .name("Alpine Dwarf-Shrubland")
            .vegetation("Shrubland")
            .zones("70")
            .geography("Alaska Range")
            .description("100% cover of dwarf shrubs_ sparse"),
    ]
}

fn populate(db_path: &Path, models: &[ModelSpec]) -> rusqlite::Result<()> {
    let mut conn = Connection::open(db_path)?;
    conn.execute_batch(SCHEMA)?;
    let tx = conn.transaction()?;
    let mut next_person = 1_i64;
    for m in models {
        tx.execute(
            "INSERT INTO bps_models VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                m.id,
                m.vegetation_type,
                m.map_zones,
                m.geographic_range,
                m.site_description,
                m.vegetation_description,
                m.document
            ],
        )?;
        if let Some(name) = &m.name {
            tx.execute(
                "INSERT INTO ref_con_long VALUES (?1, ?2, 'A', 20.0)",
                params![m.id, name],
            )?;
            tx.execute(
                "INSERT INTO ref_con_long VALUES (?1, ?2, 'B', 80.0)",
                params![m.id, name],
            )?;
            tx.execute(
                "INSERT INTO ref_con_modified VALUES (?1, ?2, 25.0, 75.0)",
                params![m.id, name],
            )?;
        }

        // Each modeler gets one junction row; reviewers ride on the same rows
        // (or on extra rows when they outnumber the modelers).
        let rows = m.modelers.len().max(m.reviewers.len());
        for i in 0..rows {
            let modeler_id = match m.modelers.get(i) {
                Some((name, email)) => {
                    let id = next_person;
                    next_person += 1;
                    tx.execute(
                        "INSERT INTO modelers VALUES (?1, ?2, ?3)",
                        params![id, name, email],
                    )?;
                    Some(id)
                }
                None => None,
            };
            let (reviewer, reviewer_email) = m
                .reviewers
                .get(i)
                .map(|(n, e)| (Some(n.clone()), e.clone()))
                .unwrap_or((None, None));
            tx.execute(
                "INSERT INTO models VALUES (?1, ?2, ?3, ?4)",
                params![m.id, modeler_id, reviewer, reviewer_email],
            )?;
        }

        for (severity, interval, percent) in &m.fires {
            tx.execute(
                "INSERT INTO fire_frequency VALUES (?1, ?2, ?3, ?4)",
                params![m.id, severity, interval, percent],
            )?;
        }
        tx.execute(
            "INSERT INTO bps_indicators VALUES (?1, 'QUGA', 'Quercus garryana', 'Oregon white oak')",
            params![m.id],
        )?;
        tx.execute(
            "INSERT INTO deterministic VALUES (?1, 'A', 'B', 0, 40)",
            params![m.id],
        )?;
        tx.execute(
            "INSERT INTO probabilistic VALUES (?1, 'A', 'A', 'RFIRE', 0.004, 250.0, 'Yes', 0)",
            params![m.id],
        )?;
        tx.execute(
            "INSERT INTO scls_descriptions VALUES (?1, 'A', 'A', 'Early development')",
            params![m.id],
        )?;
    }
    tx.commit()
}

/// The text of `spec`'s searchable fields, in model-view order.
#[allow(dead_code)]
pub fn searchable_text(spec: &ModelSpec) -> Vec<Option<&str>> {
    vec![
        Some(spec.id.as_str()),
        spec.name.as_deref(),
        spec.vegetation_type.as_deref(),
        spec.map_zones.as_deref(),
        spec.geographic_range.as_deref(),
        spec.site_description.as_deref(),
        spec.vegetation_description.as_deref(),
    ]
}

/// Reference predicate: does any searchable field of `spec` contain `term`?
#[allow(dead_code)]
pub fn spec_matches(spec: &ModelSpec, term: &str) -> bool {
    let needle = term.to_lowercase();
    searchable_text(spec)
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&needle))
}

/// Assert that a search result carries exactly the join data recorded for its fixture model.
#[allow(dead_code)]
pub fn assert_joined(result: &SearchResult, spec: &ModelSpec) {
    assert_eq!(result.model.model_id, spec.id);
    assert_eq!(result.model.bps_name, spec.name);
    assert_eq!(result.document, spec.document);

    let names = |role: ModelerRole| -> Vec<String> {
        let mut v: Vec<String> = result
            .modelers
            .iter()
            .filter(|m| m.role == role)
            .map(|m| m.name.clone())
            .collect();
        v.sort();
        v
    };
    let mut expected_modelers: Vec<String> = spec.modelers.iter().map(|(n, _)| n.clone()).collect();
    expected_modelers.sort();
    let mut expected_reviewers: Vec<String> =
        spec.reviewers.iter().map(|(n, _)| n.clone()).collect();
    expected_reviewers.sort();
    assert_eq!(names(ModelerRole::Modeler), expected_modelers, "modelers of {}", spec.id);
    assert_eq!(
        names(ModelerRole::Reviewer),
        expected_reviewers,
        "reviewers of {}",
        spec.id
    );
}
