use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use pattern_import_export::format::FormatRegistry;
use pattern_import_export::job::observability::{
    CompositeObserver, FileObserver, JobContext, JobKind, JobObserver, JobSeverity, JobStats,
    TracingObserver,
};
use pattern_import_export::job::{ImportStatus, JobOptions, PatternJob};
use pattern_import_export::pattern::{ExportLine, Pattern, PatternRegistry};
use pattern_import_export::store::{
    BulkLoader, LoadBatch, LoadContext, LoadResult, MemoryStore, RecordLookup,
};
use pattern_import_export::types::{DataType, Field, RecordId, Schema, SchemaRegistry, Value};
use pattern_import_export::{PatternError, PatternResult};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn tmp_file(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("pattern-import-export-{name}-{nanos}.log"))
}

fn schemas() -> SchemaRegistry {
    SchemaRegistry::new()
        .with(Schema::new(
            "res.partner",
            vec![
                Field::new("name", DataType::Utf8).required(),
                Field::many2one("country_id", "res.country"),
                Field::many2one("parent_id", "res.partner"),
                Field::one2many("child_ids", "res.partner", "parent_id"),
                Field::many2many("category_id", "res.partner.category"),
            ],
        ))
        .with(Schema::new(
            "res.country",
            vec![Field::new("code", DataType::Utf8)],
        ))
        .with(Schema::new(
            "res.partner.category",
            vec![Field::new("name", DataType::Utf8)],
        ))
}

fn patterns() -> PatternRegistry {
    PatternRegistry::new()
        .with(
            Pattern::new(
                "partners",
                "Partners",
                "res.partner",
                vec![
                    ExportLine::new("id"),
                    ExportLine::new("name"),
                    ExportLine::new("country_id/code"),
                    ExportLine::new("category_id/id").occurrences(2),
                    ExportLine::new("child_ids").sub_pattern("contacts").occurrences(2),
                ],
            )
            .with_format("csv"),
        )
        .with(Pattern::new(
            "contacts",
            "Contacts",
            "res.partner",
            vec![ExportLine::new("id"), ExportLine::new("name")],
        ))
}

/// Countries and categories shared by every database of the test.
fn seeded_store() -> MemoryStore {
    let mut store = MemoryStore::new(schemas());
    store.create("res.country", json!({"code": "FR"})).unwrap();
    store.create("res.country", json!({"code": "BE"})).unwrap();
    store
        .create_with_xmlid("res.partner.category", "cat_vip", json!({"name": "VIP"}))
        .unwrap();
    store
        .create_with_xmlid("res.partner.category", "cat_b2b", json!({"name": "B2B"}))
        .unwrap();
    store
}

#[derive(Default)]
struct RecordingObserver {
    successes: Mutex<Vec<(JobKind, usize)>>,
    failures: Mutex<Vec<(JobKind, JobSeverity)>>,
    alerts: Mutex<Vec<JobSeverity>>,
}

impl JobObserver for RecordingObserver {
    fn on_success(&self, ctx: &JobContext, stats: JobStats) {
        self.successes.lock().unwrap().push((ctx.kind, stats.rows));
    }

    fn on_failure(&self, ctx: &JobContext, severity: JobSeverity, _error: &PatternError) {
        self.failures.lock().unwrap().push((ctx.kind, severity));
    }

    fn on_alert(&self, _ctx: &JobContext, severity: JobSeverity, _error: &PatternError) {
        self.alerts.lock().unwrap().push(severity);
    }
}

/// Loader whose backend is down.
struct OfflineStore;

impl RecordLookup for OfflineStore {
    fn search_eq(&self, _: &str, _: &str, _: &Value) -> PatternResult<Vec<RecordId>> {
        Ok(Vec::new())
    }
}

impl BulkLoader for OfflineStore {
    fn load(&mut self, _: &LoadContext, _: &LoadBatch) -> PatternResult<LoadResult> {
        Err(PatternError::Load {
            message: "connection refused".to_string(),
        })
    }
}

#[test]
fn export_then_import_into_another_database_reproduces_the_file() {
    init_tracing();
    let patterns = patterns();
    let schemas = schemas();
    let formats = FormatRegistry::with_defaults();
    let job = PatternJob::new(&patterns, &schemas, &formats);

    let mut source = seeded_store();
    let fr = source.search_eq("res.country", "code", &"FR".into()).unwrap()[0];
    let vip = source.resolve_xmlid("res.partner.category", "cat_vip").unwrap();
    let b2b = source.resolve_xmlid("res.partner.category", "cat_b2b").unwrap();
    let wood = source
        .create_with_xmlid(
            "res.partner",
            "p_wood",
            json!({"name": "Wood Corner", "country_id": fr, "category_id": [vip, b2b]}),
        )
        .unwrap();
    for (xmlid, name) in [("c_willie", "Willie Burke"), ("c_ron", "Ron Gibson")] {
        source
            .create_with_xmlid("res.partner", xmlid, json!({"name": name, "parent_id": wood}))
            .unwrap();
    }
    let deco = source
        .create_with_xmlid("res.partner", "p_deco", json!({"name": "Deco Addict"}))
        .unwrap();

    let exported = job.export("partners", &[wood, deco], &source).unwrap();
    assert_eq!(
        String::from_utf8(exported.data.clone()).unwrap(),
        "id,name,country_id|code,category_id|1|id,category_id|2|id,child_ids|1|id,child_ids|1|name,child_ids|2|id,child_ids|2|name\n\
         p_wood,Wood Corner,FR,cat_vip,cat_b2b,c_willie,Willie Burke,c_ron,Ron Gibson\n\
         p_deco,Deco Addict,,,,,,,\n"
    );

    let mut target = seeded_store();
    let report = job.import("partners", &exported.data, &mut target).unwrap();
    assert_eq!(report.status, ImportStatus::Success);
    assert_eq!(report.ids.len(), 2);
    assert_eq!(target.len("res.partner"), 4);

    let reexported = job.export("partners", &report.ids, &target).unwrap();
    assert_eq!(reexported.data, exported.data);
}

#[test]
fn observer_sees_successes_and_failures_per_job_kind() {
    init_tracing();
    let obs = Arc::new(RecordingObserver::default());
    let patterns = patterns();
    let schemas = schemas();
    let formats = FormatRegistry::with_defaults();
    let job = PatternJob::new(&patterns, &schemas, &formats).with_options(JobOptions {
        observer: Some(Arc::new(CompositeObserver::new(vec![
            obs.clone(),
            Arc::new(TracingObserver),
        ]))),
        ..JobOptions::default()
    });
    let mut store = seeded_store();

    job.generate_template("partners").unwrap();
    let report = job
        .import("partners", b"name,country_id|code\nA,FR\nB,ZZ\n", &mut store)
        .unwrap();
    assert_eq!(report.status, ImportStatus::Failed);
    job.export("partners", &report.ids, &store).unwrap();
    let _ = job.generate_template("missing").unwrap_err();

    assert_eq!(
        *obs.successes.lock().unwrap(),
        [(JobKind::Template, 0), (JobKind::Export, 1)]
    );
    assert_eq!(
        *obs.failures.lock().unwrap(),
        [(JobKind::Import, JobSeverity::Error), (JobKind::Template, JobSeverity::Error)]
    );
    assert!(obs.alerts.lock().unwrap().is_empty());
}

#[test]
fn observer_alerts_on_critical_load_failures() {
    let obs = Arc::new(RecordingObserver::default());
    let patterns = patterns();
    let schemas = schemas();
    let formats = FormatRegistry::with_defaults();
    let job = PatternJob::new(&patterns, &schemas, &formats).with_options(JobOptions {
        observer: Some(obs.clone()),
        alert_at_or_above: JobSeverity::Critical,
        ..JobOptions::default()
    });

    let err = job
        .import("partners", b"name\nA\n", &mut OfflineStore)
        .unwrap_err();
    assert!(matches!(err, PatternError::Load { .. }));
    assert_eq!(
        *obs.failures.lock().unwrap(),
        [(JobKind::Import, JobSeverity::Critical)]
    );
    assert_eq!(*obs.alerts.lock().unwrap(), [JobSeverity::Critical]);
}

#[test]
fn alert_threshold_can_include_rejected_imports() {
    let obs = Arc::new(RecordingObserver::default());
    let patterns = patterns();
    let schemas = schemas();
    let formats = FormatRegistry::with_defaults();
    let job = PatternJob::new(&patterns, &schemas, &formats).with_options(JobOptions {
        observer: Some(obs.clone()),
        alert_at_or_above: JobSeverity::Error,
        ..JobOptions::default()
    });
    let mut store = seeded_store();

    job.import("partners", b"name,country_id|code\nB,ZZ\n", &mut store)
        .unwrap();
    assert_eq!(*obs.alerts.lock().unwrap(), [JobSeverity::Error]);
}

#[test]
fn file_observer_keeps_each_report_on_one_line() {
    let path = tmp_file("observer");
    let patterns = patterns();
    let schemas = schemas();
    let formats = FormatRegistry::with_defaults();
    let job = PatternJob::new(&patterns, &schemas, &formats).with_options(JobOptions {
        observer: Some(Arc::new(FileObserver::new(&path))),
        ..JobOptions::default()
    });
    let mut store = seeded_store();

    job.import("partners", b"name,country_id|code\nA,FR\nB,ZZ\n", &mut store)
        .unwrap();
    job.generate_template("partners").unwrap();

    let log = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("fail severity=Error kind=import pattern=partners format=csv"));
    assert!(lines[0].contains(
        "number of errors: 1, number of warnings: 0 | Detail: | Line 3: error, No record matched"
    ));
    assert!(lines[1].contains("ok kind=template pattern=partners format=csv rows=0"));
    let _ = std::fs::remove_file(&path);
}
