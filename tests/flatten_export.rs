use pattern_import_export::format::FormatRegistry;
use pattern_import_export::job::{ExportOptions, JobOptions, PatternJob};
use pattern_import_export::pattern::{flatten, headers, DictTreeBuilder, ExportLine, Pattern, PatternRegistry};
use pattern_import_export::store::{MemoryStore, RecordSerializer};
use pattern_import_export::types::{DataType, Field, RecordId, Schema, SchemaRegistry, Value};
use pattern_import_export::PatternError;
use serde_json::json;

fn schemas() -> SchemaRegistry {
    SchemaRegistry::new()
        .with(Schema::new(
            "res.partner",
            vec![
                Field::new("name", DataType::Utf8).required(),
                Field::new("ref", DataType::Utf8),
                Field::many2one("country_id", "res.country"),
                Field::many2one("parent_id", "res.partner"),
                Field::one2many("child_ids", "res.partner", "parent_id"),
                Field::one2many("user_ids", "res.users", "partner_id"),
                Field::many2many("category_id", "res.partner.category"),
            ],
        ))
        .with(Schema::new(
            "res.users",
            vec![
                Field::new("login", DataType::Utf8).required(),
                Field::many2one("partner_id", "res.partner"),
                Field::many2many("company_ids", "res.company"),
            ],
        ))
        .with(Schema::new("res.company", vec![Field::new("name", DataType::Utf8)]))
        .with(Schema::new(
            "res.country",
            vec![Field::new("code", DataType::Utf8), Field::new("name", DataType::Utf8)],
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
                "partner_o2m",
                "Partner - O2M",
                "res.partner",
                vec![
                    ExportLine::new("id"),
                    ExportLine::new("name"),
                    ExportLine::new("user_ids").sub_pattern("users").occurrences(2),
                ],
            )
            .with_format("csv"),
        )
        .with(Pattern::new(
            "users",
            "Users",
            "res.users",
            vec![
                ExportLine::new("id"),
                ExportLine::new("login"),
                ExportLine::new("company_ids/name").occurrences(1),
            ],
        ))
        .with(
            Pattern::new(
                "partner_m2o",
                "Partner - M2O",
                "res.partner",
                vec![
                    ExportLine::new(".id"),
                    ExportLine::new("name"),
                    ExportLine::new("country_id/code"),
                    ExportLine::new("parent_id/country_id/code"),
                    ExportLine::new("category_id/name").occurrences(2),
                ],
            )
            .with_format("csv"),
        )
}

struct Fixture {
    store: MemoryStore,
    wood_corner: RecordId,
    deco_addict: RecordId,
}

fn fixture() -> Fixture {
    let mut store = MemoryStore::new(schemas());
    let company = store
        .create_with_xmlid("res.company", "base.main_company", json!({"name": "Awesome company"}))
        .unwrap();
    let fr = store
        .create("res.country", json!({"code": "FR", "name": "France"}))
        .unwrap();
    let be = store
        .create("res.country", json!({"code": "BE", "name": "Belgium"}))
        .unwrap();
    let vip = store
        .create("res.partner.category", json!({"name": "VIP"}))
        .unwrap();
    let wood_corner = store
        .create_with_xmlid(
            "res.partner",
            "base.res_partner_1",
            json!({"name": "Wood Corner", "country_id": fr, "category_id": [vip]}),
        )
        .unwrap();
    let deco_addict = store
        .create(
            "res.partner",
            json!({"name": "Deco Addict", "country_id": be, "parent_id": wood_corner}),
        )
        .unwrap();
    store
        .create_with_xmlid(
            "res.users",
            "demo_user_2",
            json!({"login": "demo2", "partner_id": wood_corner, "company_ids": [company]}),
        )
        .unwrap();
    Fixture {
        store,
        wood_corner,
        deco_addict,
    }
}

fn csv_text(data: &[u8]) -> String {
    String::from_utf8(data.to_vec()).unwrap()
}

#[test]
fn one2many_sub_pattern_exports_one_column_group_per_occurrence() {
    let fx = fixture();
    let patterns = patterns();
    let schemas = schemas();
    let formats = FormatRegistry::with_defaults();
    let job = PatternJob::new(&patterns, &schemas, &formats);

    let attachment = job.export("partner_o2m", &[fx.wood_corner], &fx.store).unwrap();

    assert_eq!(attachment.name, "Partner - O2M.csv");
    assert_eq!(attachment.format, "csv");
    assert_eq!(
        csv_text(&attachment.data),
        "id,name,user_ids|1|id,user_ids|1|login,user_ids|1|company_ids|1|name,user_ids|2|id,user_ids|2|login,user_ids|2|company_ids|1|name\n\
         base.res_partner_1,Wood Corner,demo_user_2,demo2,Awesome company,,,\n"
    );
}

#[test]
fn many2one_chains_and_database_ids_export() {
    let fx = fixture();
    let patterns = patterns();
    let schemas = schemas();
    let formats = FormatRegistry::with_defaults();
    let job = PatternJob::new(&patterns, &schemas, &formats);

    let attachment = job
        .export("partner_m2o", &[fx.wood_corner, fx.deco_addict], &fx.store)
        .unwrap();

    assert_eq!(
        csv_text(&attachment.data),
        format!(
            ".id,name,country_id|code,parent_id|country_id|code,category_id|1|name,category_id|2|name\n\
             {},Wood Corner,FR,,VIP,\n\
             {},Deco Addict,BE,FR,,\n",
            fx.wood_corner, fx.deco_addict
        )
    );
}

#[test]
fn records_beyond_the_occurrence_count_are_truncated() {
    let mut fx = fixture();
    for login in ["demo3", "demo4"] {
        fx.store
            .create("res.users", json!({"login": login, "partner_id": fx.wood_corner}))
            .unwrap();
    }
    let patterns = patterns();
    let tree = DictTreeBuilder::new(&patterns).build("partner_o2m").unwrap();
    let record = fx.store.to_tree("res.partner", fx.wood_corner, &tree).unwrap();
    assert_eq!(record["user_ids"].as_array().map(Vec::len), Some(3));

    let headers = headers(&patterns, "partner_o2m").unwrap();
    let row = flatten(&record, &headers);
    assert_eq!(row.get("user_ids|2|login"), Some(&Value::from("demo3")));
    assert!(row.headers().all(|h| !h.starts_with("user_ids|3")));
}

#[test]
fn template_has_headers_only() {
    let patterns = patterns();
    let schemas = schemas();
    let formats = FormatRegistry::with_defaults();
    let job = PatternJob::new(&patterns, &schemas, &formats);

    let template = job.generate_template("partner_m2o").unwrap();
    assert_eq!(
        csv_text(&template.data),
        ".id,name,country_id|code,parent_id|country_id|code,category_id|1|name,category_id|2|name\n"
    );
}

#[test]
fn domain_exports_select_records_through_the_store() {
    let fx = fixture();
    let patterns = patterns();
    let schemas = schemas();
    let formats = FormatRegistry::with_defaults();
    let job = PatternJob::new(&patterns, &schemas, &formats);

    let attachment = job
        .export_domain("partner_m2o", r#"[["name", "=", "Deco Addict"]]"#, &fx.store)
        .unwrap();
    let text = csv_text(&attachment.data);
    assert_eq!(text.lines().count(), 2);
    assert!(text.contains("Deco Addict"));

    let everything = job.export_domain("partner_m2o", "[]", &fx.store).unwrap();
    assert_eq!(csv_text(&everything.data).lines().count(), 3);
}

#[test]
fn unknown_export_format_fails_fast() {
    let fx = fixture();
    let patterns = PatternRegistry::new().with(
        Pattern::new("p", "P", "res.partner", vec![ExportLine::new("name")]).with_format("ods"),
    );
    let schemas = schemas();
    let formats = FormatRegistry::with_defaults();
    let job = PatternJob::new(&patterns, &schemas, &formats);

    let err = job.export("p", &[fx.wood_corner], &fx.store).unwrap_err();
    assert!(matches!(err, PatternError::UnknownFormat { .. }));
    assert_eq!(err.to_string(), "The export with the format ods doesn't exist!");
}

#[test]
fn pattern_lines_are_checked_against_the_schema_on_export() {
    let fx = fixture();
    let patterns = PatternRegistry::new().with(
        Pattern::new("p", "P", "res.partner", vec![ExportLine::new("nickname")]).with_format("csv"),
    );
    let schemas = schemas();
    let formats = FormatRegistry::with_defaults();
    let job = PatternJob::new(&patterns, &schemas, &formats).with_options(JobOptions {
        export: ExportOptions {
            sheet_name: Some("Partners".to_string()),
        },
        ..JobOptions::default()
    });

    let err = job.export("p", &[fx.wood_corner], &fx.store).unwrap_err();
    assert!(err.to_string().contains("has no field 'nickname'"));
}
