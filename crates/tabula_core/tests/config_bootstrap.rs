use std::fs;
use tabula_core::{
    AppContext, BackendKind, Catalog, DatabaseError, DatabasesConfig, SqlLocation,
};

#[test]
fn app_defaults_boot_into_sqlite_file_and_json_storage() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabasesConfig::app_defaults(dir.path());
    let app = AppContext::boot(&config, &Catalog::with_defaults()).unwrap();

    assert_eq!(app.databases().default_name("pdo").as_deref(), Some("sqlite"));
    assert_eq!(app.databases().default_name("storage").as_deref(), Some("file"));
    assert_eq!(app.processors().names(), vec!["sqlite", "storage"]);
    assert!(!dir.path().join("database").exists());

    let sql = app.sql_database().unwrap();
    assert_eq!(
        sql.require_sql().unwrap().location(),
        &SqlLocation::File(dir.path().join("database").join("app.sqlite3"))
    );
    assert!(dir.path().join("database").join("app.sqlite3").exists());

    let storage = app.storage_database().unwrap();
    assert_eq!(storage.kind(), BackendKind::Storage);
    assert_eq!(storage.require_storage().unwrap().kind(), "json_file");
    assert!(dir.path().join("storage").join("database").join("file").is_dir());
}

#[test]
fn config_file_round_trips_through_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("database.json");
    let config = DatabasesConfig::app_defaults(dir.path().join("app"));
    fs::write(&path, config.to_json_pretty().unwrap()).unwrap();

    let loaded = DatabasesConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn load_reports_the_offending_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.json");

    let err = DatabasesConfig::load(&path).unwrap_err();
    match err {
        DatabaseError::ConfigLoad { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unsupported_driver_surfaces_on_first_resolution() {
    let config = DatabasesConfig::from_json_str(
        r#"{
            "defaults": { "pdo": "mysql" },
            "databases": {
                "mysql": { "factory": "sql", "config": { "driver": "mysql", "database": "app" } }
            }
        }"#,
    )
    .unwrap();
    let app = AppContext::boot(&config, &Catalog::with_defaults()).unwrap();

    let err = app.sql_database().unwrap_err();
    assert!(matches!(
        err.root_cause(),
        DatabaseError::InvalidParameter { key, .. } if key == "driver"
    ));
    assert!(!app.databases().is_resolved("mysql"));
}

#[test]
fn dangling_default_fails_only_when_used() {
    let config = DatabasesConfig::from_json_str(
        r#"{ "defaults": { "storage": "ghost" }, "processors": ["storage"] }"#,
    )
    .unwrap();
    let app = AppContext::boot(&config, &Catalog::with_defaults()).unwrap();

    let err = app.storage_database().unwrap_err();
    assert!(matches!(err, DatabaseError::UnknownDatabase(name) if name == "ghost"));
}
