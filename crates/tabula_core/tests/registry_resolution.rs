use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tabula_core::{
    BackendKind, Database, DatabaseError, DatabaseFactory, DatabaseRegistry, DbResult,
    MemoryStorage, Parameters, SqlDatabaseFactory, StorageDatabaseFactory,
};

struct CountingFactory {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingFactory {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DatabaseFactory for CountingFactory {
    fn create_database(
        &self,
        name: &str,
        _parameters: &Parameters,
        _databases: &DatabaseRegistry,
    ) -> DbResult<Database> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        Ok(Database::storage(name, MemoryStorage::new()))
    }
}

fn sqlite_memory() -> Parameters {
    Parameters::new()
        .with("driver", "sqlite")
        .with("database", ":memory:")
}

#[test]
fn repeated_get_returns_the_same_handle() {
    let registry = DatabaseRegistry::new();
    let factory = CountingFactory::new(Duration::ZERO);
    registry
        .register("cache", factory.clone(), Parameters::new())
        .unwrap();

    assert!(!registry.is_resolved("cache"));
    let first = registry.get("cache").unwrap();
    let second = registry.get("cache").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(factory.calls(), 1);
    assert!(registry.is_resolved("cache"));
}

#[test]
fn unknown_names_and_roles_are_reported() {
    let registry = DatabaseRegistry::new();

    let err = registry.get("missing").unwrap_err();
    assert!(matches!(err, DatabaseError::UnknownDatabase(name) if name == "missing"));

    let err = registry.default("pdo").unwrap_err();
    assert!(matches!(err, DatabaseError::UnknownRole(role) if role == "pdo"));
}

#[test]
fn default_may_be_declared_before_its_database() {
    let registry = DatabaseRegistry::new();
    registry.add_default("pdo", "primary");

    let err = registry.default("pdo").unwrap_err();
    assert!(matches!(err, DatabaseError::UnknownDatabase(name) if name == "primary"));

    registry
        .register("primary", Arc::new(SqlDatabaseFactory), sqlite_memory())
        .unwrap();
    let primary = registry.default("pdo").unwrap();
    assert_eq!(primary.name(), "primary");
    assert!(Arc::ptr_eq(&primary, &registry.get("primary").unwrap()));
}

#[test]
fn duplicate_registration_keeps_the_first_entry() {
    let registry = DatabaseRegistry::new();
    registry
        .register("primary", Arc::new(SqlDatabaseFactory), sqlite_memory())
        .unwrap();

    let err = registry
        .register(
            "primary",
            Arc::new(StorageDatabaseFactory),
            Parameters::new().with("storage", "memory"),
        )
        .unwrap_err();
    assert!(matches!(err, DatabaseError::DuplicateName(name) if name == "primary"));

    assert_eq!(registry.get("primary").unwrap().kind(), BackendKind::Sql);
    assert_eq!(registry.names(), vec!["primary"]);
}

#[test]
fn concurrent_first_access_constructs_exactly_once() {
    const THREADS: usize = 8;

    let registry = Arc::new(DatabaseRegistry::new());
    let factory = CountingFactory::new(Duration::from_millis(20));
    registry
        .register("shared", factory.clone(), Parameters::new())
        .unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles = (0..THREADS)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.get("shared").unwrap()
            })
        })
        .collect::<Vec<_>>();
    let resolved = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect::<Vec<_>>();

    assert_eq!(factory.calls(), 1);
    assert!(resolved
        .iter()
        .all(|database| Arc::ptr_eq(database, &resolved[0])));
}

#[test]
fn construction_of_one_name_does_not_block_another() {
    let registry = Arc::new(DatabaseRegistry::new());
    let slow = CountingFactory::new(Duration::from_millis(200));
    registry.register("slow", slow, Parameters::new()).unwrap();
    registry
        .register("fast", Arc::new(SqlDatabaseFactory), sqlite_memory())
        .unwrap();

    let background = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.get("slow").map(|database| database.kind()))
    };
    thread::sleep(Duration::from_millis(20));

    let started_at = Instant::now();
    assert_eq!(registry.get("fast").unwrap().kind(), BackendKind::Sql);
    assert!(started_at.elapsed() < Duration::from_millis(150));
    assert_eq!(background.join().unwrap().unwrap(), BackendKind::Storage);
}

#[test]
fn missing_parameters_are_listed_on_resolution() {
    let registry = DatabaseRegistry::new();
    registry
        .register(
            "primary",
            Arc::new(SqlDatabaseFactory),
            Parameters::new().with("busy_timeout_ms", 100),
        )
        .unwrap();

    let err = registry.get("primary").unwrap_err();
    assert!(err.to_string().contains("primary"));
    match err {
        DatabaseError::DatabaseConstruction { database, source } => {
            assert_eq!(database, "primary");
            match *source {
                DatabaseError::InvalidConfig { missing_keys, .. } => {
                    assert_eq!(missing_keys, vec!["driver", "database"]);
                }
                other => panic!("unexpected cause: {other}"),
            }
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn pdo_role_resolves_to_a_working_sql_database() {
    let registry = DatabaseRegistry::new();
    registry
        .register("primary", Arc::new(SqlDatabaseFactory), sqlite_memory())
        .unwrap();
    registry.add_default("pdo", "primary");

    let database = registry.default("pdo").unwrap();
    assert_eq!(database.name(), "primary");

    let sql = database.require_sql().unwrap();
    sql.execute_batch("CREATE TABLE users (name TEXT); INSERT INTO users VALUES ('John'), ('Mia');")
        .unwrap();
    assert_eq!(
        sql.fetch_column("SELECT name FROM users").unwrap(),
        vec![json!("John"), json!("Mia")]
    );
}
