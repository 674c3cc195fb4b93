use std::cell::{Cell, RefCell};
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rusqlite::Connection;
use tidemark_common::{Direction, Divergence, Error};
use tidemark_db::{Ledger, TableName};
use tidemark_migrate::{Migration, MigrationContext, Mode, Runner, SqlMigrationSource};

const TABLE: &str = "test_migrations";

/// Context carrying more than a connection, the way real callers extend it.
struct TestContext {
    conn: Connection,
    notes: RefCell<Vec<String>>,
}

impl MigrationContext for TestContext {
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn open(path: &std::path::Path) -> TestContext {
    TestContext {
        conn: Connection::open(path).expect("open sqlite file"),
        notes: RefCell::new(Vec::new()),
    }
}

fn memory() -> TestContext {
    TestContext {
        conn: Connection::open_in_memory().expect("open in-memory sqlite"),
        notes: RefCell::new(Vec::new()),
    }
}

fn migrations() -> Vec<Migration<TestContext>> {
    vec![
        Migration::new(
            "2022-07-09-create-users",
            |ctx: &TestContext| {
                ctx.conn
                    .execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);")?;
                ctx.notes.borrow_mut().push("created users".into());
                Ok(())
            },
            |ctx: &TestContext| Ok(ctx.conn.execute_batch("DROP TABLE users;")?),
        )
        .with_description("Create users"),
        Migration::new(
            "2022-07-10-add-users-display-name",
            |ctx: &TestContext| {
                Ok(ctx
                    .conn
                    .execute_batch("ALTER TABLE users ADD COLUMN display_name TEXT;")?)
            },
            |ctx: &TestContext| {
                Ok(ctx
                    .conn
                    .execute_batch("ALTER TABLE users DROP COLUMN display_name;")?)
            },
        )
        .with_description("Add display name to users"),
    ]
}

fn runner(migrations: Vec<Migration<TestContext>>, mode: Mode) -> Runner<TestContext> {
    Runner::new(migrations)
        .with_table(TableName::new(TABLE).unwrap())
        .with_mode(mode)
        .with_logger(|_| {})
}

fn ledger_ids(conn: &Connection) -> Vec<String> {
    let table = TableName::new(TABLE).unwrap();
    Ledger::new(conn, &table)
        .entries()
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect()
}

fn ids<C>(executed: &[&Migration<C>]) -> Vec<String> {
    executed.iter().map(|m| m.id().to_string()).collect()
}

/// `(table, column)` pairs for every table except the ledger.
fn schema(conn: &Connection) -> Vec<(String, String)> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT m.name, p.name FROM sqlite_master m JOIN pragma_table_info(m.name) p
             WHERE m.type = 'table' AND m.name <> '{TABLE}'
             ORDER BY m.name, p.cid"
        ))
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[test]
fn empty_migrations_set_up_table() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("app.db");

    let runner = runner(Vec::new(), Mode::Latest);
    let executed = runner
        .run_with(|| Ok(open(&db)), |_ctx| Ok(()))
        .unwrap();
    assert!(executed.is_empty());

    let conn = Connection::open(&db).unwrap();
    assert!(ledger_ids(&conn).is_empty());
}

#[test]
fn latest_runs_all_migrations() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("app.db");
    let declared = migrations();
    let expected: Vec<String> = declared.iter().map(|m| m.id().to_string()).collect();

    let runner = runner(declared, Mode::Latest);
    let executed = runner
        .run_with(
            || Ok(open(&db)),
            |ctx| {
                assert_eq!(*ctx.notes.borrow(), ["created users"]);
                Ok(())
            },
        )
        .unwrap();
    assert_eq!(ids(&executed), expected);

    let conn = Connection::open(&db).unwrap();
    assert_eq!(ledger_ids(&conn), expected);
    conn.execute(
        "INSERT INTO users (name, display_name) VALUES ('andre', 'André Gaul')",
        [],
    )
    .unwrap();
}

#[test]
fn latest_and_down_runs_all_but_one_migration() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("app.db");

    runner(migrations(), Mode::Latest)
        .run_with(|| Ok(open(&db)), |_| Ok(()))
        .unwrap();

    let conn = Connection::open(&db).unwrap();
    conn.execute(
        "INSERT INTO users (name, display_name) VALUES ('andre', 'André Gaul')",
        [],
    )
    .unwrap();

    let down = runner(migrations(), Mode::Down);
    let executed = down.run_with(|| Ok(open(&db)), |_| Ok(())).unwrap();
    assert_eq!(ids(&executed), ["2022-07-10-add-users-display-name"]);

    assert_eq!(ledger_ids(&conn), ["2022-07-09-create-users"]);
    let rows: Vec<(i64, String)> = conn
        .prepare("SELECT * FROM users")
        .unwrap()
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows, [(1, "andre".to_string())]);
}

#[test]
fn up_applies_one_migration_at_a_time() {
    let ctx = memory();
    let up = runner(migrations(), Mode::Up);

    assert_eq!(ids(&up.run(&ctx).unwrap()), ["2022-07-09-create-users"]);
    assert_eq!(ledger_ids(&ctx.conn), ["2022-07-09-create-users"]);

    assert_eq!(
        ids(&up.run(&ctx).unwrap()),
        ["2022-07-10-add-users-display-name"]
    );
    assert_eq!(ledger_ids(&ctx.conn).len(), 2);
}

#[test]
fn up_with_nothing_remaining_is_noop() {
    let ctx = memory();
    runner(migrations(), Mode::Latest).run(&ctx).unwrap();

    let lines = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let up = Runner::new(migrations())
        .with_table(TableName::new(TABLE).unwrap())
        .with_mode(Mode::Up)
        .with_logger(move |msg| sink.lock().unwrap().push(msg.to_string()));

    let commits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&commits);
    ctx.conn.commit_hook(Some(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        false
    }));

    let before = ledger_ids(&ctx.conn);
    assert!(up.run(&ctx).unwrap().is_empty());
    assert_eq!(ledger_ids(&ctx.conn), before);
    assert_eq!(*lines.lock().unwrap(), ["No migrations to apply."]);
    assert_eq!(commits.load(Ordering::SeqCst), 0);

    // The hook does see commits on this connection.
    ctx.conn
        .execute("INSERT INTO users (name) VALUES ('andre')", [])
        .unwrap();
    assert_eq!(commits.load(Ordering::SeqCst), 1);
}

#[test]
fn latest_twice_is_idempotent() {
    let ctx = memory();
    let latest = runner(migrations(), Mode::Latest);

    assert_eq!(latest.run(&ctx).unwrap().len(), 2);
    let ledger_before = Ledger::new(&ctx.conn, latest.table()).entries().unwrap();

    assert!(latest.run(&ctx).unwrap().is_empty());
    let ledger_after = Ledger::new(&ctx.conn, latest.table()).entries().unwrap();
    assert_eq!(ledger_before, ledger_after);
}

#[test]
fn up_then_down_round_trips_schema_and_ledger() {
    let ctx = memory();
    runner(migrations()[..1].to_vec(), Mode::Latest)
        .run(&ctx)
        .unwrap();

    let schema_before = schema(&ctx.conn);
    let ledger_before = ledger_ids(&ctx.conn);

    runner(migrations(), Mode::Up).run(&ctx).unwrap();
    assert_ne!(schema(&ctx.conn), schema_before);

    runner(migrations(), Mode::Down).run(&ctx).unwrap();
    assert_eq!(schema(&ctx.conn), schema_before);
    assert_eq!(ledger_ids(&ctx.conn), ledger_before);
}

#[test]
fn failing_handler_rolls_back_its_partial_effects() {
    let ctx = memory();
    let mut declared = migrations();
    declared.push(Migration::new(
        "2022-07-11-broken",
        |ctx: &TestContext| {
            ctx.conn.execute_batch("CREATE TABLE orders (id INTEGER);")?;
            ctx.conn
                .execute("INSERT INTO users (name) VALUES ('half-done')", [])?;
            anyhow::bail!("disk quota exceeded")
        },
        |_: &TestContext| Ok(()),
    ));
    let third_ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&third_ran);
    declared.push(Migration::new(
        "2022-07-12-after-broken",
        move |_: &TestContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        |_: &TestContext| Ok(()),
    ));

    let err = runner(declared, Mode::Latest).run(&ctx).unwrap_err();
    match err {
        Error::Handler {
            id,
            direction,
            source,
        } => {
            assert_eq!(id, "2022-07-11-broken");
            assert_eq!(direction, Direction::Up);
            assert_eq!(source.to_string(), "disk quota exceeded");
        }
        other => panic!("expected handler failure, got {other:?}"),
    }

    // Earlier steps stay committed, the failing one leaves no trace, and
    // nothing after it ran.
    assert_eq!(
        ledger_ids(&ctx.conn),
        ["2022-07-09-create-users", "2022-07-10-add-users-display-name"]
    );
    assert!(schema(&ctx.conn).iter().all(|(name, _)| name != "orders"));
    let users: i64 = ctx
        .conn
        .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
        .unwrap();
    assert_eq!(users, 0);
    assert_eq!(third_ran.load(Ordering::SeqCst), 0);
    assert!(ctx.conn.is_autocommit());
}

#[test]
fn ledger_write_failure_rolls_back_handler() {
    let ctx = memory();
    let declared = vec![Migration::new(
        "0001-sabotage",
        |ctx: &TestContext| {
            ctx.conn.execute_batch(&format!(
                "CREATE TABLE widgets (id INTEGER); DROP TABLE {TABLE};"
            ))?;
            Ok(())
        },
        |_: &TestContext| Ok(()),
    )];

    let err = runner(declared, Mode::Latest).run(&ctx).unwrap_err();
    assert!(matches!(err, Error::LedgerWrite { ref id, .. } if id == "0001-sabotage"));

    // The ledger table drop and the new table were both undone.
    assert!(ledger_ids(&ctx.conn).is_empty());
    assert!(schema(&ctx.conn).iter().all(|(name, _)| name != "widgets"));
}

#[test]
fn rerun_after_failure_resumes_from_ledger() {
    let ctx = memory();
    let fail = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let flag = Arc::clone(&fail);

    let mut declared = migrations();
    declared.push(Migration::new(
        "2022-07-11-flaky",
        move |ctx: &TestContext| {
            if flag.load(Ordering::SeqCst) {
                anyhow::bail!("connection reset");
            }
            Ok(ctx.conn.execute_batch("CREATE TABLE flaky (id INTEGER);")?)
        },
        |ctx: &TestContext| Ok(ctx.conn.execute_batch("DROP TABLE flaky;")?),
    ));
    let latest = runner(declared, Mode::Latest);

    assert!(latest.run(&ctx).is_err());
    assert_eq!(ledger_ids(&ctx.conn).len(), 2);

    fail.store(false, Ordering::SeqCst);
    assert_eq!(ids(&latest.run(&ctx).unwrap()), ["2022-07-11-flaky"]);
    assert_eq!(ledger_ids(&ctx.conn).len(), 3);
}

#[test]
fn diverged_ledger_aborts_before_execution() {
    let ctx = memory();
    runner(migrations(), Mode::Up).run(&ctx).unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let mut reordered = vec![Migration::new(
        "2022-07-08-inserted-before",
        move |_: &TestContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        |_: &TestContext| Ok(()),
    )];
    reordered.extend(migrations());

    let err = runner(reordered, Mode::Latest).run(&ctx).unwrap_err();
    match err {
        Error::DivergedLedger(Divergence::Mismatch {
            index,
            expected,
            actual,
            ..
        }) => {
            assert_eq!(index, 0);
            assert_eq!(expected, "2022-07-08-inserted-before");
            assert_eq!(actual, "2022-07-09-create-users");
        }
        other => panic!("expected divergence, got {other:?}"),
    }
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(ledger_ids(&ctx.conn), ["2022-07-09-create-users"]);
}

#[test]
fn removed_applied_migration_diverges() {
    let ctx = memory();
    runner(migrations(), Mode::Latest).run(&ctx).unwrap();

    let err = runner(migrations()[..1].to_vec(), Mode::Down)
        .run(&ctx)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::DivergedLedger(Divergence::Unknown { index: 1, .. })
    ));
    assert_eq!(ledger_ids(&ctx.conn).len(), 2);
}

#[test]
fn teardown_runs_on_every_exit_path() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("app.db");
    let teardowns = Cell::new(0);
    let teardown = |_ctx: TestContext| -> tidemark_common::Result<()> {
        teardowns.set(teardowns.get() + 1);
        Ok(())
    };

    // success
    runner(migrations(), Mode::Latest)
        .run_with(|| Ok(open(&db)), teardown)
        .unwrap();
    // no-op
    runner(migrations(), Mode::Up)
        .run_with(|| Ok(open(&db)), teardown)
        .unwrap();
    // divergence
    assert!(
        runner(Vec::new(), Mode::Latest)
            .run_with(|| Ok(open(&db)), teardown)
            .is_err()
    );
    // handler failure
    let mut declared = migrations();
    declared[1] = Migration::new(
        "2022-07-10-add-users-display-name",
        |_: &TestContext| Ok(()),
        |_: &TestContext| anyhow::bail!("cannot drop"),
    );
    assert!(matches!(
        runner(declared, Mode::Down).run_with(|| Ok(open(&db)), teardown),
        Err(Error::Handler { .. })
    ));

    assert_eq!(teardowns.get(), 4);
}

#[test]
fn setup_failure_skips_run_and_teardown() {
    let torn_down = Cell::new(false);
    let err = runner(migrations(), Mode::Latest)
        .run_with(
            || Err(Error::Database("connection refused".into())),
            |_| {
                torn_down.set(true);
                Ok(())
            },
        )
        .unwrap_err();

    assert_eq!(err.to_string(), "database error: connection refused");
    assert!(!torn_down.get());
}

#[test]
fn run_error_wins_over_teardown_error() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("app.db");
    let declared = vec![Migration::new(
        "0001-fails",
        |_: &TestContext| anyhow::bail!("boom"),
        |_: &TestContext| Ok(()),
    )];

    let err = runner(declared, Mode::Latest)
        .run_with(
            || Ok(open(&db)),
            |_| Err(Error::Database("close failed".into())),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Handler { .. }));

    let err = runner(Vec::new(), Mode::Latest)
        .run_with(
            || Ok(open(&db)),
            |_| Err(Error::Database("close failed".into())),
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "database error: close failed");
}

#[test]
fn status_reports_applied_and_remaining_without_running() {
    let ctx = memory();
    let up = runner(migrations(), Mode::Up);
    up.run(&ctx).unwrap();

    let state = up.status(&ctx).unwrap();
    assert_eq!(state.applied.len(), 1);
    assert_eq!(state.applied[0].migration.id(), "2022-07-09-create-users");
    assert_eq!(state.applied[0].entry.sort, 1);
    assert_eq!(state.remaining.len(), 1);
    assert_eq!(ledger_ids(&ctx.conn).len(), 1);
}

#[test]
fn sql_directory_migrations_run_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let sql = dir.path().join("migrations");
    fs::create_dir(&sql).unwrap();
    fs::write(
        sql.join("0001-users.up.sql"),
        "-- Create users\nCREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);",
    )
    .unwrap();
    fs::write(sql.join("0001-users.down.sql"), "DROP TABLE users;").unwrap();
    fs::write(
        sql.join("0002-posts.up.sql"),
        "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id));",
    )
    .unwrap();
    fs::write(sql.join("0002-posts.down.sql"), "DROP TABLE posts;").unwrap();

    let conn = Connection::open(dir.path().join("app.db")).unwrap();
    let declared: Vec<Migration<Connection>> = SqlMigrationSource::new(&sql).load().unwrap();
    let latest = Runner::new(declared).with_logger(|_| {});

    assert_eq!(ids(&latest.run(&conn).unwrap()), ["0001-users", "0002-posts"]);
    let table = TableName::default();
    let entries = Ledger::new(&conn, &table).entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, "0001-users");
}
