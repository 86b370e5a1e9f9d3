//! SQLite-backed application used by the integration tests.
//!
//! Every model is a table with `(id, name)` columns. All handles share one
//! connection, so a transaction opened through `begin_transaction` covers
//! every model at once.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::{json, Value};

use spry_harness::{
    Action, Actions, AppOptions, Application, BoxError, Models, RollbackReason, Transaction,
};

/// Thread-safe handle to one SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    fn open(location: &str) -> Result<Self, BoxError> {
        let conn = if location == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(location)?
        };
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, BoxError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self.conn.lock().map_err(|_| "database lock poisoned")?;
        Ok(f(&conn)?)
    }
}

/// Model handle: one table, optionally bound to an open transaction.
#[derive(Clone)]
pub struct Table {
    pub name: String,
    pub transaction: Option<u64>,
    db: Database,
}

impl Table {
    pub fn create(&self, name: &str) -> Result<i64, BoxError> {
        let sql = format!("INSERT INTO \"{}\" (name) VALUES (?1)", self.name);
        self.db.with_conn(|conn| {
            conn.execute(&sql, params![name])?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn find_all(&self) -> Result<Vec<String>, BoxError> {
        let sql = format!("SELECT name FROM \"{}\" ORDER BY id", self.name);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count(&self) -> Result<u64, BoxError> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", self.name);
        self.db.with_conn(|conn| conn.query_row(&sql, [], |r| r.get(0)))
    }
}

pub struct SqliteTransaction {
    pub id: u64,
    db: Database,
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn rollback(self, reason: RollbackReason) -> Result<(), BoxError> {
        log::debug!("Rolling back transaction {} ({})", self.id, reason);
        self.db.with_conn(|conn| conn.execute_batch("ROLLBACK"))
    }
}

pub struct SqliteApp {
    pub root: PathBuf,
    pub options: AppOptions,
    db: Database,
    models: Models<Table>,
    actions: Actions<SqliteApp>,
    started: AtomicBool,
    destroyed: AtomicBool,
    next_transaction: AtomicU64,
}

impl SqliteApp {
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn register_actions(actions: &mut Actions<SqliteApp>) {
        actions.register(Action::new("registerUser", |ctx, input| async move {
            let name = input
                .get("name")
                .and_then(Value::as_str)
                .ok_or("registerUser needs a name")?;
            let users: &Table = ctx.model("User").ok_or("no User model")?;
            let id = users.create(name)?;
            Ok::<Value, BoxError>(json!({ "id": id, "transaction": users.transaction }))
        }));
        actions.register(Action::new("countUsers", |ctx, _input| async move {
            let users: &Table = ctx.model("User").ok_or("no User model")?;
            Ok::<Value, BoxError>(json!(users.count()?))
        }));
    }
}

fn model_names(options: &AppOptions) -> Vec<String> {
    options
        .get("models")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Application for SqliteApp {
    type Model = Table;
    type Transaction = SqliteTransaction;

    async fn construct(root: &Path, options: AppOptions) -> Result<Self, BoxError> {
        let db = Database::open(options.get_str("database").unwrap_or(":memory:"))?;

        let mut models = Models::new();
        for name in model_names(&options) {
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
                name
            );
            db.with_conn(|conn| conn.execute_batch(&ddl))?;
            models.insert(
                name.clone(),
                Table {
                    name,
                    transaction: None,
                    db: db.clone(),
                },
            );
        }

        let mut actions = Actions::new();
        Self::register_actions(&mut actions);

        Ok(Self {
            root: root.to_path_buf(),
            options,
            db,
            models,
            actions,
            started: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            next_transaction: AtomicU64::new(1),
        })
    }

    fn models(&self) -> &Models<Table> {
        &self.models
    }

    fn actions(&self) -> &Actions<Self> {
        &self.actions
    }

    async fn start(&self) -> Result<(), BoxError> {
        if self.options.get_bool("webserverDisabled") == Some(false) {
            return Err("webserver is not available in tests".into());
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn begin_transaction(
        &self,
        models: Vec<Table>,
    ) -> Result<(Vec<Table>, SqliteTransaction), BoxError> {
        self.db.with_conn(|conn| conn.execute_batch("BEGIN"))?;
        let id = self.next_transaction.fetch_add(1, Ordering::SeqCst);

        let bound = models
            .into_iter()
            .map(|table| Table {
                transaction: Some(id),
                ..table
            })
            .collect();

        Ok((
            bound,
            SqliteTransaction {
                id,
                db: self.db.clone(),
            },
        ))
    }

    async fn destroy(&self) -> Result<(), BoxError> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
