//! In-memory application used by the unit tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::app::{Application, RollbackReason, Transaction};
use crate::context::{Action, Actions, Models};
use crate::error::BoxError;
use crate::options::AppOptions;

#[derive(Debug, Default)]
struct FakeState {
    next_transaction: u64,
    begin_calls: usize,
    start_calls: usize,
    destroy_calls: usize,
    rollbacks: Vec<(u64, RollbackReason)>,
    /// (owning transaction, model, value)
    rows: Vec<(Option<u64>, String, Value)>,
}

#[derive(Debug, Clone)]
pub struct FakeModel {
    pub name: String,
    pub transaction: Option<u64>,
    state: Arc<Mutex<FakeState>>,
}

impl FakeModel {
    pub fn insert(&self, value: Value) {
        let mut state = self.state.lock().unwrap();
        state
            .rows
            .push((self.transaction, self.name.clone(), value));
    }

    /// Rows visible from this handle: committed ones plus its own transaction's.
    pub fn count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .rows
            .iter()
            .filter(|(tx, model, _)| {
                model == &self.name && (tx.is_none() || *tx == self.transaction)
            })
            .count()
    }
}

#[derive(Debug)]
pub struct FakeTransaction {
    pub id: u64,
    fail_rollback: bool,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl Transaction for FakeTransaction {
    async fn rollback(self, reason: RollbackReason) -> Result<(), BoxError> {
        let mut state = self.state.lock().unwrap();
        state.rows.retain(|(tx, _, _)| *tx != Some(self.id));
        state.rollbacks.push((self.id, reason));
        if self.fail_rollback {
            return Err("connection lost".into());
        }
        Ok(())
    }
}

pub struct FakeApp {
    pub root: PathBuf,
    pub options: AppOptions,
    models: Models<FakeModel>,
    actions: Actions<FakeApp>,
    state: Arc<Mutex<FakeState>>,
    drop_models: bool,
    fail_begin: bool,
    fail_rollback: bool,
    fail_start: bool,
}

impl FakeApp {
    pub fn with_models(names: &[&str]) -> Self {
        Self::build(PathBuf::new(), AppOptions::new(), names)
    }

    fn build(root: PathBuf, options: AppOptions, names: &[&str]) -> Self {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let models = names
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    FakeModel {
                        name: name.to_string(),
                        transaction: None,
                        state: Arc::clone(&state),
                    },
                )
            })
            .collect();

        let mut actions: Actions<FakeApp> = Actions::new();
        actions.register(Action::new("createUser", |ctx, input| async move {
            let users: &FakeModel = ctx.model("User").ok_or("no User model")?;
            users.insert(input);
            Ok::<Value, BoxError>(json!({ "count": users.count() }))
        }));
        actions.register(Action::new("countUsers", |ctx, _input| async move {
            let users: &FakeModel = ctx.model("User").ok_or("no User model")?;
            Ok::<Value, BoxError>(json!(users.count()))
        }));
        actions.register(Action::new("nested", |ctx, input| async move {
            ctx.call("createUser", input)
                .await
                .map_err(|e| Box::new(e) as BoxError)
        }));

        let fail_start = options.get_bool("failStart").unwrap_or(false);
        let fail_rollback = options.get_bool("failRollback").unwrap_or(false);

        Self {
            root,
            options,
            models,
            actions,
            state,
            drop_models: false,
            fail_begin: false,
            fail_rollback,
            fail_start,
        }
    }

    pub fn dropping_models(mut self) -> Self {
        self.drop_models = true;
        self
    }

    pub fn failing_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    pub fn begin_calls(&self) -> usize {
        self.state.lock().unwrap().begin_calls
    }

    pub fn start_calls(&self) -> usize {
        self.state.lock().unwrap().start_calls
    }

    pub fn destroy_calls(&self) -> usize {
        self.state.lock().unwrap().destroy_calls
    }

    pub fn rollbacks(&self) -> Vec<(u64, RollbackReason)> {
        self.state.lock().unwrap().rollbacks.clone()
    }
}

#[async_trait]
impl Application for FakeApp {
    type Model = FakeModel;
    type Transaction = FakeTransaction;

    async fn construct(root: &Path, options: AppOptions) -> Result<Self, BoxError> {
        let names: Vec<String> = options
            .get("models")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        Ok(Self::build(root.to_path_buf(), options.clone(), &names))
    }

    fn models(&self) -> &Models<FakeModel> {
        &self.models
    }

    fn actions(&self) -> &Actions<Self> {
        &self.actions
    }

    async fn start(&self) -> Result<(), BoxError> {
        self.state.lock().unwrap().start_calls += 1;
        tokio::task::yield_now().await;
        if self.fail_start {
            return Err("port already in use".into());
        }
        Ok(())
    }

    async fn begin_transaction(
        &self,
        models: Vec<FakeModel>,
    ) -> Result<(Vec<FakeModel>, FakeTransaction), BoxError> {
        if self.fail_begin {
            return Err("pool exhausted".into());
        }
        let id = {
            let mut state = self.state.lock().unwrap();
            state.begin_calls += 1;
            state.next_transaction += 1;
            state.next_transaction
        };

        let mut bound: Vec<FakeModel> = models
            .into_iter()
            .map(|model| FakeModel {
                transaction: Some(id),
                ..model
            })
            .collect();
        if self.drop_models {
            bound.pop();
        }

        Ok((
            bound,
            FakeTransaction {
                id,
                fail_rollback: self.fail_rollback,
                state: Arc::clone(&self.state),
            },
        ))
    }

    async fn destroy(&self) -> Result<(), BoxError> {
        self.state.lock().unwrap().destroy_calls += 1;
        Ok(())
    }
}
