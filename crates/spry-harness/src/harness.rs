//! The test harness: one shared application, one rolled-back transaction
//! per test.

use std::fmt;
use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::app::{Application, Transaction};
use crate::context::AppContext;
use crate::error::{HarnessError, Result, TestFailure};
use crate::logging;
use crate::manifest::{create_manifest, hydrate_manifest, manifest_to_options};
use crate::options::{resolve_options, OverrideOptions};
use crate::transaction::{self, panic_message, Outcome};

/// Where the shared application is in its lifecycle.
enum Lifecycle<A> {
    Idle,
    Starting,
    Running(Arc<A>),
    Failed(String),
    Destroyed,
}

impl<A> Lifecycle<A> {
    /// False only while a `setup()` call is in flight.
    fn is_settled(&self) -> bool {
        !matches!(self, Lifecycle::Starting)
    }
}

/// State shared by every clone of a harness.
struct HarnessState<A> {
    lifecycle: watch::Sender<Lifecycle<A>>,
}

/// Runs tests inside a transaction that is always rolled back.
///
/// ```ignore
/// let harness = TestHarness::<MyApp>::new("tests/fixtures/blog", OverrideOptions::default());
/// harness.setup().await?;
///
/// let count = harness
///     .run(|app| async move {
///         app.call("createUser", json!({ "name": "ada" })).await?;
///         app.call("countUsers", json!(null)).await
///     })
///     .await?;
///
/// harness.destroy().await?;
/// ```
pub struct TestHarness<A: Application> {
    root: PathBuf,
    overrides: OverrideOptions,
    state: Arc<HarnessState<A>>,
}

impl<A: Application> Clone for TestHarness<A> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            overrides: self.overrides.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<A: Application> fmt::Debug for TestHarness<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestHarness")
            .field("root", &self.root)
            .field("overrides", &self.overrides)
            .finish()
    }
}

impl<A: Application> TestHarness<A> {
    /// Creates a harness for the application at `root`.
    ///
    /// `overrides` are laid over the harness defaults; flags left unset keep
    /// their default of `true`.
    pub fn new(root: impl Into<PathBuf>, overrides: OverrideOptions) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::Idle);
        Self {
            root: root.into(),
            overrides: OverrideOptions::defaults().overlay(&overrides),
            state: Arc::new(HarnessState { lifecycle }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The resolved override flags.
    pub fn options(&self) -> &OverrideOptions {
        &self.overrides
    }

    /// The shared application, once it is running.
    pub fn app(&self) -> Option<Arc<A>> {
        match &*self.state.lifecycle.borrow() {
            Lifecycle::Running(app) => Some(Arc::clone(app)),
            _ => None,
        }
    }

    /// Builds and starts the shared application. Call once per suite.
    pub async fn setup(&self) -> Result<()> {
        let claimed = self.state.lifecycle.send_if_modified(|lifecycle| {
            if matches!(lifecycle, Lifecycle::Idle) {
                *lifecycle = Lifecycle::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(HarnessError::AlreadySetUp);
        }

        logging::init_test_logging(self.overrides.is_silent());

        match self.start_app().await {
            Ok(app) => {
                log::info!("Application at {} started", self.root.display());
                self.state.lifecycle.send_replace(Lifecycle::Running(app));
                Ok(())
            }
            Err(e) => {
                log::error!("Harness setup for {} failed: {}", self.root.display(), e);
                self.state
                    .lifecycle
                    .send_replace(Lifecycle::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn start_app(&self) -> Result<Arc<A>> {
        load_env(&self.root)?;

        let manifest = create_manifest(&self.root)?;
        let manifest = hydrate_manifest(&self.root, manifest)?;
        let options = resolve_options(manifest_to_options(&manifest), &self.overrides);

        let app = A::construct(&self.root, options)
            .await
            .map_err(HarnessError::Construct)?;
        app.start().await.map_err(HarnessError::Start)?;

        Ok(Arc::new(app))
    }

    /// Shuts the shared application down, if one is running. Waits for an
    /// in-flight `setup()` to finish first.
    pub async fn destroy(&self) -> Result<()> {
        self.state
            .lifecycle
            .subscribe()
            .wait_for(Lifecycle::is_settled)
            .await
            .map(drop)
            .map_err(|_| HarnessError::Destroyed)?;

        let mut running = None;
        self.state.lifecycle.send_if_modified(|lifecycle| {
            if let Lifecycle::Running(app) = lifecycle {
                running = Some(Arc::clone(app));
                *lifecycle = Lifecycle::Destroyed;
                true
            } else {
                false
            }
        });

        match running {
            Some(app) => {
                app.destroy().await.map_err(HarnessError::Destroy)?;
                log::info!("Application at {} destroyed", self.root.display());
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Waits for an in-flight setup to settle and returns the running
    /// application. Fails at once if setup was never called.
    async fn running_app(&self) -> Result<Arc<A>> {
        let mut receiver = self.state.lifecycle.subscribe();
        let lifecycle = receiver
            .wait_for(Lifecycle::is_settled)
            .await
            .map_err(|_| HarnessError::Destroyed)?;

        match &*lifecycle {
            Lifecycle::Running(app) => Ok(Arc::clone(app)),
            Lifecycle::Failed(message) => Err(HarnessError::SetupFailed(message.clone())),
            Lifecycle::Destroyed => Err(HarnessError::Destroyed),
            Lifecycle::Idle => Err(HarnessError::NotSetUp),
            Lifecycle::Starting => {
                Err(HarnessError::SetupFailed("application is not running".to_string()))
            }
        }
    }

    /// Runs `test_fn` against a transaction-scoped view of the application,
    /// then rolls the transaction back.
    ///
    /// The test's own value or error is returned unchanged. A failed
    /// rollback is reported as [`HarnessError::RollbackFailed`], together
    /// with the test's error when there was one. A panic in `test_fn` is
    /// rolled back and then resumed.
    pub async fn run<T, E, F, Fut>(&self, test_fn: F) -> std::result::Result<T, TestFailure<E>>
    where
        F: FnOnce(Arc<AppContext<A>>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let span = info_span!("harness.test", root = %self.root.display());
        async move {
            let app = self.running_app().await?;
            let (context, tx) = transaction::open(&app).await?;

            let scoped = Arc::clone(&context);
            let outcome = match AssertUnwindSafe(async move { test_fn(scoped).await })
                .catch_unwind()
                .await
            {
                Ok(result) => Outcome::from(result),
                Err(payload) => Outcome::Panicked(payload),
            };

            let reason = outcome.rollback_reason();
            debug!(%reason, "Rolling back test transaction");
            let rolled_back = tx.rollback(reason).await;
            drop(context);

            match (rolled_back, outcome) {
                (Ok(()), Outcome::Success(value)) => Ok(value),
                (Ok(()), Outcome::Failure(e)) => Err(TestFailure::Test(e)),
                (Ok(()), Outcome::Panicked(payload)) => resume_unwind(payload),
                (Err(err), Outcome::Panicked(payload)) => {
                    error!(
                        "Rollback failed after test panicked ({}): {}",
                        panic_message(payload.as_ref()),
                        err
                    );
                    resume_unwind(payload)
                }
                (Err(err), Outcome::Failure(e)) => {
                    warn!("Rollback failed after test error '{}': {}", e, err);
                    Err(TestFailure::RollbackAfterTest {
                        error: e,
                        rollback: HarnessError::RollbackFailed(err),
                    })
                }
                (Err(err), Outcome::Success(_)) => {
                    Err(TestFailure::Harness(HarnessError::RollbackFailed(err)))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Turns `test_fn` into a test function that runs it through [`run`](Self::run).
    pub fn wrap<T, E, F, Fut>(
        &self,
        test_fn: F,
    ) -> impl FnOnce() -> BoxFuture<'static, std::result::Result<T, TestFailure<E>>>
    where
        F: FnOnce(Arc<AppContext<A>>) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let harness = self.clone();
        move || async move { harness.run(test_fn).await }.boxed()
    }
}

/// Loads `<root>/.env` into the process environment if it exists.
/// Variables that are already set are left alone.
fn load_env(root: &Path) -> Result<()> {
    let path = root.join(".env");
    if !path.is_file() {
        return Ok(());
    }
    dotenvy::from_path(&path).map_err(|e| HarnessError::Env {
        path: path.clone(),
        message: e.to_string(),
    })?;
    log::debug!("Loaded environment from {}", path.display());
    Ok(())
}
