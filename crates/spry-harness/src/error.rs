use std::path::PathBuf;
use thiserror::Error;

/// Error type returned by application collaborators (construction, start,
/// transactions, actions).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Application root not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Failed to read manifest file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Invalid API version '{version}', expected '{expected}'")]
    InvalidApiVersion { version: String, expected: String },

    #[error("Unknown manifest kind: {0}")]
    UnknownKind(String),

    #[error("Environment variable '{name}' referenced in '{path}' is not set")]
    MissingEnvVar { name: String, path: PathBuf },

    #[error("Invalid options in '{path}': {message}")]
    InvalidOptions { path: PathBuf, message: String },
}

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Failed to load environment file '{path}': {message}")]
    Env { path: PathBuf, message: String },

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Failed to construct application: {0}")]
    Construct(#[source] BoxError),

    #[error("Failed to start application: {0}")]
    Start(#[source] BoxError),

    #[error("Harness setup already ran")]
    AlreadySetUp,

    #[error("Harness setup failed: {0}")]
    SetupFailed(String),

    #[error("Harness setup was not called")]
    NotSetUp,

    #[error("Harness was destroyed")]
    Destroyed,

    #[error("Failed to open transaction: {0}")]
    BeginTransaction(#[source] BoxError),

    #[error("Transaction returned {actual} model(s), expected {expected}")]
    TransactionShape { expected: usize, actual: usize },

    #[error("Rollback failed: {0}")]
    RollbackFailed(#[source] BoxError),

    #[error("Failed to destroy application: {0}")]
    Destroy(#[source] BoxError),
}

impl HarnessError {
    /// Returns true for errors raised while building or starting the
    /// application. These are fatal for the whole suite.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            HarnessError::Env { .. }
                | HarnessError::Manifest(_)
                | HarnessError::Construct(_)
                | HarnessError::Start(_)
                | HarnessError::AlreadySetUp
                | HarnessError::SetupFailed(_)
                | HarnessError::NotSetUp
        )
    }
}

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Unknown action: {0}")]
    NotFound(String),

    #[error("Context for action '{0}' was released")]
    ContextReleased(String),

    #[error("Action '{action}' failed: {source}")]
    Failed {
        action: String,
        #[source]
        source: BoxError,
    },
}

/// Failure of a wrapped test: the test itself returned an error, the
/// harness could not provide or clean up the transaction, or both.
#[derive(Error, Debug)]
pub enum TestFailure<E> {
    #[error("{0}")]
    Test(E),

    #[error("{0}")]
    Harness(HarnessError),

    /// The test returned `error` and the rollback that followed failed.
    #[error("{error} ({rollback})")]
    RollbackAfterTest { error: E, rollback: HarnessError },
}

impl<E> TestFailure<E> {
    /// Returns the error produced by the test body, if that is what failed.
    pub fn into_test_error(self) -> Option<E> {
        match self {
            TestFailure::Test(e) | TestFailure::RollbackAfterTest { error: e, .. } => Some(e),
            TestFailure::Harness(_) => None,
        }
    }

    pub fn as_harness_error(&self) -> Option<&HarnessError> {
        match self {
            TestFailure::Test(_) => None,
            TestFailure::Harness(e) | TestFailure::RollbackAfterTest { rollback: e, .. } => Some(e),
        }
    }
}

impl<E> From<HarnessError> for TestFailure<E> {
    fn from(err: HarnessError) -> Self {
        TestFailure::Harness(err)
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
