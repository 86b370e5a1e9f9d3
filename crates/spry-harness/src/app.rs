//! Traits the wrapped application framework implements.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use crate::context::{Actions, Models};
use crate::error::BoxError;
use crate::options::AppOptions;

/// A running application the harness can drive.
///
/// The harness owns one instance per suite and only ever borrows it; model
/// storage, migrations and injection stay with the implementor.
#[async_trait]
pub trait Application: Send + Sync + Sized + 'static {
    /// Handle to one model class. Cheap to clone.
    type Model: Clone + Send + Sync + 'static;

    /// Handle to an open transaction returned by [`Application::begin_transaction`].
    type Transaction: Transaction;

    /// Builds an application scoped to `root`.
    async fn construct(root: &Path, options: AppOptions) -> Result<Self, BoxError>;

    fn models(&self) -> &Models<Self::Model>;

    fn actions(&self) -> &Actions<Self>;

    async fn start(&self) -> Result<(), BoxError>;

    /// Opens one transaction spanning all of `models`.
    ///
    /// Must return the transaction-bound variant of every model, in the
    /// order given.
    async fn begin_transaction(
        &self,
        models: Vec<Self::Model>,
    ) -> Result<(Vec<Self::Model>, Self::Transaction), BoxError>;

    async fn destroy(&self) -> Result<(), BoxError>;
}

/// An open transaction. Consumed by rollback.
#[async_trait]
pub trait Transaction: Send + 'static {
    async fn rollback(self, reason: RollbackReason) -> Result<(), BoxError>;
}

/// Why a test transaction is being rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackReason {
    /// The test body returned successfully.
    Completed,
    /// The test body returned an error; carries its message.
    Failed(String),
    /// The test body panicked.
    Panicked,
}

impl fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackReason::Completed => write!(f, "test completed"),
            RollbackReason::Failed(message) => write!(f, "test failed: {}", message),
            RollbackReason::Panicked => write!(f, "test panicked"),
        }
    }
}
