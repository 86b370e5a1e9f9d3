//! Opening a multi-model transaction and classifying test outcomes.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::app::{Application, RollbackReason, Transaction};
use crate::context::{AppContext, Models};
use crate::error::{HarnessError, Result};

/// Opens one transaction over every model of `app` and builds the view bound
/// to it.
pub async fn open<A: Application>(
    app: &Arc<A>,
) -> Result<(Arc<AppContext<A>>, A::Transaction)> {
    let (names, handles): (Vec<String>, Vec<A::Model>) = app
        .models()
        .iter()
        .map(|(name, model)| (name.to_string(), model.clone()))
        .unzip();

    let expected = names.len();
    let (bound, transaction) = app
        .begin_transaction(handles)
        .await
        .map_err(HarnessError::BeginTransaction)?;

    if bound.len() != expected {
        // The transaction is already open; close it before reporting.
        let reason = RollbackReason::Failed("transaction shape mismatch".to_string());
        if let Err(e) = transaction.rollback(reason).await {
            log::warn!("Rollback after malformed transaction failed: {}", e);
        }
        return Err(HarnessError::TransactionShape {
            expected,
            actual: bound.len(),
        });
    }

    let models: Models<A::Model> = names.into_iter().zip(bound).collect();
    log::debug!("Opened transaction over {} model(s)", models.len());

    Ok((AppContext::bind(Arc::clone(app), models), transaction))
}

/// How a test body finished.
pub enum Outcome<T, E> {
    Success(T),
    Failure(E),
    Panicked(Box<dyn Any + Send + 'static>),
}

impl<T, E: fmt::Display> Outcome<T, E> {
    pub fn rollback_reason(&self) -> RollbackReason {
        match self {
            Outcome::Success(_) => RollbackReason::Completed,
            Outcome::Failure(e) => RollbackReason::Failed(e.to_string()),
            Outcome::Panicked(_) => RollbackReason::Panicked,
        }
    }
}

impl<T, E> Outcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

impl<T, E> From<std::result::Result<T, E>> for Outcome<T, E> {
    fn from(result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(e) => Outcome::Failure(e),
        }
    }
}

/// Best-effort message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
