pub mod app;
pub mod context;
pub mod error;
pub mod harness;
pub mod logging;
pub mod manifest;
pub mod options;
pub mod transaction;

#[cfg(test)]
mod testing;

pub use app::{Application, RollbackReason, Transaction};
pub use context::{Action, Actions, AppContext, InjectedAction, Models};
pub use error::{ActionError, BoxError, HarnessError, ManifestError, Result, TestFailure};
pub use harness::TestHarness;
pub use logging::init_test_logging;
pub use manifest::{create_manifest, hydrate_manifest, manifest_to_options, Manifest};
pub use options::{resolve_options, AppOptions, OverrideOptions};
