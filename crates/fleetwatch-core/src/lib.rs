pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod poller;
pub mod scrape;
pub mod session;
pub mod status;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod traits;

pub use cache::DataCache;
pub use clock::{Clock, SystemClock};
pub use config::{DatasetSettings, Settings};
pub use error::AppError;
pub use models::{DatasetKind, DatasetSchema, Record, Row, SessionState, Snapshot, compute_hash};
pub use orchestrator::{CycleReport, Orchestrator};
pub use policy::{AttemptState, AttemptTracker, RetryPolicy};
pub use poller::{Poller, PollerEvent, PollerHandle, PollerReporter, TracingPollerReporter};
pub use scrape::{RefreshOutcome, ScrapeCoordinator};
pub use session::SessionManager;
pub use status::{Status, StatusStore};
pub use traits::{Credentials, RemoteSession};
