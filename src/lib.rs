pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod fakes;
pub mod import;
pub mod linkage;
pub mod models;
pub mod period;
pub mod report;
pub mod store;
pub mod telemetry;
pub mod weights;

pub use coordinator::{BatchPhase, BulkMutationCoordinator};
pub use error::{EngineError, EngineResult, ErrorKind, StoreError, StoreResult};
pub use linkage::{ActivityLinkageGuard, LinkageCheck};
pub use period::PeriodResolver;
pub use store::{EvaluationScope, EvaluationStore};
pub use weights::WeightValidator;
