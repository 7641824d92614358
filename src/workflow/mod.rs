pub mod record_ctx;
pub mod recovery;

pub use record_ctx::RecordCtx;
pub use recovery::{Attempt, RecoveryRunner, RunAborted, DEFAULT_MAX_ATTEMPTS};
