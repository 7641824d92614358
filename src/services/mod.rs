pub mod annotation;
pub mod credit_note;
pub mod dialog;
pub mod notification;
pub mod transaction;
pub mod tree_search;

pub use annotation::{DocumentAnnotation, DocumentKey};
pub use credit_note::CreditNoteLookup;
pub use notification::{LockRetry, NotificationClosure};
pub use transaction::{BusinessWarning, DriverError, DriverState, Transaction};
