pub mod ledger;
pub mod loaders;
pub mod record;

pub use ledger::{Ledger, Stage, StepState};
pub use loaders::{load_host_fixture, parse_worksheet, read_worksheet, WorksheetError};
pub use record::Record;
