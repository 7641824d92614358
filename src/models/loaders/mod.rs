pub mod toml_loader;
pub mod worksheet;

pub use toml_loader::load_host_fixture;
pub use worksheet::{parse_worksheet, read_worksheet, WorksheetError};
