pub mod browser_session;
pub mod table;

pub use browser_session::{BrowserHandle, BrowserSession, BrowserSessionConfig, LoginSelectors};
pub use table::parse_table_rows;
