pub mod app;
pub mod report;

pub use app::App;
pub use report::{Report, ReportEntry, Reporter};
