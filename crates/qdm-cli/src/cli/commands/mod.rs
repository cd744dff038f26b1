//! CLI command handlers. Each command is in its own file.

mod add;
mod pause;
mod queue;
mod remove;
mod resume;
mod run;
mod status;

pub use add::run_add;
pub use pause::run_pause;
pub use queue::run_queue;
pub use remove::run_remove;
pub use resume::run_resume;
pub use run::run_scheduler;
pub use status::run_status;
