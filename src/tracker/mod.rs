pub mod scheduler;
pub mod weekly;

pub use scheduler::{CycleReport, CycleState, Scheduler, SchedulerStatus};
pub use weekly::run_weekly_task;
