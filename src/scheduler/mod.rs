pub mod runner;

pub use runner::{run_scheduler_loop, Scheduler};
