pub mod handlers;
pub mod runner;
pub mod schedule;
pub mod store;
pub mod watch;

pub use handlers::{default_handlers, HandlerContext, HandlerFunc};
pub use runner::{Daemon, DaemonConfig};
pub use schedule::Scheduler;
pub use store::{Job, JobStatus, Store, StoreError};
pub use watch::{WatchEvent, WatchKind};

pub const JOB_KR_MEASURE: &str = "kr_measure";
pub const JOB_PLAN_GENERATE: &str = "plan_generate";
pub const JOB_PLAN_EXECUTE: &str = "plan_execute";
pub const JOB_WATCH_TICK: &str = "watch_tick";
