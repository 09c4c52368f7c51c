pub mod generate;
pub mod io;
pub mod run;
pub mod types;
pub mod validate;

pub use generate::{generate_plan, GenerateOptions, GenerateResult};
pub use io::{load_plan, resolve_plan_path, write_plan};
pub use run::{render_prompt, run_plan, ItemRunResult, RunOptions, RunResult};
pub use types::{ExpectedMetricChange, Plan, PlanItem};
pub use validate::{validate_plan, validate_plan_item};
