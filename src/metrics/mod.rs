pub mod collect;
pub mod provider_ci;
pub mod provider_git;
pub mod provider_manual;
pub mod score;
pub mod snapshot;
pub mod types;

pub use collect::{collect_all, Provider};
pub use provider_ci::CiProvider;
pub use provider_git::GitProvider;
pub use provider_manual::ManualProvider;
pub use score::{score_key_results, KrScore, KrScoreReport};
pub use snapshot::{
    latest_snapshot_path, load_snapshot, snapshot_path_for_date, write_snapshot, Snapshot,
};
pub use types::{canonicalize_points, Dimension, MetricPoint};
