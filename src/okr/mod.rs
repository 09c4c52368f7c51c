pub mod load;
pub mod permissions;
pub mod types;
pub mod validate;
pub mod writeback;

pub use load::OkrStore;
pub use permissions::{load_permissions_for_dir, PermissionConfig};
pub use types::{
    Document, KeyResult, KeyResultRecord, Objective, ObjectiveRecord, Scope,
};
pub use validate::{parse_and_validate_document, ValidationError, ValidationErrors};
pub use writeback::{apply_proposal, create_proposal, ProposalMetadata};
