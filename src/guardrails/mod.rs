pub mod result;
pub mod tree;

pub use result::validate_result_file;
pub use tree::{write_violation, ProtectedTreeCheck};
