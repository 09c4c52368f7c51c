pub mod fs_atomic;
pub mod hash;
pub mod logging;
pub mod timefmt;
