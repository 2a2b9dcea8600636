pub mod config;
pub mod errors;
pub mod feature;
pub mod hive_config;
pub mod lifecycle;
pub mod paths;
pub mod plan;
pub mod storage;
pub mod task;
pub mod util;
pub mod worktree;
