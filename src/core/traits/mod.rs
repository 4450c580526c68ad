pub mod host;
pub mod process_tree;
pub mod runner;
