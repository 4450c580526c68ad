//! Native module contains implementations of core traits which talk to the
//! operating system directly: reading runner binaries, spawning runner
//! processes and walking the process table through procfs.
pub mod capabilities;
pub mod environment;
pub mod process_tree;
pub mod runner;
pub mod supervisor;
