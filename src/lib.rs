pub mod console;
pub mod constants;
pub mod core;
pub mod native;
pub mod stubs;
