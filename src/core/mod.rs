pub mod args;
pub mod domain;
pub mod pipeline;
pub mod projection;
pub mod results;
pub mod settings;
pub mod temporary;
pub mod traits;
