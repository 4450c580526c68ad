pub mod batching;
pub mod executing;
pub mod reconciling;
