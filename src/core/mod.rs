pub mod collector;
pub mod completion;
pub mod fetch;
pub mod parse;
pub mod persist;
pub mod processor;
pub mod queue;
pub mod stats;
pub mod tasks;
