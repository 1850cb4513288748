pub mod annotate;
pub mod common;
pub mod completions;
pub mod queue;
pub mod run;
pub mod status;
