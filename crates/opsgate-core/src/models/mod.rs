//! Shared data models for requests and adapter outputs

mod output;
mod request;

pub use output::*;
pub use request::*;
