pub mod accumulator;
pub mod classify;
pub mod error;
pub mod pipeline;

pub use accumulator::AskAccumulator;
pub use classify::{classify, ErrorKind};
pub use error::{AskError, Result};
pub use pipeline::AskPipeline;
