//! Per-stream tasks and the frame writer.

pub(crate) mod read;
pub(crate) mod write;
