//! Small helpers shared by the binary and the service layers.

pub mod bytes;
