//! Application services: combine, minify, negotiate and serve.

pub mod combine;
pub mod context;
pub mod encoding;
pub mod error;
pub mod fingerprint;
pub mod minify;
pub mod negotiate;
pub mod resolve;
pub mod serve;
pub mod source;
