//! Combine, minify and serve text assets with fingerprinted caching,
//! conditional GET and pre-compressed variants.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
