//! File packaging: walking backup roots, path filtering and the compressed
//! package stream.

pub mod filter;
pub mod packager;
