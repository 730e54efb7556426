//! Lecture media acquisition: resolves HLS and DASH manifests of a crawled course,
//! downloads the chosen rendition and decrypts protected lectures with known keys.

pub mod acquire;
pub mod batch;
pub mod browser;
mod commands;
pub mod config;
pub mod cookie;
pub mod course;
pub mod drm;
pub mod failure;
pub mod http;
pub mod keystore;
mod logger;
pub mod manifest;
pub mod pipeline;
pub mod rendition;
pub mod selector;
pub mod tool;
pub mod transcode;
pub mod utils;

#[doc(hidden)]
pub use commands::Args;
pub use reqwest;
