//! # modelconv-core
//!
//! Core crate for modelconv. Contains the configuration schemas, the
//! unified error system, and its rendering as HTTP error responses.
//!
//! This crate has **no** internal dependencies on other modelconv crates.

pub mod config;
pub mod error;
pub mod response;
pub mod result;

pub use error::AppError;
pub use result::AppResult;
