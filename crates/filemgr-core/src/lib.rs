//! # filemgr-core
//!
//! Core crate for the FileMgr background task service. Contains the
//! configuration schemas and the unified error system shared by the
//! scheduler crate and the `filemgr-taskd` binary.
//!
//! This crate has **no** internal dependencies on other FileMgr crates.

pub mod config;
pub mod error;
pub mod result;

pub use error::AppError;
pub use result::AppResult;
