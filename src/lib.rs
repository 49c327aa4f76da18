//! Timelapse export and retrieval for SDCP printers.
//!
//! The printer renders timelapses on demand: a command over its control
//! WebSocket kicks off the export, a later echo on the same channel says
//! the video is fetchable over plain HTTP. This crate wraps that dance:
//! find (or name) the video, trigger the export, wait out the render,
//! download the result with retries.

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod sdcp;
