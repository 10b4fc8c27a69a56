//! Change detection for ORIOKS grades and homework threads.
//!
//! Each check fetches a portal page, parses it into a snapshot, compares the
//! snapshot with the stored baseline, notifies the user about what changed
//! and stores the new snapshot as the next baseline.

pub mod check;
pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod fetcher;
pub mod homework;
pub mod logger;
pub mod marks;
pub mod models;
pub mod notifier;
pub mod render;
pub mod runner;
