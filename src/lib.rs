//! Library crate for scanwatch: a polling client for a port-scanning
//! monitoring service, plus an in-memory demo backend.
pub mod api;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod demo;
pub mod error;
pub mod feed;
pub mod forms;
pub mod grouping;
pub mod logging;
pub mod reconcile;
pub mod refresher;
pub mod timefmt;
pub mod types;
