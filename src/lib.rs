//! Site inspection job queue
//!
//! This library provides the asynchronous job queue behind the inspection
//! platform: a durable job store with leased claims, a worker pool that runs
//! registered handlers, and the photo analysis handler that sends inspection
//! photos to an AI service and records the safety violations it reports.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
