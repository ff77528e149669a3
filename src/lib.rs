//! Access control and progress tracking for structured online courses.
//!
//! The [`engine`] decides which lessons a learner may open, records
//! completions from explicit marks, passing quiz attempts and passed
//! homework, and reports aggregate progress. [`routes`] exposes it over
//! HTTP; [`store`] holds the persistence seam.

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod identity;
pub mod models;
pub mod notify;
pub mod ratelimit;
pub mod routes;
pub mod store;
pub mod uploads;
