// Library for tests to access modules

pub mod aggregation;
pub mod backfill;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod registry;
pub mod retry;
pub mod routes;
pub mod schedule;
pub mod warehouse;
pub mod window;
