pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod ledger;
pub mod lock;
pub mod metrics;
pub mod model;
pub mod report;
pub mod repository;
pub mod risk;
pub mod rng;
pub mod scoring;
pub mod store;
pub mod synthetic;
pub mod types;
pub mod view;
pub mod warning;
pub mod withdrawal;
