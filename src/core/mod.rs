pub mod adapters;
pub mod aggregator;
pub mod assessor;
pub mod classifier;
pub mod connection;
pub mod domain;
pub mod errors;
pub mod pipeline;
pub mod runner;
pub mod traits;
