pub mod annotations;
pub mod config;
pub mod engine;
pub mod health;
pub mod informer;
pub mod metrics;
pub mod policy;
pub mod recorder;
