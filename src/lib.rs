pub mod bot;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod market;
pub mod resilience;
pub mod risk;
pub mod sandbox;
pub mod signals;
pub mod state;
pub mod types;
