// proxy module - credential-injecting forwarding proxy

pub mod config;
pub mod exchange_log;
pub mod server;
pub mod stats;
pub mod token_manager;
pub mod token_store;

pub mod handlers; // API endpoint handlers
pub mod mappers; // Wire-format parsing and outcome classification
pub mod middleware; // Axum middleware
pub mod upstream; // Upstream client

pub use config::ProxyConfig;
pub use exchange_log::ExchangeLog;
pub use server::{AppState, AxumServer};
pub use stats::StatusAggregator;
pub use token_manager::CredentialManager;
pub use token_store::TokenStore;
