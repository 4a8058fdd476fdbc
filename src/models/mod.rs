pub mod config;
pub mod credential;
pub mod exchange;
pub mod status;

pub use config::{AppConfig, OAuthConfig, UpstreamConfig, WireApi};
pub use credential::Credential;
pub use exchange::{ExchangeRecord, FinishReason, Outcome, RequestSummary, Usage};
pub use status::{AggregateStatus, ConfigSummary, StateSnapshot};
