// Service lifecycle commands
pub mod proxy;

pub use proxy::{
    get_proxy_stats, get_proxy_status, start_proxy_service, stop_proxy_service, ProxyServiceState,
    ProxyStatus, ServiceOptions,
};
