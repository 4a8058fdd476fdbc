pub mod clock;
pub mod config;
pub mod logger;
pub mod oauth;

// Re-export the functions callers reach for most
pub use config::{get_data_dir, get_log_dir, load_app_config};
pub use logger::init_logger;
