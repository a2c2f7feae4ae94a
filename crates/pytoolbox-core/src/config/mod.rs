//! Unified configuration layer.
//!
//! All environment variable reads live here; components receive structured
//! config instead of calling `std::env::var`.
//!
//! - `loader`: env_or, env_optional, env_bool, env_u64, `.env` loading
//! - `schema`: ToolboxConfig, ObservabilityConfig, default bounds
//! - `env_keys`: key constants

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or, env_u64, load_dotenv, load_dotenv_from_dir};
pub use schema::{
    ObservabilityConfig, ToolboxConfig, DEFAULT_INSTALL_TIMEOUT_SECS, DEFAULT_QUERY_TIMEOUT_SECS,
    DEFAULT_TIMEOUT_SECS, DEFAULT_VENV_DIR, DEFAULT_VENV_TIMEOUT_SECS,
};
