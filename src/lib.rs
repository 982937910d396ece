pub mod config;
pub mod error;
pub mod models;
pub mod provider;
pub mod proxy;
pub mod server;
pub mod session;
pub mod translate;

pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use provider::ProviderClient;
pub use server::{build_router, AppState};
pub use session::SessionTracker;
