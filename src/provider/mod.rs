//! The upstream Sider chat API: wire types, event aggregation and the HTTP client.

pub mod aggregate;
pub mod client;
pub mod types;

pub use aggregate::{Aggregator, Applied};
pub use client::{ExchangeUpdate, ProviderClient, UpdateStream};
pub use types::{AggregatedResponse, ProviderEvent, ProviderRequest};
