//! chainmirror-rpc — JSON-RPC plumbing for ChainMirror.
//!
//! - [`RpcTransport`]: object-safe transport trait, with typed calls via
//!   [`RpcTransportExt::request`]
//! - [`HttpTransport`]: `reqwest` client with rate limiting and retries
//! - [`RangeHint`]: provider-specific parsing of "range too large" errors

pub mod error;
pub mod http;
pub mod policy;
pub mod provider;
pub mod request;
pub mod transport;

pub use error::TransportError;
pub use http::{HttpConfig, HttpTransport};
pub use policy::{RateLimitConfig, RateLimiter, RetryConfig};
pub use provider::{alchemy_url, AlchemyRangeHint, NoRangeHint, ProviderProfile, RangeHint};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use transport::{RpcTransport, RpcTransportExt};
