//! The `RpcTransport` trait and typed calls on top of it.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// Sends JSON-RPC requests to one endpoint.
///
/// Object-safe; streams hold it as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Endpoint identifier used in logs.
    fn url(&self) -> &str;
}

/// Typed request helper available on every transport.
#[async_trait]
pub trait RpcTransportExt: RpcTransport {
    /// Call `method` and deserialize its result.
    async fn request<T: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        let resp = self.send(JsonRpcRequest::new(method, params)).await?;
        let result = resp.into_result().map_err(TransportError::Rpc)?;
        serde_json::from_value(result).map_err(TransportError::Deserialization)
    }
}

impl<T: RpcTransport + ?Sized> RpcTransportExt for T {}
