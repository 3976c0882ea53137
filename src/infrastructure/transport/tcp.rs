use crate::domain::models::PeerDescriptor;
use crate::infrastructure::transport::{Link, StreamLink, Transport, TransportError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::info;

/// Opens peers whose handle is a `host:port` endpoint.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self, peer: &PeerDescriptor) -> Result<Arc<dyn Link>, TransportError> {
        let endpoint = peer.handle.endpoint();
        if endpoint.is_empty() {
            return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
        }

        info!("Opening TCP link to {} ({})", peer.address, endpoint);
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|source| TransportError::Open {
                endpoint: endpoint.to_string(),
                source,
            })?;
        let _ = stream.set_nodelay(true);

        Ok(Arc::new(StreamLink::new(stream)))
    }
}
