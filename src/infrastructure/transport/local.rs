//! Local socket transport.
//!
//! Stands in for a paired serial port on desktop: the peer handle is a
//! socket path (`/tmp/rover.sock`) or a namespaced name (`rover`).

use crate::domain::models::PeerDescriptor;
use crate::infrastructure::transport::{Link, StreamLink, Transport, TransportError};
use async_trait::async_trait;
use interprocess::local_socket::tokio::Stream as LocalStream;
use interprocess::local_socket::traits::tokio::Stream as _;
use interprocess::local_socket::{GenericFilePath, GenericNamespaced, Name, ToFsName, ToNsName};
use std::io;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct LocalSocketTransport;

/// Paths and `@`-prefixed names go to the filesystem namespace, bare names to
/// the platform's socket namespace.
pub fn socket_name(endpoint: &str) -> io::Result<Name<'_>> {
    if endpoint.starts_with('@') || endpoint.contains('/') || endpoint.contains('\\') {
        endpoint.to_fs_name::<GenericFilePath>()
    } else {
        endpoint.to_ns_name::<GenericNamespaced>()
    }
}

#[async_trait]
impl Transport for LocalSocketTransport {
    async fn open(&self, peer: &PeerDescriptor) -> Result<Arc<dyn Link>, TransportError> {
        let endpoint = peer.handle.endpoint();
        if endpoint.is_empty() {
            return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
        }

        info!("Opening local socket link to {} ({})", peer.address, endpoint);
        let open_err = |source| TransportError::Open {
            endpoint: endpoint.to_string(),
            source,
        };
        let name = socket_name(endpoint).map_err(open_err)?;
        let stream = LocalStream::connect(name).await.map_err(open_err)?;

        Ok(Arc::new(StreamLink::new(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::PeerHandle;

    #[tokio::test]
    async fn test_missing_socket_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.sock");
        let peer = PeerDescriptor::new(
            None,
            "AA:BB",
            PeerHandle::new(path.to_string_lossy().into_owned()),
        );

        assert!(matches!(
            LocalSocketTransport.open(&peer).await,
            Err(TransportError::Open { .. })
        ));
    }
}
