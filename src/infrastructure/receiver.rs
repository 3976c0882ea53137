//! Device-side command receiver.
//!
//! Accepts one controller connection at a time, reads newline-delimited
//! tokens and forwards the recognised directions. Unknown tokens are skipped.
//! When a controller goes away the receiver waits for the next one.

use crate::domain::models::Direction;
use crate::domain::settings::TransportKind;
use crate::infrastructure::transport::local::socket_name;
use anyhow::Result;
use interprocess::local_socket::tokio::Listener as LocalListener;
use interprocess::local_socket::traits::tokio::Listener as _;
use interprocess::local_socket::ListenerOptions;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

enum Acceptor {
    Tcp(TcpListener),
    Local(LocalListener),
}

pub struct CommandReceiver {
    acceptor: Acceptor,
}

impl CommandReceiver {
    /// Bind the listening endpoint for the given transport kind.
    pub async fn bind(kind: TransportKind, endpoint: &str) -> Result<Self> {
        let acceptor = match kind {
            TransportKind::Tcp => Acceptor::Tcp(TcpListener::bind(endpoint).await?),
            TransportKind::Local => {
                let name = socket_name(endpoint)?;
                Acceptor::Local(ListenerOptions::new().name(name).create_tokio()?)
            }
        };
        info!("Receiver listening on {} ({:?})", endpoint, kind);
        Ok(Self { acceptor })
    }

    /// Bound address, for TCP receivers.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.acceptor {
            Acceptor::Tcp(listener) => listener.local_addr().ok(),
            Acceptor::Local(_) => None,
        }
    }

    /// Serve controllers until `cancel` fires.
    pub async fn run(
        self,
        commands: mpsc::UnboundedSender<Direction>,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = self.accept() => accepted,
            };

            match accepted {
                Ok(AcceptedStream::Tcp(stream, peer)) => {
                    info!("Controller connected from {}", peer);
                    serve_connection(stream, &commands, &cancel).await;
                }
                Ok(AcceptedStream::Local(stream)) => {
                    info!("Controller connected on local socket");
                    serve_connection(stream, &commands, &cancel).await;
                }
                Err(e) => {
                    error!("Accept failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                }
            }
            info!("Waiting for controller...");
        }
        info!("Receiver stopped");
        Ok(())
    }

    async fn accept(&self) -> std::io::Result<AcceptedStream> {
        match &self.acceptor {
            Acceptor::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok(AcceptedStream::Tcp(stream, peer))
            }
            Acceptor::Local(listener) => Ok(AcceptedStream::Local(listener.accept().await?)),
        }
    }
}

enum AcceptedStream {
    Tcp(tokio::net::TcpStream, SocketAddr),
    Local(interprocess::local_socket::tokio::Stream),
}

/// Read tokens from one controller until it disconnects.
async fn serve_connection<S>(
    stream: S,
    commands: &mpsc::UnboundedSender<Direction>,
    cancel: &CancellationToken,
) where
    S: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                if let Some(direction) = decode_line(&line) {
                    let _ = commands.send(direction);
                }
            }
            Ok(None) => {
                info!("Controller disconnected");
                return;
            }
            Err(e) => {
                warn!("Read error: {}", e);
                return;
            }
        }
    }
}

/// Decode one line into a direction. Case and surrounding whitespace are
/// ignored.
pub fn decode_line(line: &str) -> Option<Direction> {
    match line.parse() {
        Ok(direction) => Some(direction),
        Err(_) => {
            if !line.trim().is_empty() {
                debug!("Ignoring token {:?}", line);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line("up"), Some(Direction::Up));
        assert_eq!(decode_line("RIGHT\r"), Some(Direction::Right));
        assert_eq!(decode_line("jump"), None);
        assert_eq!(decode_line(""), None);
    }

    #[tokio::test]
    async fn test_serve_connection_forwards_known_tokens() {
        let (mut controller, device) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        controller.write_all(b"up\nwiggle\nLeft\ndown\n").await.unwrap();
        drop(controller);
        serve_connection(device, &tx, &cancel).await;

        let mut received = Vec::new();
        while let Ok(direction) = rx.try_recv() {
            received.push(direction);
        }
        assert_eq!(received, vec![Direction::Up, Direction::Left, Direction::Down]);
    }

    #[tokio::test]
    async fn test_tcp_receiver_accepts_successive_controllers() {
        let receiver = CommandReceiver::bind(TransportKind::Tcp, "127.0.0.1:0")
            .await
            .unwrap();
        let addr = receiver.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(receiver.run(tx, cancel.clone()));

        for token in [&b"up\n"[..], &b"right\n"[..]] {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            stream.write_all(token).await.unwrap();
            stream.shutdown().await.unwrap();
            drop(stream);
            let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap();
            assert!(got.is_some());
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
