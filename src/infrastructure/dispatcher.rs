//! Command Dispatcher
//!
//! Writes directional commands to the link in the order they were issued.
//! One writer task per session; the first failed write ends it and any
//! commands queued behind the failure are dropped.

use crate::domain::models::Direction;
use crate::infrastructure::transport::{Link, TransportError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct SendFailure {
    pub session: u64,
    pub direction: Direction,
    pub error: TransportError,
}

pub struct Dispatcher {
    queue: mpsc::UnboundedSender<Direction>,
    task: JoinHandle<()>,
}

impl Dispatcher {
    pub fn spawn<T>(
        session: u64,
        link: Arc<dyn Link>,
        cancel: CancellationToken,
        reports: mpsc::UnboundedSender<T>,
    ) -> Self
    where
        T: From<SendFailure> + Send + 'static,
    {
        let (queue, mut commands) = mpsc::unbounded_channel::<Direction>();

        let task = tokio::spawn(async move {
            loop {
                let direction = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = commands.recv() => match next {
                        Some(direction) => direction,
                        None => break,
                    },
                };

                let bytes = direction.encode();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = link.write_all(&bytes) => match result {
                        Ok(()) => debug!("Sent {:?} on session {}", direction.as_str(), session),
                        Err(error) => {
                            warn!("Write of {:?} failed on session {}: {}", direction.as_str(), session, error);
                            let _ = reports.send(
                                SendFailure {
                                    session,
                                    direction,
                                    error,
                                }
                                .into(),
                            );
                            break;
                        }
                    },
                }
            }
            debug!("Dispatcher for session {} stopped", session);
        });

        Self { queue, task }
    }

    /// Queue a command. Returns false if the writer has already stopped.
    pub fn send(&self, direction: Direction) -> bool {
        self.queue.send(direction).is_ok()
    }

    /// Wait for the writer to finish. The caller cancels it first.
    pub async fn join(self) {
        drop(self.queue);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::StreamLink;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_commands_are_written_in_order() {
        let (local, mut remote) = tokio::io::duplex(64);
        let link: Arc<dyn Link> = Arc::new(StreamLink::new(local));
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<SendFailure>();

        let dispatcher = Dispatcher::spawn(1, link, cancel, tx);
        assert!(dispatcher.send(Direction::Up));
        assert!(dispatcher.send(Direction::Left));
        dispatcher.join().await;

        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"up\nleft\n");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_write_reports_once_and_stops() {
        let (local, _remote) = tokio::io::duplex(64);
        let link: Arc<dyn Link> = Arc::new(StreamLink::new(local));
        link.close().await;
        let (tx, mut rx) = mpsc::unbounded_channel::<SendFailure>();

        let dispatcher = Dispatcher::spawn(3, link, CancellationToken::new(), tx);
        dispatcher.send(Direction::Right);
        dispatcher.send(Direction::Down);
        dispatcher.join().await;

        let failure = rx.recv().await.unwrap();
        assert_eq!(failure.session, 3);
        assert_eq!(failure.direction, Direction::Right);
        assert!(rx.try_recv().is_err());
    }
}
