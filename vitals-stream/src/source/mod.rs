pub mod mock;
pub mod tcp;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vitals_core::RawMessage;

/// A subscription to a stream of raw messages.
///
/// Implementations spawn background tasks that pull from the transport and
/// send into a bounded mpsc channel, awaiting capacity before pulling the
/// next message. The receiver is returned from `start`.
#[async_trait]
pub trait MessageSource: Send + Sync + 'static {
    /// Error type for this source implementation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Start pulling messages.
    ///
    /// The background tasks run until the cancellation token is cancelled or
    /// the receiver is dropped.
    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RawMessage>, Self::Error>;
}
