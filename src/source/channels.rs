//! Communication channels for the capture loop

use tokio::sync::mpsc;

use super::types::{PipelineEvent, SourceCommand};

/// Pipeline events tagged with the generation of the pipeline that sent them.
pub type EventSender = mpsc::UnboundedSender<(u64, PipelineEvent)>;
pub type EventReceiver = mpsc::UnboundedReceiver<(u64, PipelineEvent)>;

/// Helper function to create capture loop channels.
///
/// Events are unbounded because pipelines emit them from their own threads and
/// must never block on the capture loop.
pub fn create_source_channels() -> (
    mpsc::Sender<SourceCommand>,
    mpsc::Receiver<SourceCommand>,
    EventSender,
    EventReceiver,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (cmd_tx, cmd_rx, event_tx, event_rx)
}
