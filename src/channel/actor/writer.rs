//! Writer task for the automation server's input stream.
//!
//! Single writer: every outbound message passes through one bounded queue so
//! messages reach the server in the order they were accepted.

use std::sync::Arc;

use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::connection::ChannelSignal;
use crate::channel::launcher::BoxedWriter;
use crate::protocol::{Message, write_message};

/// Queue capacity for outbound messages.
///
/// Bounds memory per connection and gives callers fast `QueueFull`
/// backpressure instead of unbounded buffering.
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Spawn a writer task on the current runtime.
pub(crate) fn spawn_writer_task(
    writer: BoxedWriter,
    rx: mpsc::Receiver<Message>,
    signal: Arc<ChannelSignal>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(writer_loop(writer, rx, signal, cancel))
}

async fn writer_loop(
    mut writer: BoxedWriter,
    mut rx: mpsc::Receiver<Message>,
    signal: Arc<ChannelSignal>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(
                    target: "automation_proxy::channel::writer",
                    "Writer task cancelled, shutting down"
                );
                break;
            }

            next = rx.recv() => {
                let Some(message) = next else {
                    debug!(
                        target: "automation_proxy::channel::writer",
                        "Outbound queue closed, writer exiting"
                    );
                    break;
                };
                if let Err(e) = write_message(&mut writer, &message).await {
                    // Pending calls are failed by the channel error
                    signal.channel_error(&format!("write error: {}", e));
                    break;
                }
            }
        }
    }
}
