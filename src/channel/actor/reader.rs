//! Reader task for the automation server's output stream.
//!
//! The Reader Task:
//! - Reads framed messages from the transport
//! - Routes replies to the AsyncReplyDispatcher and everything else to the
//!   MessageRouter
//! - Raises the channel error on EOF or read failure, then exits
//! - Exits quietly when cancelled (deliberate release)

use std::sync::Arc;

use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::connection::ChannelSignal;
use crate::channel::dispatcher::AsyncReplyDispatcher;
use crate::channel::launcher::BoxedReader;
use crate::channel::router::MessageRouter;
use crate::protocol::{FrameReader, Message, decode_body};

/// Spawn a reader task on the current runtime.
pub(crate) fn spawn_reader_task(
    reader: BoxedReader,
    signal: Arc<ChannelSignal>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(reader_loop(FrameReader::new(reader), signal, cancel))
}

async fn reader_loop(
    mut reader: FrameReader<BoxedReader>,
    signal: Arc<ChannelSignal>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(
                    target: "automation_proxy::channel::reader",
                    "Reader task cancelled, shutting down"
                );
                break;
            }

            result = reader.read_frame() => {
                match result {
                    // Closed while the frame was being read
                    Ok(_) if signal.is_closed() => break,
                    Ok(body) => match decode_body(&body) {
                        Ok(message) => route_inbound(message, signal.dispatcher(), signal.router()),
                        Err(e) => {
                            // Framing is intact, so the stream stays usable
                            warn!(
                                target: "automation_proxy::channel::reader",
                                "Dropping undecodable message: {}",
                                e
                            );
                        }
                    },
                    Err(e) => {
                        let reason = if e.kind() == std::io::ErrorKind::UnexpectedEof {
                            "automation server closed the channel".to_string()
                        } else {
                            format!("read error: {}", e)
                        };
                        signal.channel_error(&reason);
                        break;
                    }
                }
            }
        }
    }
}

/// Route one inbound message: replies by token, everything else by routing id.
pub(crate) fn route_inbound(
    message: Message,
    dispatcher: &AsyncReplyDispatcher,
    router: &MessageRouter,
) {
    match message.reply_token() {
        Some(token) => {
            if !dispatcher.on_reply(token, message) {
                debug!(
                    target: "automation_proxy::channel::reader",
                    "Reply for unknown token {}, dropping",
                    token
                );
            }
        }
        None => {
            router.dispatch(&message);
        }
    }
}
