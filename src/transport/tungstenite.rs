//! Production transport over `tokio-tungstenite`.

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use super::{EventSender, ReadyState, Transport, TransportEvent, TransportHandle};
use crate::Result;
use crate::error::NotOpen;

/// Connects WebSocket sockets through `tokio_tungstenite::connect_async`.
///
/// Each [`Transport::connect`] call spawns a driver task owning the socket;
/// the returned handle talks to it over channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

impl Transport for TungsteniteTransport {
    fn connect(&self, url: &str, events: EventSender) -> Result<Box<dyn TransportHandle>> {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ReadyState::Connecting);
        let token = CancellationToken::new();

        tokio::spawn(drive(
            url.to_owned(),
            events,
            outgoing_rx,
            state_tx,
            token.clone(),
        ));

        Ok(Box::new(Handle {
            outgoing: outgoing_tx,
            state: state_rx,
            token,
        }))
    }
}

struct Handle {
    outgoing: mpsc::UnboundedSender<String>,
    state: watch::Receiver<ReadyState>,
    token: CancellationToken,
}

impl TransportHandle for Handle {
    fn send(&self, text: &str) -> Result<()> {
        if *self.state.borrow() != ReadyState::Open {
            return Err(NotOpen.into());
        }
        self.outgoing.send(text.to_owned()).map_err(|_e| NotOpen)?;
        Ok(())
    }

    fn close(&self) {
        self.token.cancel();
    }

    fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Driver task owning the socket for one connection attempt.
async fn drive(
    url: String,
    events: EventSender,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    state: watch::Sender<ReadyState>,
    token: CancellationToken,
) {
    let connected = tokio::select! {
        () = token.cancelled() => {
            _ = state.send(ReadyState::Closed);
            _ = events.send(TransportEvent::Closed { clean: true });
            return;
        }
        connected = connect_async(url.as_str()) => connected,
    };

    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            _ = state.send(ReadyState::Closed);
            _ = events.send(TransportEvent::Error(e.to_string()));
            _ = events.send(TransportEvent::Closed { clean: false });
            return;
        }
    };

    _ = state.send(ReadyState::Open);
    _ = events.send(TransportEvent::Open);

    let (mut write, mut read) = ws_stream.split();
    let mut clean = false;

    loop {
        tokio::select! {
            () = token.cancelled() => {
                _ = state.send(ReadyState::Closing);
                _ = write.send(Message::Close(None)).await;
                clean = true;
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        _ = events.send(TransportEvent::Message(text.to_string()));
                    }
                    Some(Ok(Message::Close(_))) => {
                        clean = true;
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ignore binary and ping/pong frames.
                    }
                    Some(Err(e)) => {
                        _ = events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                    None => break,
                }
            }

            text = outgoing.recv() => {
                match text {
                    Some(text) => {
                        if write.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    _ = state.send(ReadyState::Closed);
    _ = events.send(TransportEvent::Closed { clean });
}
