//! WebSocket endpoint for real-time subscribers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use crate::commands::ProjectService;
use crate::events::{ClientMessage, EventKind, ServerEvent};
use crate::hub::{self, EventSink, SinkError, SubscriberId};

/// Outbound queue of one socket. The writer task drains it.
struct WsSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl EventSink for WsSink {
    fn send_text(&self, text: &str) -> Result<(), SinkError> {
        self.tx
            .send(Message::text(text))
            .map_err(|_| SinkError("connection closed".into()))
    }

    fn ping(&self) -> Result<(), SinkError> {
        self.tx
            .send(Message::ping(Vec::new()))
            .map_err(|_| SinkError("connection closed".into()))
    }

    fn close(&self) {
        let _ = self.tx.send(Message::close());
    }
}

fn with_service(service: Arc<ProjectService>) -> impl Filter<Extract = (Arc<ProjectService>,), Error = Infallible> + Clone {
    warp::any().map(move || service.clone())
}

/// `GET /ws`, upgraded to a subscriber connection.
pub fn route(
    service: Arc<ProjectService>,
    heartbeat: Duration,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_service(service))
        .map(move |ws: Ws, service: Arc<ProjectService>| {
            ws.on_upgrade(move |socket| handle_connection(socket, service, heartbeat))
        })
}

async fn handle_connection(socket: WebSocket, service: Arc<ProjectService>, heartbeat: Duration) {
    let (mut outgoing, mut incoming) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = message.is_close();
            if let Err(e) = outgoing.send(message).await {
                debug!(error = %e, "websocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = outgoing.close().await;
    });

    let id = service.hub().register(Arc::new(WsSink { tx }));
    info!(subscriber = id, total = service.hub().len(), "subscriber connected");

    let cancel = service.shutdown_token().child_token();
    let pulse = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { hub::heartbeat(service.hub(), id, heartbeat, cancel).await })
    };

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = incoming.next() => next,
        };
        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!(subscriber = id, error = %e, "websocket read failed");
                break;
            }
            None => break,
        };
        if message.is_close() {
            break;
        }
        // Pings, pongs and binary frames carry nothing for us.
        if let Ok(text) = message.to_str() {
            handle_message(&service, id, text);
        }
    }

    cancel.cancel();
    let _ = pulse.await;
    service.hub().unregister(id);
    info!(subscriber = id, total = service.hub().len(), "subscriber disconnected");
}

pub(crate) fn handle_message(service: &ProjectService, id: SubscriberId, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ready) => service.send_state(id, true, "ready"),
        Ok(ClientMessage::RequestState) => service.send_state(id, false, "request_state"),
        Ok(ClientMessage::Edit(edit)) => service.apply_structural_edit(id, &edit),
        Err(e) => {
            debug!(subscriber = id, error = %e, "unrecognized message");
            let event = ServerEvent::new(
                EventKind::Error {
                    message: format!("unrecognized message: {e}"),
                },
                service.state().version(),
                "message",
            );
            let _ = service.hub().send_to(id, &event);
        }
    }
}
