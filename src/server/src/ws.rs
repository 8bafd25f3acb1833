//! A WebSocket endpoint that forwards every pipeline [`Event`] to whatever
//! client is connected, as JSON text frames.

use crate::state::AppState;
use actix::{Actor, ActorContext, AsyncContext, Handler, Message, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use flowline_pipeline::Event;
use tokio::sync::mpsc;

#[derive(Message)]
#[rtype(result = "()")]
struct Envelope(Event);

struct EventSocket {
    receiver: Option<mpsc::UnboundedReceiver<Event>>,
}

impl Actor for EventSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let mut receiver = self.receiver.take().expect("receiver only taken once");
        let addr = ctx.address();
        actix::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if addr.send(Envelope(event)).await.is_err() {
                    break;
                }
            }
        });
    }
}

impl Handler<Envelope> for EventSocket {
    type Result = ();

    fn handle(&mut self, msg: Envelope, ctx: &mut Self::Context) {
        match serde_json::to_string(&msg.0) {
            Ok(text) => ctx.text(text),
            Err(err) => tracing::error!(error = %err, "failed to serialize event for websocket"),
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for EventSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// Upgrade `/events` to a WebSocket connection and subscribe it to every
/// lifecycle event the pipeline publishes from here on.
pub(crate) async fn events(
    req: HttpRequest,
    stream: web::Payload,
    pipeline: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (tx, rx) = mpsc::unbounded_channel();
    pipeline.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });

    ws::start(EventSocket { receiver: Some(rx) }, &req, stream)
}
