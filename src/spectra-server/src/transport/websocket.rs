//! `/ws` endpoint: upgrades to a WebSocket carrying the binary Spectrum
//! stream, the JSON command/status surface and text status/events on one
//! connection. A `tokio::select!` loop races a `watch` live stream, a
//! per-client item queue, and the inbound message stream.

use std::sync::Arc;

use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_ws::Message;
use tracing::warn;

use spectra_protocol::{encode_server_frame, parse_client_command, ServerFrame};

use crate::coordinator::Coordinator;
use crate::fanout::{BroadcastFanout, OutboundItem};

#[get("/ws")]
pub async fn ws_endpoint(
    req: HttpRequest,
    body: web::Payload,
    coordinator: web::Data<Arc<Coordinator>>,
    fanout: web::Data<Arc<BroadcastFanout>>,
) -> Result<HttpResponse, Error> {
    let registration = fanout.register();
    let client_id = registration.id;
    let mut live_rx = registration.live_rx;
    let mut item_rx = registration.item_rx;

    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, body)?;

    let coordinator = coordinator.get_ref().clone();
    let fanout = fanout.get_ref().clone();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                changed = live_rx.changed() => {
                    match changed {
                        Ok(()) => {
                            let Some(bytes) = live_rx.borrow().clone() else { continue };
                            if session.binary(bytes).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                item = item_rx.recv() => {
                    match item {
                        Some(OutboundItem::SweepSegment(bytes) | OutboundItem::SweepPanorama(bytes)) => {
                            if session.binary(bytes).await.is_err() {
                                break;
                            }
                        }
                        Some(OutboundItem::Text(text)) => {
                            if session.text(text).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                msg = msg_stream.recv() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let response_frame = match parse_client_command(&text) {
                                Ok(command) => coordinator.handle_command(command).await,
                                Err(err) => ServerFrame::Error {
                                    message: format!("bad command: {err}"),
                                },
                            };
                            if session.text(encode_server_frame(&response_frame)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(error = %err, "websocket read error");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
        fanout.unregister(client_id);
        let _ = session.close(None).await;
    });

    Ok(response)
}
