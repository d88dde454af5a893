//! Responder HTTP transport.
//!
//! Exposes endpoints for:
//! - Delivering one envelope (handshake or sealed request) and getting the reply
//! - Getting the trusted public value
//! - Checking how many channels are open
//!
//! The envelope body is handed to the channel context untouched; this layer
//! has no cryptographic behaviour of its own.

use crate::bus;
use crate::context::{ChannelContext, Outcome};
use crate::error::SealError;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

pub const ENVELOPE_CONTENT_TYPE: &str = "application/octet-stream";

/// Shared state for responder endpoints.
pub struct ResponderState {
    pub context: Arc<ChannelContext>,
    /// Silent mode used when a request does not choose one
    pub silent: bool,
}

impl ResponderState {
    pub fn new(context: Arc<ChannelContext>, silent: bool) -> Self {
        Self { context, silent }
    }
}

/// Query string of `POST /channel`.
#[derive(Debug, Default, Deserialize)]
pub struct ChannelQuery {
    #[serde(default)]
    pub silent: Option<bool>,
}

/// Response for public key endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublicKeyResponse {
    /// Encoded trusted public value (base64)
    pub public_value: String,
    pub fingerprint: String,
    pub bits: u64,
}

/// Response for status endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub channels: usize,
    pub silent: bool,
}

/// Handler: POST /channel
///
/// Runs the channel context on the request body and returns what it wrote.
async fn post_channel(
    State(state): State<Arc<ResponderState>>,
    Query(query): Query<ChannelQuery>,
    body: Bytes,
) -> Result<Response, SealError> {
    let silent = query.silent.unwrap_or(state.silent);
    let context = state.context.clone();

    let (outcome, reply) = tokio::task::spawn_blocking(move || {
        let mut reply = Vec::new();
        let outcome = context.on_request(&mut Cursor::new(body), &mut reply, silent)?;
        Ok::<_, SealError>((outcome, reply))
    })
    .await
    .map_err(|e| SealError::Transport(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    .map_err(|e| {
        warn!("Channel request rejected: {}", e);
        e
    })?;

    match outcome {
        Outcome::Established(channel) => info!("Handshake served for {}", channel.id()),
        Outcome::Dispatched(response) => debug!(
            "{} handled {} request: {}",
            response.handler_type, response.request.type_tag, response.result
        ),
    }

    Ok(([(header::CONTENT_TYPE, ENVELOPE_CONTENT_TYPE)], reply).into_response())
}

/// Handler: GET /pubkey
///
/// Returns the trusted public value initiators should pin.
async fn get_public_key(State(state): State<Arc<ResponderState>>) -> Json<PublicKeyResponse> {
    let trust = state.context.trust();
    let encoded = trust.encoded_public_value();
    Json(PublicKeyResponse {
        public_value: BASE64.encode(encoded),
        fingerprint: bus::fingerprint(encoded),
        bits: trust.trusted_public_value().params().bits(),
    })
}

/// Handler: GET /status
async fn get_status(State(state): State<Arc<ResponderState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        channels: state.context.channel_count(),
        silent: state.silent,
    })
}

/// Create the responder router.
pub fn responder_router(state: Arc<ResponderState>) -> Router {
    Router::new()
        .route("/channel", post(post_channel))
        .route("/pubkey", get(get_public_key))
        .route("/status", get(get_status))
        .with_state(state)
        .layer(DefaultBodyLimit::max(bus::MAX_FRAME_LEN as usize))
        .layer(TraceLayer::new_for_http())
}
