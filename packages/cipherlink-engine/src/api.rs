//! HTTP surface of the engine.
//!
//! | Route | Method | Purpose |
//! |-------|--------|---------|
//! | `/health` | GET | liveness and user id |
//! | `/public_key` | GET | our `(n, e)` as decimal strings |
//! | `/set_peer_public_key` | POST | bind the peer key used by `/encrypt` |
//! | `/encrypt` | POST | encrypt for the bound peer |
//! | `/decrypt` | POST | decrypt ciphertext addressed to us |
//! | `/send` | POST | discover, encrypt and send through the relay |
//! | `/messages` | GET | drain decrypted messages received via the relay |

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cipherlink_core::{EncodedPublicKey, Error};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

const DECRYPTION_FAILED: &str = "decryption failed";
const RELAY_NOT_CONFIGURED: &str = "relay not configured";

#[derive(Debug, Deserialize)]
pub struct SetPeerKeyRequest {
    pub public_key: EncodedPublicKey,
}

#[derive(Debug, Deserialize)]
pub struct EncryptRequest {
    #[serde(default)]
    pub plaintext: String,
}

#[derive(Debug, Deserialize)]
pub struct DecryptRequest {
    #[serde(default)]
    pub ciphertext: String,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub to: String,
    #[serde(default)]
    pub plaintext: String,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/public_key", get(public_key_handler))
        .route("/set_peer_public_key", post(set_peer_public_key_handler))
        .route("/encrypt", post(encrypt_handler))
        .route("/decrypt", post(decrypt_handler))
        .route("/send", post(send_handler))
        .route("/messages", get(messages_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) | Error::InvalidKey(_) | Error::NoPeerKey | Error::Crypto => {
            StatusCode::BAD_REQUEST
        }
        Error::PeerKeyMissing(_) => StatusCode::NOT_FOUND,
        Error::InvalidState { .. } => StatusCode::CONFLICT,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::NotConnected | Error::ConnectionFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Route Handlers ────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "user_id": state.user_id,
    }))
}

async fn public_key_handler(State(state): State<AppState>) -> impl IntoResponse {
    let public_key = state.engine.read().public_key().encode();
    Json(json!({
        "user_id": state.user_id,
        "public_key": public_key,
    }))
}

async fn set_peer_public_key_handler(
    State(state): State<AppState>,
    body: Result<Json<SetPeerKeyRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid key data: {}", rejection.body_text()),
            )
        }
    };

    match request.public_key.decode() {
        Ok(key) => {
            state.engine.write().bind_peer_key(key);
            tracing::info!("Peer public key set");
            Json(json!({ "status": "peer public key set" })).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, format!("invalid key data: {}", e)),
    }
}

async fn encrypt_handler(
    State(state): State<AppState>,
    body: Result<Json<EncryptRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let result = state.engine.read().encrypt(&request.plaintext);
    match result {
        Ok(ciphertext) => Json(json!({ "ciphertext": ciphertext })).into_response(),
        Err(e) => error_response(status_for(&e), e.to_string()),
    }
}

async fn decrypt_handler(
    State(state): State<AppState>,
    body: Result<Json<DecryptRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let result = state.engine.read().decrypt(&request.ciphertext);
    match result {
        Ok(plaintext) => Json(json!({ "plaintext": plaintext })).into_response(),
        Err(_) => error_response(StatusCode::BAD_REQUEST, DECRYPTION_FAILED),
    }
}

async fn send_handler(
    State(state): State<AppState>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Response {
    let Some(relay) = state.relay.as_ref() else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, RELAY_NOT_CONFIGURED);
    };

    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    if request.to.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "recipient must not be empty");
    }

    let mut session = relay.session.lock().await;
    match session.send_text(&request.to, &request.plaintext).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => {
            tracing::warn!(to = %request.to, error = %e, "Send failed");
            error_response(status_for(&e), e.to_string())
        }
    }
}

async fn messages_handler(State(state): State<AppState>) -> Response {
    match state.relay.as_ref() {
        Some(relay) => Json(relay.inbox.drain()).into_response(),
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, RELAY_NOT_CONFIGURED),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{run_inbox, Inbox, RelayLink};
    use axum::body::Body;
    use axum::http::Request;
    use cipherlink_core::network::{RelayClientMessage, RelayServerMessage};
    use cipherlink_core::{
        DeliveryStatus, ExchangeConfig, ExchangeSession, IncomingMessage, KeyPair, RelayClient,
        RsaEngine,
    };
    use once_cell::sync::Lazy;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    static KEY_A: Lazy<KeyPair> = Lazy::new(|| KeyPair::generate(768).unwrap());
    static KEY_B: Lazy<KeyPair> = Lazy::new(|| KeyPair::generate(768).unwrap());

    fn offline_state() -> AppState {
        AppState {
            user_id: "A".into(),
            engine: RsaEngine::new(KEY_A.clone()).into_shared(),
            relay: None,
        }
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(router(offline_state()), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok", "user_id": "A" }));
    }

    #[tokio::test]
    async fn test_public_key_is_decimal() {
        let (status, body) = call(router(offline_state()), "GET", "/public_key", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_id"], "A");
        assert_eq!(body["public_key"]["e"], "65537");
        assert_eq!(body["public_key"]["n"], KEY_A.public_key().n().to_string());
    }

    #[tokio::test]
    async fn test_encrypt_without_peer() {
        let (status, body) = call(
            router(offline_state()),
            "POST",
            "/encrypt",
            Some(json!({ "plaintext": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Peer public key not set");
    }

    #[tokio::test]
    async fn test_invalid_peer_key_rejected() {
        let app = router(offline_state());

        let (status, body) = call(
            app.clone(),
            "POST",
            "/set_peer_public_key",
            Some(json!({ "public_key": { "n": "abc", "e": "65537" } })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("invalid key data"));

        let (status, body) = call(app, "POST", "/set_peer_public_key", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("invalid key data"));
    }

    #[tokio::test]
    async fn test_two_engines_over_http() {
        let alice = router(offline_state());
        let bob = router(AppState {
            user_id: "B".into(),
            engine: RsaEngine::new(KEY_B.clone()).into_shared(),
            relay: None,
        });

        let (_, a_key) = call(alice.clone(), "GET", "/public_key", None).await;
        let (status, body) = call(
            bob.clone(),
            "POST",
            "/set_peer_public_key",
            Some(json!({ "public_key": a_key["public_key"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "peer public key set");

        let (status, body) = call(bob, "POST", "/encrypt", Some(json!({ "plaintext": "hi" }))).await;
        assert_eq!(status, StatusCode::OK);
        let ciphertext = body["ciphertext"].clone();

        let (status, body) = call(
            alice,
            "POST",
            "/decrypt",
            Some(json!({ "ciphertext": ciphertext })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["plaintext"], "hi");
    }

    #[tokio::test]
    async fn test_decrypt_failure_is_generic() {
        let app = router(offline_state());
        for ciphertext in ["", "not base64!", "AAAA"] {
            let (status, body) = call(
                app.clone(),
                "POST",
                "/decrypt",
                Some(json!({ "ciphertext": ciphertext })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], DECRYPTION_FAILED);
        }
    }

    #[tokio::test]
    async fn test_relay_routes_unavailable_without_relay() {
        let app = router(offline_state());
        let (status, _) = call(
            app.clone(),
            "POST",
            "/send",
            Some(json!({ "to": "A", "plaintext": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = call(app, "GET", "/messages", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], RELAY_NOT_CONFIGURED);
    }

    /// Engine for B wired to an in-process fake relay that knows A's key and
    /// acknowledges every send.
    fn relayed_state() -> (AppState, mpsc::UnboundedSender<IncomingMessage>) {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let client = RelayClient::new(out_tx, inbox_tx.clone());
        let engine = RsaEngine::new(KEY_B.clone()).into_shared();

        let relay = client.clone();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                match msg {
                    RelayClientMessage::RequestPublicKey { target_user_id } => {
                        let public_key = (target_user_id == "A").then(|| KEY_A.public_key().encode());
                        relay.dispatch(RelayServerMessage::PublicKey {
                            target_user_id,
                            public_key,
                        });
                    }
                    RelayClientMessage::SendMessage { to, .. } => {
                        relay.dispatch(RelayServerMessage::DeliveryStatus(DeliveryStatus::delivered(to)));
                    }
                    _ => {}
                }
            }
        });

        let mut session = ExchangeSession::new(
            "B",
            engine.clone(),
            client,
            ExchangeConfig {
                peer_key_timeout: Duration::from_secs(1),
                delivery_timeout: Duration::from_secs(1),
            },
        );
        session.register().unwrap();
        session.announce_key().unwrap();

        let inbox = Inbox::new(10);
        tokio::spawn(run_inbox(engine.clone(), inbox_rx, inbox.clone()));

        let state = AppState {
            user_id: "B".into(),
            engine,
            relay: Some(RelayLink {
                session: Arc::new(tokio::sync::Mutex::new(session)),
                inbox,
            }),
        };
        (state, inbox_tx)
    }

    #[tokio::test]
    async fn test_send_through_relay() {
        let (state, _inbox_tx) = relayed_state();
        let app = router(state);

        let (status, body) = call(
            app.clone(),
            "POST",
            "/send",
            Some(json!({ "to": "A", "plaintext": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true, "to": "A" }));

        let (status, body) = call(
            app,
            "POST",
            "/send",
            Some(json!({ "to": "C", "plaintext": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Peer key missing for C");
    }

    #[tokio::test]
    async fn test_received_messages_are_decrypted() {
        let (state, inbox_tx) = relayed_state();
        let app = router(state);

        let ciphertext = cipherlink_core::crypto::encrypt("hello B", KEY_B.public_key()).unwrap();
        inbox_tx
            .send(IncomingMessage {
                from: "A".into(),
                ciphertext,
            })
            .unwrap();
        inbox_tx
            .send(IncomingMessage {
                from: "A".into(),
                ciphertext: "garbage".into(),
            })
            .unwrap();

        let mut body = Value::Null;
        for _ in 0..50 {
            let (status, drained) = call(app.clone(), "GET", "/messages", None).await;
            assert_eq!(status, StatusCode::OK);
            if drained.as_array().is_some_and(|m| !m.is_empty()) {
                body = drained;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(body, json!([{ "from": "A", "plaintext": "hello B" }]));
    }
}
