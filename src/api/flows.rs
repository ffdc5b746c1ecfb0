// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Flow data-exchange endpoint.
//!
//! Every request is checked against the app secret (when configured),
//! decrypted, routed to the Flow named in the path and answered with the
//! encrypted response as a plain base64 body.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};

use crate::error::ApiError;
use crate::flows::{
    decrypt_envelope, encrypt_response, error_acknowledgement, health_check_response,
    CipherError, EncryptedEnvelope, FlowAction, FlowError, FlowRequest,
};
use crate::providers::whatsapp::verify_signature;
use crate::state::{AppState, FlowKind};

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Exchange one encrypted Flow request.
#[utoipa::path(
    post,
    path = "/flows/{flow}",
    tag = "Flows",
    params(
        ("flow" = FlowKind, Path, description = "onramp, offramp, transfer or beneficiary")
    ),
    request_body = EncryptedEnvelope,
    responses(
        (status = 200, description = "Encrypted response (base64)", body = String, content_type = "text/plain"),
        (status = 400, description = "Malformed envelope or request"),
        (status = 421, description = "Payload could not be decrypted"),
        (status = 432, description = "Signature mismatch"),
        (status = 500, description = "Request could not be handled")
    )
)]
pub async fn flow_exchange(
    State(state): State<AppState>,
    Path(kind): Path<FlowKind>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if let Some(secret) = state.app_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret, &body, signature) {
            warn!(flow = ?kind, "Rejected Flow request with a bad signature");
            return Err(ApiError::signature_mismatch("Request signature mismatch"));
        }
    }

    let envelope: EncryptedEnvelope = serde_json::from_slice(&body).map_err(|e| {
        warn!(flow = ?kind, error = %e, "Flow request is not a valid envelope");
        ApiError::bad_request("Invalid Flow envelope")
    })?;

    let decrypted = decrypt_envelope(&envelope, &state.flow_key).map_err(|e| {
        warn!(flow = ?kind, error = %e, "Failed to decrypt Flow request");
        cipher_error_to_api(&e)
    })?;

    let request: FlowRequest = serde_json::from_value(decrypted.body).map_err(|e| {
        warn!(flow = ?kind, error = %e, "Decrypted Flow request has an unexpected shape");
        ApiError::bad_request("Invalid Flow request")
    })?;

    let (aes_key, initial_vector) = (&decrypted.aes_key, &decrypted.initial_vector);
    let sealed = if request.action == FlowAction::Ping {
        debug!(flow = ?kind, "Flow health check");
        encrypt_response(&health_check_response(), aes_key, initial_vector)
    } else if request.is_error_notification() {
        warn!(
            flow = ?kind,
            screen = ?request.screen,
            error = %request.data["error"],
            error_message = %request.data.get("error_message").unwrap_or(&serde_json::Value::Null),
            "Flow client reported an error"
        );
        encrypt_response(&error_acknowledgement(), aes_key, initial_vector)
    } else {
        let action = request.action.as_str();
        let screen = request.screen.clone();
        let response = state.handler(kind).handle(request).await.map_err(|e| {
            log_flow_error(kind, action, screen.as_deref(), &e);
            ApiError::internal("Unable to process the request")
        })?;
        debug!(flow = ?kind, action, next_screen = %response.screen, "Flow exchange handled");
        encrypt_response(&response, aes_key, initial_vector)
    };
    let encrypted = sealed.map_err(|e| {
        error!(flow = ?kind, error = %e, "Failed to encrypt Flow response");
        ApiError::internal("Unable to process the request")
    })?;

    Ok(([(CONTENT_TYPE, "text/plain")], encrypted).into_response())
}

fn cipher_error_to_api(err: &CipherError) -> ApiError {
    match err {
        CipherError::InvalidEnvelope(_) | CipherError::MalformedPayload => {
            ApiError::bad_request("Invalid Flow envelope")
        }
        CipherError::Decryption(_) | CipherError::InvalidKey(_) | CipherError::Encryption(_) => {
            ApiError::undecryptable("Unable to decrypt the request")
        }
    }
}

fn log_flow_error(kind: FlowKind, action: &str, screen: Option<&str>, err: &FlowError) {
    match err {
        FlowError::InvalidData { .. } => {
            warn!(flow = ?kind, action, screen, error = %err, "Flow request data rejected")
        }
        _ => error!(flow = ?kind, action, screen, error = %err, "Unhandled Flow request"),
    }
}
