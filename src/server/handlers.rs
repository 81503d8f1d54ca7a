//! Gateway endpoint handlers.

use std::collections::BTreeMap;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::AppState;
use crate::models::{Card, CardField, FieldStatus};
use crate::repository::DieselError;
use crate::services::IngestError;

fn error_response(status: StatusCode, detail: &str) -> Response {
    (status, Json(serde_json::json!({ "detail": detail }))).into_response()
}

/// Card as returned by `GET /{id}`.
#[derive(Debug, Serialize)]
pub struct CardResponse {
    pub id: String,
    pub filename: String,
    pub source_image_path: String,
    pub created_at: String,
    pub name: Option<String>,
    pub lore: Option<String>,
    pub moves_image_path: Option<String>,
    pub weakness_image_path: Option<String>,
    pub resistance_image_path: Option<String>,
    /// Status of each field, keyed by field label.
    pub status: BTreeMap<&'static str, FieldStatus>,
}

impl From<&Card> for CardResponse {
    fn from(card: &Card) -> Self {
        let value = |field: CardField| card.value(field).map(str::to_string);
        Self {
            id: card.id.clone(),
            filename: card.filename.clone(),
            source_image_path: card.source_image_path.display().to_string(),
            created_at: card.created_at.to_rfc3339(),
            name: value(CardField::Name),
            lore: value(CardField::Lore),
            moves_image_path: value(CardField::Moves),
            weakness_image_path: value(CardField::Weakness),
            resistance_image_path: value(CardField::Resistance),
            status: CardField::ALL
                .iter()
                .map(|field| (field.label(), card.status(*field)))
                .collect(),
        }
    }
}

/// `POST /` with a multipart `file` part.
pub async fn upload_card(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut upload = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("file") {
                    continue;
                }
                let filename = field.file_name().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => upload = Some((filename, bytes)),
                    Err(e) => {
                        return error_response(StatusCode::BAD_REQUEST, &e.body_text());
                    }
                }
                break;
            }
            Ok(None) => break,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.body_text()),
        }
    }

    let Some((filename, bytes)) = upload else {
        return error_response(StatusCode::BAD_REQUEST, "No file provided");
    };

    match state.ingest.ingest_bytes(&filename, &bytes).await {
        Ok(card) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": card.id,
                "filename": card.filename,
                "message": "File uploaded and card created.",
            })),
        )
            .into_response(),
        Err(IngestError::MissingFile) => {
            error_response(StatusCode::BAD_REQUEST, "No file provided")
        }
        Err(e @ (IngestError::Save { .. } | IngestError::NotFound(_))) => {
            tracing::error!("Upload of {} failed: {}", filename, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "File save failed")
        }
        Err(e @ IngestError::Database(_)) => {
            tracing::error!("Upload of {} failed: {}", filename, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database insert failed")
        }
    }
}

/// `GET /{id}`.
pub async fn get_card(State(state): State<AppState>, Path(card_id): Path<String>) -> Response {
    if uuid::Uuid::parse_str(&card_id).is_err() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid ID format");
    }

    match state.cards.get(&card_id).await {
        Ok(Some(card)) => Json(CardResponse::from(&card)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Record not found"),
        Err(e) => {
            tracing::error!("Failed to load card {}: {}", card_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database read failed")
        }
    }
}

/// `GET /api/status`: card count and per-field status counts.
pub async fn api_status(State(state): State<AppState>) -> Response {
    let counts = async {
        let cards = state.cards.count().await?;
        let counts = state.cards.status_counts().await?;
        Ok::<_, DieselError>((cards, counts))
    };
    let (cards, counts) = match counts.await {
        Ok(counts) => counts,
        Err(e) => {
            tracing::error!("Failed to load status counts: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database read failed");
        }
    };

    let mut fields: BTreeMap<&'static str, BTreeMap<&'static str, u64>> = CardField::ALL
        .iter()
        .map(|field| {
            let empty = [
                FieldStatus::Pending,
                FieldStatus::InProgress,
                FieldStatus::Done,
                FieldStatus::Failed,
            ]
            .iter()
            .map(|status| (status.as_str(), 0))
            .collect();
            (field.label(), empty)
        })
        .collect();
    for count in counts {
        if let Some(by_status) = fields.get_mut(count.field.label()) {
            by_status.insert(count.status.as_str(), count.count);
        }
    }

    Json(serde_json::json!({
        "cards": cards,
        "fields": fields,
    }))
    .into_response()
}
