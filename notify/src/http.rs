use crate::event::{Event, FieldChange};
use crate::gateway::EventGateway;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use log::error;
use serde::Deserialize;
use std::sync::Arc;

/// Routes for the local-only inbound event-gateway surface: short-lived
/// requests from internal callers (the CRUD layer, the ingestion
/// orchestrator when run out-of-process) that hand an event to `emit`.
/// This is not part of the public API.
pub fn routes(gateway: Arc<EventGateway>) -> Router {
    Router::new()
        .route("/notify/new-manga", post(new_manga))
        .route("/notify/new-chapter", post(new_chapter))
        .route("/notify/manga-update", post(manga_update))
        .with_state(gateway)
}

#[derive(Debug, Deserialize)]
struct NewMangaRequest {
    manga_id: i32,
    title: String,
}

async fn new_manga(
    State(gateway): State<Arc<EventGateway>>,
    Json(body): Json<NewMangaRequest>,
) -> StatusCode {
    emit_and_respond(
        gateway,
        Event::NewManga {
            catalog_id: body.manga_id,
            title: body.title,
        },
    )
    .await
}

#[derive(Debug, Deserialize)]
struct NewChapterRequest {
    manga_id: i32,
    title: String,
    chapter: String,
    old_chapter: Option<String>,
}

async fn new_chapter(
    State(gateway): State<Arc<EventGateway>>,
    Json(body): Json<NewChapterRequest>,
) -> StatusCode {
    emit_and_respond(
        gateway,
        Event::NewChapter {
            catalog_id: body.manga_id,
            title: body.title,
            chapter_number: body.chapter,
            previous_chapter: body.old_chapter,
        },
    )
    .await
}

#[derive(Debug, Deserialize)]
struct MangaUpdateRequest {
    manga_id: i32,
    title: String,
    changes: Vec<String>,
    #[serde(default)]
    detailed_changes: Vec<FieldChange>,
}

async fn manga_update(
    State(gateway): State<Arc<EventGateway>>,
    Json(body): Json<MangaUpdateRequest>,
) -> StatusCode {
    let changes = if body.detailed_changes.is_empty() {
        body.changes
            .into_iter()
            .map(|field| FieldChange {
                field,
                old: serde_json::Value::Null,
                new: serde_json::Value::Null,
            })
            .collect()
    } else {
        body.detailed_changes
    };

    emit_and_respond(
        gateway,
        Event::MangaUpdate {
            catalog_id: body.manga_id,
            title: body.title,
            changes,
        },
    )
    .await
}

async fn emit_and_respond(gateway: Arc<EventGateway>, event: Event) -> StatusCode {
    match gateway.emit(event).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(err) => {
            error!("event gateway failed to process an inbound event: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
