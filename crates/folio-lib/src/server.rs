//! HTTP API over the job scheduler.
//!
//! The only entry points the rest of the application uses: enqueue, status,
//! cancel. The UI polls status and fetches the audio file directly once a
//! job reports completed.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use folio_core::types::ChapterAudioJob;

use crate::error::JobError;
use crate::jobs::JobScheduler;

/// Build the axum router with a shared [`JobScheduler`].
pub fn router(scheduler: JobScheduler) -> Router {
    Router::new()
        .route(
            "/books/{book_id}/chapters/{chapter}/audio",
            post(enqueue).get(status).delete(cancel),
        )
        .layer(CorsLayer::permissive())
        .with_state(scheduler)
}

#[derive(Debug, Default, serde::Deserialize)]
struct EnqueueRequest {
    #[serde(default)]
    voice: Option<String>,
}

#[derive(serde::Serialize)]
struct ErrorBody {
    error: String,
}

type JobResponse = Result<Json<ChapterAudioJob>, (StatusCode, Json<ErrorBody>)>;

fn error_response(err: JobError) -> (StatusCode, Json<ErrorBody>) {
    let code = match &err {
        JobError::InvalidChapter(_) => StatusCode::BAD_REQUEST,
        JobError::NarrationMissing(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, Json(ErrorBody { error: err.to_string() }))
}

async fn enqueue(
    State(scheduler): State<JobScheduler>,
    Path((book_id, chapter)): Path<(String, u32)>,
    Json(req): Json<EnqueueRequest>,
) -> JobResponse {
    scheduler
        .enqueue(&book_id, chapter, req.voice)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn status(
    State(scheduler): State<JobScheduler>,
    Path((book_id, chapter)): Path<(String, u32)>,
) -> JobResponse {
    match scheduler.status(&book_id, chapter).await {
        Some(job) => Ok(Json(job)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("no audio job for {book_id} chapter {chapter}"),
            }),
        )),
    }
}

async fn cancel(
    State(scheduler): State<JobScheduler>,
    Path((book_id, chapter)): Path<(String, u32)>,
) -> JobResponse {
    scheduler
        .cancel(&book_id, chapter)
        .await
        .map(Json)
        .map_err(error_response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::AudioWriter;
    use crate::error::{AssembleError, SynthError};
    use crate::synth::Synthesizer;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use folio_core::types::JobStatus;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct StubSynth;

    #[async_trait]
    impl Synthesizer for StubSynth {
        async fn synthesize(&self, _: &str, _: Option<&str>) -> Result<Vec<i16>, SynthError> {
            Ok(vec![1i16; 2400])
        }
    }

    struct StubWriter;

    #[async_trait]
    impl AudioWriter for StubWriter {
        async fn write(&self, book_id: &str, chapter: u32, _: &[i16]) -> Result<String, AssembleError> {
            Ok(self.audio_url(book_id, chapter))
        }
        fn output_exists(&self, _: &str, _: u32) -> bool {
            false
        }
        fn audio_url(&self, book_id: &str, chapter: u32) -> String {
            format!("/audio/{book_id}/chapter-{chapter}.mp3")
        }
    }

    fn test_router(dir: &std::path::Path) -> (Router, JobScheduler) {
        let scheduler =
            JobScheduler::new(dir, Arc::new(StubSynth), Arc::new(StubWriter)).unwrap();
        (router(scheduler.clone()), scheduler)
    }

    fn post_json(uri: &str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn enqueue_rejects_invalid_chapter() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_router(dir.path());

        let response = app
            .oneshot(post_json("/books/moby-dick/chapters/0/audio"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("invalid chapter"));
    }

    #[tokio::test]
    async fn enqueue_rejects_missing_narration() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_router(dir.path());

        let response = app
            .oneshot(post_json("/books/moby-dick/chapters/1/audio"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_of_unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_router(dir.path());

        let response = app
            .oneshot(Request::get("/books/moby-dick/chapters/1/audio").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn enqueue_then_poll_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (app, scheduler) = test_router(dir.path());

        let narration = scheduler.narration_path("moby-dick", 1);
        std::fs::create_dir_all(narration.parent().unwrap()).unwrap();
        std::fs::write(narration, "Call me Ishmael.").unwrap();

        let response = app
            .clone()
            .oneshot(post_json("/books/moby-dick/chapters/1/audio"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "queued");

        for _ in 0..200 {
            let response = app
                .clone()
                .oneshot(
                    Request::get("/books/moby-dick/chapters/1/audio")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            let body = body_json(response).await;
            if body["status"] == "completed" {
                assert_eq!(body["audioUrl"], "/audio/moby-dick/chapter-1.mp3");
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("job never completed");
    }

    #[tokio::test]
    async fn cancel_returns_canceled_record() {
        let dir = tempfile::tempdir().unwrap();
        let (app, scheduler) = test_router(dir.path());

        let response = app
            .oneshot(
                Request::delete("/books/moby-dick/chapters/2/audio")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "canceled");

        let record = scheduler.status("moby-dick", 2).await.unwrap();
        assert_eq!(record.status, JobStatus::Canceled);
    }
}
