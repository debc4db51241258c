use crate::job::StatusUpdate;
use crate::web::api::{find_job, ApiResult};
use crate::web::server::AppState;
use async_stream::stream;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;

fn to_event(update: &StatusUpdate) -> Option<Event> {
    match Event::default().json_data(update) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("Failed to encode status update: {}", e);
            None
        }
    }
}

/// Server-sent status updates: the current state first, then every change
/// until the job is done or failed. Slow clients skip missed updates.
pub async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let job = find_job(&state, id)?;
    // Subscribe before the snapshot so no transition falls in between
    let mut updates = job.subscribe();
    let initial = StatusUpdate::from(&job.snapshot());

    let events = stream! {
        let mut last = initial.clone();
        if let Some(event) = to_event(&initial) {
            yield Ok(event);
        }

        while !last.status.is_terminal() {
            match updates.recv().await {
                Ok(update) => {
                    if let Some(event) = to_event(&update) {
                        yield Ok(event);
                    }
                    last = update;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Job {} event stream skipped {} updates", id, skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use crate::job::OutputMap;
    use crate::web::server::{router, tests::test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::collections::BTreeSet;
    use tempfile::tempdir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_finished_job_streams_one_snapshot() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), 1.0);
        let job = state
            .registry
            .create("clip.mp4".into(), BTreeSet::new())
            .unwrap();
        job.start().unwrap();
        job.complete(OutputMap::new()).unwrap();

        let response = router(state)
            .oneshot(
                Request::get(format!("/api/jobs/{}/events", job.id()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text.matches("data:").count(), 1);
        assert!(text.contains(r#""status":"done""#));
        assert!(text.contains(r#""progress":100"#));
    }

    #[tokio::test]
    async fn test_stream_follows_job_to_completion() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), 1.0);
        let job = state
            .registry
            .create("clip.mp4".into(), BTreeSet::new())
            .unwrap();

        let response = router(state)
            .oneshot(
                Request::get(format!("/api/jobs/{}/events", job.id()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        job.start().unwrap();
        job.fail("no valid outputs").unwrap();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let statuses: Vec<&str> = ["pending", "processing", "failed"]
            .into_iter()
            .filter(|s| text.contains(&format!(r#""status":"{}""#, s)))
            .collect();
        assert_eq!(statuses, vec!["pending", "processing", "failed"]);
        assert!(text.contains(r#""outputs":null"#));
    }
}
