//! Request handlers.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::server::AppState;

/// Liveness probe.
pub async fn health() -> &'static str {
    "ok"
}

/// Serves one HLS fragment from the hot tier.
///
/// Playlist requests count as stream access and bump the record's
/// last-accessed time, which is what the LRU eviction sorts on.
pub async fn serve_fragment(
    State(state): State<AppState>,
    Path((sd_hash, name)): Path<(String, String)>,
) -> Response {
    if name.contains('/') || name.contains("..") {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let video = match state.library.get(&sd_hash).await {
        Ok(video) if video.is_local() => video,
        Ok(_) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    let path = state.library.local().path(&video.sd_hash).join(&name);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(%sd_hash, %name, %e, "fragment not on disk");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    if name.ends_with(".m3u8") {
        if let Err(e) = state.library.update_access(&sd_hash).await {
            warn!(%sd_hash, %e, "could not bump access time");
        }
    }

    ([(header::CONTENT_TYPE, content_type(&name))], bytes).into_response()
}

/// Query parameters for the video status endpoint.
#[derive(Debug, Deserialize)]
pub struct VideoQuery {
    /// Canonical stream identifier the client expects.
    pub sd_hash: String,
}

/// Reports a stream's availability, registering demand on a miss.
pub async fn video_status(
    State(state): State<AppState>,
    Path(uri): Path<String>,
    Query(query): Query<VideoQuery>,
) -> Response {
    if !state.channels.allows(&uri) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "status": "forbidden" })),
        )
            .into_response();
    }

    match state.library.get(&query.sd_hash).await {
        Ok(video) if video.is_local() => (
            StatusCode::OK,
            Json(json!({
                "status": "available",
                "path": format!("/streams/{}/master.m3u8", video.sd_hash),
            })),
        )
            .into_response(),
        Ok(video) if video.is_remote() => (
            StatusCode::OK,
            Json(json!({
                "status": "remote",
                "url": format!("{}/master.m3u8", video.remote_url),
            })),
        )
            .into_response(),
        _ => {
            state.library.inc_views(&uri, &query.sd_hash);
            (StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))).into_response()
        }
    }
}

fn content_type(name: &str) -> &'static str {
    if name.ends_with(".m3u8") {
        "application/x-mpegurl"
    } else if name.ends_with(".ts") {
        "video/mp2t"
    } else if name.ends_with(".mp4") || name.ends_with(".m4s") {
        "video/mp4"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sluice_core::library::{AddParams, LibraryConfig, INITIAL_MIGRATION};
    use sluice_core::pipeline::{ChannelFilter, StreamRequest};
    use sluice_core::popularity::Queue;
    use sluice_core::storage::LocalDriver;
    use sluice_core::{Db, Library};

    use super::*;

    async fn test_state(
        tmp: &std::path::Path,
        channels: ChannelFilter,
    ) -> (AppState, Arc<Queue<StreamRequest>>) {
        let db = Db::open(tmp.join("video.sqlite")).await.expect("open");
        db.migrate_up(INITIAL_MIGRATION).await.expect("migrate");
        let queue = Arc::new(Queue::new());
        let library = Arc::new(Library::new(LibraryConfig {
            db,
            local: LocalDriver::new(tmp.join("videos")),
            remote: None,
            queue: Arc::clone(&queue),
            max_local_size: 1 << 30,
            max_remote_size: 0,
        }));
        (
            AppState {
                library,
                channels,
            },
            queue,
        )
    }

    #[tokio::test]
    async fn local_fragment_is_served_with_content_type() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (state, _) = test_state(tmp.path(), ChannelFilter::default()).await;

        state
            .library
            .local()
            .put("abc", "master.m3u8", b"#EXTM3U")
            .await
            .expect("put");
        state
            .library
            .add(AddParams {
                sd_hash: "abc".to_owned(),
                url: "lbry://abc".to_owned(),
                local_path: "abc".to_owned(),
                remote_url: String::new(),
                size: 7,
            })
            .await
            .expect("add");

        let resp = serve_fragment(
            State(state.clone()),
            Path(("abc".to_owned(), "master.m3u8".to_owned())),
        )
        .await;
        assert_eq!(StatusCode::OK, resp.status());
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .expect("content type")
            .to_str()
            .expect("ascii header");
        assert_eq!("application/x-mpegurl", content_type);
    }

    #[tokio::test]
    async fn unknown_fragment_is_404() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (state, _) = test_state(tmp.path(), ChannelFilter::default()).await;

        let resp = serve_fragment(
            State(state),
            Path(("missing".to_owned(), "master.m3u8".to_owned())),
        )
        .await;
        assert_eq!(StatusCode::NOT_FOUND, resp.status());
    }

    #[tokio::test]
    async fn traversal_names_are_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (state, _) = test_state(tmp.path(), ChannelFilter::default()).await;

        let resp = serve_fragment(
            State(state),
            Path(("abc".to_owned(), "../secrets".to_owned())),
        )
        .await;
        assert_eq!(StatusCode::BAD_REQUEST, resp.status());
    }

    #[tokio::test]
    async fn missing_video_queues_demand() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (state, queue) = test_state(tmp.path(), ChannelFilter::default()).await;

        let resp = video_status(
            State(state),
            Path("lbry://@chan#1/title#claim".to_owned()),
            Query(VideoQuery {
                sd_hash: "f".repeat(96),
            }),
        )
        .await;
        assert_eq!(StatusCode::ACCEPTED, resp.status());

        let top = queue.pop().expect("demand recorded");
        assert_eq!("f".repeat(96), top.key());
        assert_eq!(1, top.hits());
    }

    #[tokio::test]
    async fn disabled_channel_is_forbidden() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (state, queue) = test_state(
            tmp.path(),
            ChannelFilter::new(vec!["@approved#1".to_owned()]),
        )
        .await;

        let resp = video_status(
            State(state),
            Path("lbry://@other#2/title#claim".to_owned()),
            Query(VideoQuery {
                sd_hash: "f".repeat(96),
            }),
        )
        .await;
        assert_eq!(StatusCode::FORBIDDEN, resp.status());
        assert!(queue.pop().is_none());
    }

    #[tokio::test]
    async fn available_video_reports_playlist_path() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (state, _) = test_state(tmp.path(), ChannelFilter::default()).await;

        state
            .library
            .add(AddParams {
                sd_hash: "abc".to_owned(),
                url: "lbry://abc".to_owned(),
                local_path: "abc".to_owned(),
                remote_url: String::new(),
                size: 7,
            })
            .await
            .expect("add");

        let resp = video_status(
            State(state),
            Path("lbry://abc".to_owned()),
            Query(VideoQuery {
                sd_hash: "abc".to_owned(),
            }),
        )
        .await;
        assert_eq!(StatusCode::OK, resp.status());
    }
}
