//! `GET /conversations/:id/reasoning`: the reasoning feed as `text/event-stream`.
//!
//! Frames come from [`reasoning_event::to_sse_frame`]; a lagging subscriber receives a
//! `stream.missed` frame and the feed refills from the log. The cursor is `?after=N` or,
//! on reconnect, the `Last-Event-ID` header.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use hitl::FeedItem;
use reasoning_event::{missed_frame, to_sse_frame};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::app::AppState;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StreamQuery {
    after: Option<u64>,
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn frame(item: FeedItem) -> Option<String> {
    match item {
        FeedItem::Event(event) => match to_sse_frame(&event) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(sequence_index = event.sequence_index, error = %e, "dropping unframeable event");
                None
            }
        },
        FeedItem::Missed { resume_after } => Some(missed_frame(resume_after)),
    }
}

pub(crate) async fn reasoning_stream(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    let after = query.after.or_else(|| last_event_id(&headers));
    debug!(conversation_id = %conversation_id, ?after, "reasoning stream opened");
    let frames = state
        .service
        .stream_reasoning(&conversation_id, after)
        .filter_map(|item| async move { frame(item) })
        .map(Ok::<_, Infallible>);
    let mut response = Body::from_stream(frames).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_event_id_parses_numeric_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(last_event_id(&headers), None);
        headers.insert("last-event-id", HeaderValue::from_static(" 41 "));
        assert_eq!(last_event_id(&headers), Some(41));
        headers.insert("last-event-id", HeaderValue::from_static("abc"));
        assert_eq!(last_event_id(&headers), None);
    }

    #[test]
    fn missed_item_becomes_missed_frame() {
        let text = frame(FeedItem::Missed { resume_after: Some(3) }).unwrap();
        assert!(text.starts_with("event: stream.missed\n"));
    }
}
