use crate::bridge::frames::FrameLibrary;
use crate::bridge::hub::SessionHub;
use log::warn;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::reply::{self, Reply, Response};
use warp::{Filter, Rejection};

type Query = HashMap<String, String>;

fn plain(status: StatusCode, body: impl Into<String>) -> Response {
    reply::with_status(body.into(), status).into_response()
}

fn check_transport(query: &Query) -> Result<(), Response> {
    if query.get("EIO").map(String::as_str) != Some("4") {
        return Err(plain(StatusCode::BAD_REQUEST, "unsupported protocol version"));
    }
    if query.get("transport").map(String::as_str) != Some("polling") {
        return Err(plain(StatusCode::BAD_REQUEST, "unsupported transport"));
    }
    Ok(())
}

async fn handle_get(query: Query, hub: Arc<SessionHub>) -> Result<Response, Rejection> {
    if let Err(response) = check_transport(&query) {
        return Ok(response);
    }
    let response = match query.get("sid") {
        None => {
            let (_, body) = hub.open();
            plain(StatusCode::OK, body)
        }
        Some(sid) => match hub.poll(sid).await {
            Ok(body) => plain(StatusCode::OK, body),
            Err(err) => {
                warn!("poll rejected: {err:#}");
                plain(StatusCode::BAD_REQUEST, err.to_string())
            }
        },
    };
    Ok(response)
}

fn handle_post(query: Query, body: Bytes, hub: Arc<SessionHub>) -> Response {
    if let Err(response) = check_transport(&query) {
        return response;
    }
    let Some(sid) = query.get("sid") else {
        return plain(StatusCode::BAD_REQUEST, "missing sid");
    };
    let text = String::from_utf8_lossy(&body);
    match hub.handle_post(sid, &text) {
        Ok(()) => plain(StatusCode::OK, "ok"),
        Err(err) => {
            warn!("post rejected: {err:#}");
            plain(StatusCode::BAD_REQUEST, err.to_string())
        }
    }
}

/// Socket.IO polling endpoint plus the MJPEG feed.
pub fn routes(
    hub: Arc<SessionHub>,
    frames: FrameLibrary,
    frame_interval: Duration,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let hub_filter = warp::any().map(move || hub.clone());

    let socket = warp::path("socket.io").and(warp::path::end());

    let poll_route = socket
        .clone()
        .and(warp::get())
        .and(warp::query::<Query>())
        .and(hub_filter.clone())
        .and_then(handle_get);

    let post_route = socket
        .and(warp::post())
        .and(warp::query::<Query>())
        .and(warp::body::bytes())
        .and(hub_filter)
        .map(handle_post);

    let video_route = warp::path("video_feed")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || frames.stream_response(frame_interval));

    poll_route.or(post_route).unify().or(video_route).unify()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsecore::channel::{decode_payload, EnginePacket, HandshakeData};

    fn test_routes() -> (
        Arc<SessionHub>,
        impl Filter<Extract = (Response,), Error = Rejection> + Clone,
    ) {
        let hub = Arc::new(SessionHub::new(
            Duration::from_millis(200),
            Duration::from_millis(200),
        ));
        let filter = routes(hub.clone(), FrameLibrary::empty(), Duration::from_millis(5));
        (hub, filter)
    }

    async fn handshake(
        filter: &(impl Filter<Extract = (Response,), Error = Rejection> + Clone + 'static),
    ) -> String {
        let response = warp::test::request()
            .method("GET")
            .path("/socket.io/?EIO=4&transport=polling")
            .reply(filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = String::from_utf8(response.body().to_vec()).unwrap();
        let packets = decode_payload(&body).unwrap();
        let EnginePacket::Open(data) = &packets[0] else {
            panic!("expected open packet");
        };
        HandshakeData::parse(data).unwrap().sid
    }

    #[tokio::test]
    async fn handshake_join_and_receive() {
        let (hub, filter) = test_routes();
        let sid = handshake(&filter).await;

        let joined = warp::test::request()
            .method("POST")
            .path(&format!("/socket.io/?EIO=4&transport=polling&sid={sid}"))
            .body("40")
            .reply(&filter)
            .await;
        assert_eq!(joined.status(), StatusCode::OK);
        assert_eq!(hub.broadcast("vehicle_data", &serde_json::json!({"density": 12})), 1);

        let polled = warp::test::request()
            .method("GET")
            .path(&format!("/socket.io/?EIO=4&transport=polling&sid={sid}"))
            .reply(&filter)
            .await;
        let body = String::from_utf8(polled.body().to_vec()).unwrap();
        assert!(body.ends_with(r#"42["vehicle_data",{"density":12}]"#));
    }

    #[tokio::test]
    async fn wrong_protocol_version_is_rejected() {
        let (_, filter) = test_routes();
        let response = warp::test::request()
            .method("GET")
            .path("/socket.io/?EIO=3&transport=polling")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_session_is_rejected() {
        let (_, filter) = test_routes();
        let response = warp::test::request()
            .method("POST")
            .path("/socket.io/?EIO=4&transport=polling&sid=nope")
            .body("40")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn video_feed_without_frames_is_not_found() {
        let (_, filter) = test_routes();
        let response = warp::test::request()
            .method("GET")
            .path("/video_feed")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
