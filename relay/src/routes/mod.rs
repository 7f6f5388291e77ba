//! HTTP route definitions.

mod health;
mod members;
mod rooms;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(members::routes())
        .merge(rooms::routes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use tessera_engine::protocol::relay::ErrorBody;
    use tower::ServiceExt;

    fn app() -> Router {
        create_routes().with_state(AppState::for_tests())
    }

    async fn error_body(response: axum::response::Response) -> ErrorBody {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn room_routes_need_a_token() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/rooms")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"name":"notes"}"#))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_body(response).await.code, "unauthorized");

        let response = app()
            .oneshot(
                Request::get("/rooms/!abc:relay.test/events?since=3")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_usernames_are_rejected() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/members")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"username":"not valid"}"#))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_body(response).await.code, "bad_request");
    }
}
