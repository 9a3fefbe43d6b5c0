use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, RefreshRequest, RefreshResponse, RegisterRequest},
        extractors::AuthUser,
        repo_types::PublicUser,
        services::Authenticated,
    },
    error::{AuthError, AuthResult},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refreshtoken", post(refresh))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/auth/me", get(get_me))
}

/// Every body decoding failure is a plain 400, whatever axum would pick.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> AuthResult<T> {
    payload.map(|Json(p)| p).map_err(|e| {
        warn!(error = %e, "rejected request body");
        AuthError::Validation(e.body_text())
    })
}

fn auth_response(message: &'static str, out: Authenticated) -> Json<AuthResponse> {
    Json(AuthResponse {
        message,
        user: out.user,
        access_token: out.tokens.access_token,
        refresh_token: out.tokens.refresh_token,
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> AuthResult<(StatusCode, Json<AuthResponse>)> {
    let out = state.auth.register(body(payload)?).await?;
    Ok((StatusCode::CREATED, auth_response("User created!", out)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AuthResult<Json<AuthResponse>> {
    let out = state.auth.login(body(payload)?).await?;
    Ok(auth_response("Login successful!", out))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> AuthResult<Json<RefreshResponse>> {
    let RefreshRequest { refresh_token } = body(payload)?;
    let tokens = state.auth.refresh(&refresh_token).await?;
    Ok(Json(RefreshResponse {
        message: "Token refreshed!",
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AuthResult<Json<PublicUser>> {
    Ok(Json(state.auth.profile(user_id).await?))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{app::build_app, state::AppState};

    fn app() -> (AppState, Router) {
        let state = AppState::fake();
        (state.clone(), build_app(state))
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.expect("oneshot");
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn post_raw(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .expect("request")
    }

    async fn register(app: &Router, email: &str) -> (StatusCode, Value) {
        call(
            app,
            post_json(
                "/api/auth/register",
                json!({
                    "username": "mahesh",
                    "email": email,
                    "password": "password123",
                    "bio": "building channels"
                }),
            ),
        )
        .await
    }

    fn assert_no_password(user: &Value) {
        let obj = user.as_object().expect("user object");
        assert!(!obj.contains_key("password"));
        assert!(!obj.contains_key("password_hash"));
    }

    #[tokio::test]
    async fn register_returns_201_with_tokens_and_no_password() {
        let (_, app) = app();
        let (status, body) = register(&app, "new@example.com").await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "User created!");
        assert_eq!(body["user"]["email"], "new@example.com");
        assert_eq!(body["user"]["bio"], "building channels");
        assert!(body["user"]["user_id"].is_string());
        assert!(body["accessToken"].is_string());
        assert!(body["refreshToken"].is_string());
        assert_no_password(&body["user"]);
        assert!(!body.to_string().contains("password123"));
    }

    #[tokio::test]
    async fn duplicate_register_is_409() {
        let (_, app) = app();
        assert_eq!(register(&app, "dup@example.com").await.0, StatusCode::CREATED);
        let (status, body) = register(&app, "dup@example.com").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Email already exists");
    }

    #[tokio::test]
    async fn concurrent_register_yields_one_201_and_one_409() {
        let (_, app) = app();
        let (a, b) = tokio::join!(
            register(&app, "race@example.com"),
            register(&app, "race@example.com")
        );
        let mut statuses = vec![a.0.as_u16(), b.0.as_u16()];
        statuses.sort_unstable();
        assert_eq!(statuses, vec![201, 409]);
    }

    #[tokio::test]
    async fn malformed_bodies_are_400() {
        let (_, app) = app();

        let (status, _) = call(&app, post_raw("/api/auth/register", "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            post_json("/api/auth/register", json!({ "email": "x@example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = call(
            &app,
            post_json("/api/auth/login", json!({ "email": 5, "password": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let missing_content_type = Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .body(Body::from(r#"{"email":"a@b.co","password":"x"}"#))
            .expect("request");
        assert_eq!(call(&app, missing_content_type).await.0, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, post_json("/api/auth/refreshtoken", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            post_json("/api/auth/refreshtoken", json!({ "refreshToken": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn login_failures_share_status_and_body() {
        let (_, app) = app();
        register(&app, "user@example.com").await;

        let wrong_password = call(
            &app,
            post_json(
                "/api/auth/login",
                json!({ "email": "user@example.com", "password": "nope-nope" }),
            ),
        )
        .await;
        let unknown_email = call(
            &app,
            post_json(
                "/api/auth/login",
                json!({ "email": "ghost@example.com", "password": "password123" }),
            ),
        )
        .await;

        assert_eq!(wrong_password.0, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_password, unknown_email);
    }

    #[tokio::test]
    async fn login_then_refresh_then_me() {
        let (_, app) = app();
        register(&app, "flow@example.com").await;

        let (status, login) = call(
            &app,
            post_json(
                "/api/auth/login",
                json!({ "email": "flow@example.com", "password": "password123" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(login["message"], "Login successful!");
        assert_no_password(&login["user"]);

        let refresh_token = login["refreshToken"].as_str().expect("refresh token");
        let (status, refreshed) = call(
            &app,
            post_json(
                "/api/auth/refreshtoken",
                json!({ "refreshToken": refresh_token }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(refreshed["message"], "Token refreshed!");
        assert!(refreshed.get("user").is_none());
        assert_ne!(refreshed["refreshToken"], login["refreshToken"]);

        let access = refreshed["accessToken"].as_str().expect("access token");
        let me = Request::builder()
            .uri("/api/auth/me")
            .header(header::AUTHORIZATION, format!("Bearer {access}"))
            .body(Body::empty())
            .expect("request");
        let (status, me) = call(&app, me).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["email"], "flow@example.com");
        assert_eq!(me["user_id"], login["user"]["user_id"]);
        assert_no_password(&me);
    }

    #[tokio::test]
    async fn refresh_with_garbage_is_401() {
        let (_, app) = app();
        let (status, body) = call(
            &app,
            post_json(
                "/api/auth/refreshtoken",
                json!({ "refreshToken": "a.b.c" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid token");
    }

    #[tokio::test]
    async fn refresh_for_unknown_user_is_404() {
        let (state, app) = app();
        let pair = state
            .auth
            .tokens()
            .issue(uuid::Uuid::new_v4())
            .expect("issue");
        let (status, body) = call(
            &app,
            post_json(
                "/api/auth/refreshtoken",
                json!({ "refreshToken": pair.refresh_token }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "User not found");
    }

    #[tokio::test]
    async fn me_requires_access_token() {
        let (_, app) = app();
        let (_, reg) = register(&app, "me@example.com").await;

        let no_header = Request::builder()
            .uri("/api/auth/me")
            .body(Body::empty())
            .expect("request");
        assert_eq!(call(&app, no_header).await.0, StatusCode::UNAUTHORIZED);

        let refresh = reg["refreshToken"].as_str().expect("refresh token");
        let with_refresh = Request::builder()
            .uri("/api/auth/me")
            .header(header::AUTHORIZATION, format!("Bearer {refresh}"))
            .body(Body::empty())
            .expect("request");
        assert_eq!(call(&app, with_refresh).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (_, app) = app();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("request");
        let res = app.oneshot(req).await.expect("oneshot");
        assert_eq!(res.status(), StatusCode::OK);
    }
}
