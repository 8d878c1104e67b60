use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use time::Duration;
use tower::ServiceExt;

use eit_auth::{
    app::build_app,
    config::AppConfig,
    email::LogEmailSender,
    rpc::MemoryBackend,
    state::AppState,
};

struct Harness {
    app: Router,
    memory: Arc<MemoryBackend>,
}

fn harness_with(config: AppConfig) -> Harness {
    let memory = Arc::new(MemoryBackend::new());
    let state = AppState::from_parts(memory.clone(), Arc::new(config), Arc::new(LogEmailSender));
    Harness {
        app: build_app(state),
        memory,
    }
}

fn harness() -> Harness {
    harness_with(AppConfig::for_tests())
}

impl Harness {
    async fn call(&self, method: &str, uri: &str, body: Option<Value>, bearer: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            req = req.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = self.app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call("POST", uri, Some(body), None).await
    }

    /// Signs up alice1 and returns her verification code.
    async fn sign_up_alice(&self) -> String {
        let (status, body) = self
            .post(
                "/api/auth/signup",
                json!({"username": "alice1", "email": "a@example.com", "password": "longenough"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["data"]["verification_code"].as_str().unwrap().to_string()
    }

    async fn verify_alice(&self) {
        let code = self.sign_up_alice().await;
        let (status, _) = self
            .post(
                "/api/auth/verify-email",
                json!({"identifier": "alice1", "verificationCode": code}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[tokio::test]
async fn health_is_ok() {
    let h = harness();
    let res = h
        .app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn sign_up_returns_user_code_and_redirect() {
    let h = harness();
    let (status, body) = h
        .post(
            "/api/auth/signup",
            json!({"username": "alice1", "email": "a@example.com", "password": "longenough"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Account created successfully! Please verify your email.");
    assert_eq!(body["data"]["redirect"], "/authentication/verify-email/alice1");
    assert_eq!(body["data"]["user"]["username"], "alice1");
    assert_eq!(body["data"]["verification_code"].as_str().unwrap().len(), 6);
}

#[tokio::test]
async fn invalid_username_is_rejected_before_backend() {
    let h = harness();
    let (status, body) = h
        .post(
            "/api/auth/signup",
            json!({"username": "no spaces", "email": "a@example.com", "password": "longenough"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["data"]["validationErrors"][0]["field"], "username");

    // nothing was created, so the same email is still free
    h.sign_up_alice().await;
}

#[tokio::test]
async fn unverified_account_gets_verification_required_and_no_session() {
    let h = harness();
    h.sign_up_alice().await;
    let creds = json!({"identifier": "alice1", "password": "longenough"});

    let (status, body) = h.post("/api/auth/credentials/preflight", creds.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "VERIFICATION_REQUIRED");

    let (status, body) = h.post("/api/auth/signin/credentials", creds).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["data"]["error"], "CredentialsSignin");
    assert!(body.get("token").is_none());
}

#[tokio::test]
async fn wrong_password_is_invalid_credentials() {
    let h = harness();
    h.verify_alice().await;
    let (status, body) = h
        .post(
            "/api/auth/credentials/preflight",
            json!({"identifier": "a@example.com", "password": "wrong-password"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "INVALID_CREDENTIALS");
    assert_eq!(body["message"], "Invalid email/username or password");
}

#[tokio::test]
async fn preflight_input_errors() {
    let h = harness();
    let (status, body) = h
        .post("/api/auth/credentials/preflight", json!({"identifier": "alice1"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
    assert_eq!(body["message"], "Identifier and password are required");

    let res = h
        .app
        .clone()
        .oneshot(
            Request::post("/api/auth/credentials/preflight")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn verified_user_signs_in_and_reads_session() {
    let h = harness();
    let code = h.sign_up_alice().await;

    let (status, body) = h
        .post(
            "/api/auth/verify-email",
            json!({"identifier": "alice1", "verificationCode": code.to_lowercase()}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Email verified successfully! You can now sign in.");

    let (status, _) = h
        .post(
            "/api/auth/verify-email",
            json!({"identifier": "alice1", "verificationCode": code}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let creds = json!({"identifier": "alice1", "password": "longenough"});
    let (status, body) = h.post("/api/auth/credentials/preflight", creds.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));

    let (status, body) = h.post("/api/auth/signin/credentials", creds).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "alice1");
    assert_eq!(body["user"]["emailVerified"], true);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = h.call("GET", "/api/auth/session", None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["email"], "a@example.com");
    assert!(body["data"].get("token").is_none());

    let (status, _) = h.call("POST", "/api/auth/signout", None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn session_is_reissued_after_update_age() {
    let mut config = AppConfig::for_tests();
    config.session.update_age_minutes = 0;
    let h = harness_with(config);
    h.verify_alice().await;

    let (_, body) = h
        .post(
            "/api/auth/signin/credentials",
            json!({"identifier": "alice1", "password": "longenough"}),
        )
        .await;
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = h.call("GET", "/api/auth/session", None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["token"].is_string());
    assert_eq!(body["data"]["user"]["username"], "alice1");
}

#[tokio::test]
async fn resend_respects_cooldown() {
    let h = harness();
    h.sign_up_alice().await;

    let (status, body) = h
        .post("/api/auth/resend-code", json!({"identifier": "alice1"}))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let minutes = body["data"]["minutesRemaining"].as_u64().unwrap();
    assert!(minutes <= 15);
    assert_eq!(
        body["message"],
        format!("Please wait {minutes} minutes before requesting a new verification code.")
    );

    h.memory.advance(Duration::minutes(16));
    let (status, body) = h
        .post("/api/auth/resend-code", json!({"identifier": "a@example.com"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "New verification code sent to your email.");
}

#[tokio::test]
async fn password_reset_round_trip() {
    let h = harness();
    h.verify_alice().await;

    let (status, body) = h
        .post("/api/auth/password-reset/initiate", json!({"identifier": "alice1"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["data"]["reset_token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 64);

    for _ in 0..2 {
        let (status, body) = h
            .post("/api/auth/password-reset/validate", json!({"token": token}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["username"], "alice1");
    }

    let reset = json!({"newPassword": "another-pass", "token": token});
    let (status, body) = h.post("/api/auth/password-reset", reset.clone()).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let (status, _) = h.post("/api/auth/password-reset", reset).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h
        .post(
            "/api/auth/credentials/preflight",
            json!({"identifier": "alice1", "password": "another-pass"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h
        .post("/api/auth/password-reset/validate", json!({"token": "abc"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid token format");
}

#[tokio::test]
async fn verification_link_redeems_and_redirects() {
    let h = harness();
    let code = h.sign_up_alice().await;

    let uri = format!("/authentication/verify-email/alice1?code={}", code.to_lowercase());
    let res = h
        .app
        .clone()
        .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(res.status().is_redirection());
    assert_eq!(
        res.headers()["location"],
        "/authentication?mode=signin&verified=1"
    );

    let res = h
        .app
        .clone()
        .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let location = res.headers()["location"].to_str().unwrap().to_string();
    assert!(location.starts_with("/authentication?mode=signin&error="));
}

#[tokio::test]
async fn social_callback_issues_session() {
    let h = harness();
    let (status, body) = h
        .post(
            "/api/auth/callback/google",
            json!({"email": "gina@example.com", "name": "Gina", "picture": "https://img/g.png"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["displayName"], "Gina");
    assert_eq!(body["user"]["avatar"], "https://img/g.png");
    assert!(body["token"].is_string());

    let (status, body) = h.call("GET", "/api/users/gina", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "gina@example.com");
}

#[tokio::test]
async fn unreadable_bodies_get_the_action_shape() {
    let h = harness();
    for uri in [
        "/api/auth/signup",
        "/api/auth/verify-email",
        "/api/auth/resend-code",
        "/api/auth/send-verification-email",
        "/api/auth/password-reset/initiate",
        "/api/auth/password-reset/validate",
        "/api/auth/password-reset",
        "/api/auth/signin/credentials",
        "/api/auth/callback/google",
    ] {
        let res = h
            .app
            .clone()
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{uri}");
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false, "{uri}");
        assert_eq!(body["message"], "Invalid request body", "{uri}");
    }
}

#[tokio::test]
async fn expired_or_forged_session_is_a_json_401() {
    let h = harness();
    let (status, body) = h
        .call("GET", "/api/auth/session", None, Some("forged.token.value"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}
