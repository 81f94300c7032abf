use axum::{extract::rejection::JsonRejection, extract::State, Json};
use moodsync_shared::protocol::{
    AccountResponse, AuthRequest, DeleteResponse, IdentityRequest, MeResponse, UsernameRequest,
    UsernameResponse,
};
use moodsync_shared::sanitize::normalize_username;

use crate::api::{json_body, with_store, AppState, Op};
use crate::error::ServerError;
use crate::remote::RemoteStoreError;

const MAX_TIMEZONE_LEN: usize = 64;

/// Sign in: create the identity on first sight, refresh it afterwards.
pub async fn sign_in(
    State(state): State<AppState>,
    body: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<Json<AccountResponse>, ServerError> {
    let req = json_body(body)?;
    let auth = state.authorize(req.init_data.as_deref(), Op::Auth).await?;
    let created = auth.user.is_none();

    let timezone = req
        .timezone
        .map(|tz| tz.trim().to_string())
        .filter(|tz| !tz.is_empty() && tz.len() <= MAX_TIMEZONE_LEN);
    let reminders = req
        .reminders
        .filter(|r| r.hour.map_or(true, |h| h < 24));
    let platform_name = auth
        .profile
        .username
        .as_deref()
        .and_then(normalize_username);

    let profile = auth.profile;
    let user = with_store(auth.store, move |s| {
        let mut user = s.upsert_user(&profile, timezone.as_deref(), reminders.as_ref())?;

        // adopt the platform username once, if nobody else holds it
        if let Some(name) = platform_name.filter(|_| user.username.is_none()) {
            if s.find_user_id_by_username(&name)?.is_none() {
                match s.set_username(user.id, &name) {
                    Ok(()) => user.username = Some(name),
                    Err(RemoteStoreError::UsernameTaken) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(user)
    })
    .await?;

    if created {
        tracing::info!(user = %user.id, "new identity signed in");
    }

    Ok(Json(AccountResponse {
        ok: true,
        user: user.into(),
    }))
}

/// Identity check: does the caller still exist?
pub async fn me(
    State(state): State<AppState>,
    body: Result<Json<IdentityRequest>, JsonRejection>,
) -> Result<Json<MeResponse>, ServerError> {
    let req = json_body(body)?;
    let auth = state.authorize(req.init_data.as_deref(), Op::Me).await?;

    Ok(Json(MeResponse {
        ok: true,
        id: auth.profile.id,
        username: auth.user.and_then(|u| u.username),
    }))
}

pub async fn update_username(
    State(state): State<AppState>,
    body: Result<Json<UsernameRequest>, JsonRejection>,
) -> Result<Json<UsernameResponse>, ServerError> {
    let req = json_body(body)?;
    let auth = state.authorize(req.init_data.as_deref(), Op::Username).await?;
    let name = normalize_username(&req.username).ok_or(ServerError::InvalidUsername)?;

    let id = auth.profile.id;
    let wanted = name.clone();
    with_store(auth.store, move |s| {
        match s.find_user_id_by_username(&wanted)? {
            Some(owner) if owner != id => Err(RemoteStoreError::UsernameTaken),
            _ => s.set_username(id, &wanted),
        }
    })
    .await?;

    tracing::info!(user = %id, username = %name, "username updated");

    Ok(Json(UsernameResponse {
        ok: true,
        username: name,
    }))
}

/// Delete the caller and every entry it owns.
pub async fn delete(
    State(state): State<AppState>,
    body: Result<Json<IdentityRequest>, JsonRejection>,
) -> Result<Json<DeleteResponse>, ServerError> {
    let req = json_body(body)?;
    let auth = state.authorize(req.init_data.as_deref(), Op::Delete).await?;

    let id = auth.profile.id;
    let deleted = with_store(auth.store, move |s| s.delete_user(id)).await?;

    tracing::info!(user = %id, deleted, "identity deleted");

    Ok(Json(DeleteResponse { ok: true, deleted }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use moodsync_shared::protocol::{AUTH_PATH, DELETE_PATH, ME_PATH, PULL_PATH, PUSH_PATH, USERNAME_PATH};
    use moodsync_shared::types::UserId;
    use serde_json::json;

    use crate::api::build_router;
    use crate::api::test_support::*;
    use crate::remote::RemoteStore;

    #[tokio::test]
    async fn test_sign_in_creates_and_refreshes() {
        let (state, store) = state();
        let app = build_router(state);
        let me = init_data(21, Some("Ada_L"));

        let (status, body) = post_json(
            &app,
            AUTH_PATH,
            json!({ "initData": me, "timezone": "Europe/Paris", "reminders": { "enabled": true, "hour": 20 } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["id"], 21);
        assert_eq!(body["user"]["username"], "ada_l");
        assert_eq!(body["user"]["timezone"], "Europe/Paris");
        assert_eq!(body["user"]["reminders"]["hour"], 20);

        let (_, body) = post_json(&app, AUTH_PATH, json!({ "initData": me })).await;
        assert_eq!(body["user"]["timezone"], "Europe/Paris");
        assert!(store.get_user(UserId(21)).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sign_in_skips_taken_platform_username() {
        let (state, _) = state();
        let app = build_router(state);
        post_json(&app, AUTH_PATH, json!({ "initData": init_data(1, Some("ada")) })).await;

        let (_, body) =
            post_json(&app, AUTH_PATH, json!({ "initData": init_data(2, Some("ada")) })).await;
        assert!(body["user"]["username"].is_null());
    }

    #[tokio::test]
    async fn test_me_reports_identity() {
        let (state, _) = state();
        let app = build_router(state);
        let me = init_data(22, Some("grace"));

        let (status, _) = post_json(&app, ME_PATH, json!({ "initData": me })).await;
        assert_eq!(status, StatusCode::GONE);

        post_json(&app, AUTH_PATH, json!({ "initData": me })).await;
        let (status, body) = post_json(&app, ME_PATH, json!({ "initData": me })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true, "id": 22, "username": "grace" }));
    }

    #[tokio::test]
    async fn test_username_rules() {
        let (state, _) = state();
        let app = build_router(state);
        let a = init_data(31, None);
        let b = init_data(32, None);
        post_json(&app, AUTH_PATH, json!({ "initData": a })).await;
        post_json(&app, AUTH_PATH, json!({ "initData": b })).await;

        let (status, body) =
            post_json(&app, USERNAME_PATH, json!({ "initData": a, "username": " @Mood_Fan " })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "mood_fan");

        let (status, body) =
            post_json(&app, USERNAME_PATH, json!({ "initData": b, "username": "MOOD_FAN" })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "username-taken");

        let (status, body) =
            post_json(&app, USERNAME_PATH, json!({ "initData": b, "username": "no spaces!" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid-username");

        // keeping your own name is not a conflict
        let (status, _) =
            post_json(&app, USERNAME_PATH, json!({ "initData": a, "username": "mood_fan" })).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_delete_then_everything_is_gone() {
        let (state, store) = state();
        let app = build_router(state);
        let me = init_data(41, None);
        post_json(&app, AUTH_PATH, json!({ "initData": me })).await;
        post_json(
            &app,
            PUSH_PATH,
            json!({ "initData": me, "entries": [{ "date": "2025-01-01", "emojis": ["😀"], "updatedAt": 1 }] }),
        )
        .await;

        let (status, body) = post_json(&app, DELETE_PATH, json!({ "initData": me })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], true);
        assert!(store.fetch_entries(UserId(41), None).unwrap().is_empty());

        let (status, body) = post_json(&app, PULL_PATH, json!({ "initData": me })).await;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(body["error"], "user-missing");
    }
}
