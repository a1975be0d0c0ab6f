use crate::{
    blob::SqliteBlobStore,
    day::{tz_offset_from_minutes, DayWindow},
    event::{Category, EventRecord, EventType, Phase},
    settings::{save_settings, Settings},
    status,
    store::{now_millis, EventLog},
};
use axum::{
    extract::{Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    log: Arc<Mutex<EventLog<SqliteBlobStore>>>,
    settings: Arc<Mutex<Settings>>,
    // Bumped after every mutation; the UI re-renders when it changes.
    revision: Arc<AtomicU64>,
    // Bumped on reset; the UI reinitializes from scratch when it changes.
    epoch: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(mut log: EventLog<SqliteBlobStore>, settings: Settings) -> Self {
        let revision = Arc::new(AtomicU64::new(0));
        let epoch = Arc::new(AtomicU64::new(0));

        let r = revision.clone();
        log.set_refresh_hook(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let (r, e) = (revision.clone(), epoch.clone());
        log.set_reload_hook(move || {
            e.fetch_add(1, Ordering::SeqCst);
            r.fetch_add(1, Ordering::SeqCst);
        });

        Self {
            log: Arc::new(Mutex::new(log)),
            settings: Arc::new(Mutex::new(settings)),
            revision,
            epoch,
        }
    }
}

#[derive(Serialize)]
struct OkResponse<T: Serialize> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

#[derive(Serialize)]
struct ErrResponse {
    ok: bool,
    error: &'static str,
}

#[derive(Deserialize)]
struct TrackRequest {
    category: String,
    #[serde(default)]
    phase: Option<Phase>,
}

#[derive(Deserialize)]
struct ToggleRequest {
    category: String,
}

#[derive(Serialize)]
struct MutationResult {
    changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<EventRecord>,
    revision: u64,
}

#[derive(Deserialize)]
struct EventsQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Deserialize)]
struct StatusQuery {
    #[serde(default)]
    day_offset: i64,
    /// Client local offset minutes, e.g. 480 for UTC+8. Server local time when absent.
    tz_offset_minutes: Option<i32>,
}

#[derive(Serialize)]
pub struct StatusSnapshot {
    pub revision: u64,
    pub epoch: u64,
    pub now: i64,
    pub day_offset: i64,
    pub day: DayWindow,
    pub can_undo: bool,
    pub can_redo: bool,
    pub history_len: usize,
    pub redo_depth: usize,
    pub categories: Vec<CategoryStatus>,
}

#[derive(Serialize)]
pub struct CategoryStatus {
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_time: Option<i64>,
    pub count_in_day: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toggle: Option<ToggleStatus>,
}

#[derive(Serialize)]
pub struct ToggleStatus {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_stop: Option<i64>,
    pub active_ms_in_day: i64,
}

#[derive(Deserialize)]
struct SettingsUpdate {
    #[serde(default)]
    max_history: Option<usize>,
    #[serde(default)]
    toggleable: Option<Vec<String>>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/track", post(post_track).options(options_ok))
        .route("/toggle", post(post_toggle).options(options_ok))
        .route("/undo", post(post_undo).options(options_ok))
        .route("/redo", post(post_redo).options(options_ok))
        .route("/reset", post(post_reset).options(options_ok))
        .route("/events", get(get_events))
        .route("/status", get(get_status))
        .route(
            "/settings",
            get(get_settings).post(post_settings).options(options_ok),
        )
        .with_state(state)
        .layer(cors)
}

fn error_response(status: StatusCode, error: &'static str) -> Response {
    (status, Json(ErrResponse { ok: false, error })).into_response()
}

fn ok_response<T: Serialize>(data: T) -> Response {
    Json(OkResponse {
        ok: true,
        data: Some(data),
    })
    .into_response()
}

async fn options_ok() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
struct HealthInfo {
    service: &'static str,
    version: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(OkResponse {
        ok: true,
        data: Some(HealthInfo {
            service: "tracker_core",
            version: env!("CARGO_PKG_VERSION"),
        }),
    })
}

fn mutation_result(
    state: &AppState,
    result: anyhow::Result<Option<EventRecord>>,
    op: &str,
) -> Response {
    match result {
        Ok(event) => ok_response(MutationResult {
            changed: event.is_some(),
            event,
            revision: state.revision.load(Ordering::SeqCst),
        }),
        Err(err) => {
            error!("{op} failed to persist: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "db_error")
        }
    }
}

async fn post_track(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let req: TrackRequest = match serde_json::from_value(payload) {
        Ok(v) => v,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid_json"),
    };
    let Ok(category) = req.category.parse::<Category>() else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_category");
    };

    let result = {
        let mut log = state.log.lock().await;
        log.record(category, req.phase).map(Some)
    };
    mutation_result(&state, result, "track")
}

async fn post_toggle(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let req: ToggleRequest = match serde_json::from_value(payload) {
        Ok(v) => v,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid_json"),
    };
    let Ok(category) = req.category.parse::<Category>() else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_category");
    };
    let toggleable = { state.settings.lock().await.is_toggleable(category) };
    if !toggleable {
        return error_response(StatusCode::BAD_REQUEST, "not_toggleable");
    }

    let result = {
        let mut log = state.log.lock().await;
        log.toggle(category).map(Some)
    };
    mutation_result(&state, result, "toggle")
}

async fn post_undo(State(state): State<AppState>) -> Response {
    let result = { state.log.lock().await.undo() };
    mutation_result(&state, result, "undo")
}

async fn post_redo(State(state): State<AppState>) -> Response {
    let result = { state.log.lock().await.redo() };
    mutation_result(&state, result, "redo")
}

async fn post_reset(State(state): State<AppState>) -> Response {
    let result = { state.log.lock().await.reset() };
    match result {
        Ok(()) => {
            info!("all tracked data cleared");
            ok_response(MutationResult {
                changed: true,
                event: None,
                revision: state.revision.load(Ordering::SeqCst),
            })
        }
        Err(err) => {
            error!("reset failed: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "db_error")
        }
    }
}

async fn get_events(State(state): State<AppState>, Query(q): Query<EventsQuery>) -> Response {
    let limit = q.limit.clamp(1, 500);
    let log = state.log.lock().await;
    let events: Vec<EventRecord> = log.history().iter().rev().take(limit).copied().collect();
    ok_response(events)
}

async fn get_status(State(state): State<AppState>, Query(q): Query<StatusQuery>) -> Response {
    let settings = { state.settings.lock().await.clone() };
    let now = now_millis();
    let log = state.log.lock().await;

    let mut snapshot = match q.tz_offset_minutes {
        Some(minutes) => build_status(
            &*log,
            &settings,
            now,
            q.day_offset,
            &tz_offset_from_minutes(minutes),
        ),
        None => build_status(&*log, &settings, now, q.day_offset, &Local),
    };
    snapshot.revision = state.revision.load(Ordering::SeqCst);
    snapshot.epoch = state.epoch.load(Ordering::SeqCst);
    ok_response(snapshot)
}

/// Everything the UI shows for one day, derived fresh from the history.
pub fn build_status<S, Tz>(
    log: &EventLog<S>,
    settings: &Settings,
    now: i64,
    day_offset: i64,
    tz: &Tz,
) -> StatusSnapshot
where
    S: crate::blob::BlobStore,
    Tz: TimeZone,
{
    let history = log.history();
    let day = DayWindow::local(now, day_offset, tz);
    // Past days only see what had happened by their end.
    let upper_bound = (day_offset < 0).then_some(day.end - 1);
    let seen_by_day_end: Option<Vec<EventRecord>> = upper_bound.map(|bound| {
        history
            .iter()
            .filter(|e| e.time <= bound)
            .copied()
            .collect()
    });

    let categories = Category::ALL
        .into_iter()
        .map(|category| {
            if settings.is_toggleable(category) {
                let start = EventType::start(category);
                let stop = EventType::stop(category);
                CategoryStatus {
                    category,
                    last_time: None,
                    count_in_day: status::event_count_in_day(history, start, day),
                    toggle: Some(ToggleStatus {
                        active: match &seen_by_day_end {
                            Some(seen) => status::is_active(seen, category),
                            None => log.is_active(category),
                        },
                        last_start: status::last_event_time(history, start, upper_bound),
                        last_stop: status::last_event_time(history, stop, upper_bound),
                        active_ms_in_day: status::active_duration_in_day(
                            history,
                            category,
                            day,
                            Some(now),
                        ),
                    }),
                }
            } else {
                let plain = EventType::plain(category);
                CategoryStatus {
                    category,
                    last_time: status::last_event_time(history, plain, upper_bound),
                    count_in_day: status::event_count_in_day(history, plain, day),
                    toggle: None,
                }
            }
        })
        .collect();

    StatusSnapshot {
        revision: 0,
        epoch: 0,
        now,
        day_offset,
        day,
        can_undo: log.can_undo(),
        can_redo: log.can_redo(),
        history_len: history.len(),
        redo_depth: log.undo_buffer().count(),
        categories,
    }
}

async fn get_settings(State(state): State<AppState>) -> Response {
    let settings = { state.settings.lock().await.clone() };
    ok_response(settings)
}

async fn post_settings(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let req: SettingsUpdate = match serde_json::from_value(payload) {
        Ok(v) => v,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid_json"),
    };
    if req.max_history == Some(0) {
        return error_response(StatusCode::BAD_REQUEST, "invalid_max_history");
    }
    let toggleable = match req.toggleable {
        Some(names) => {
            let mut set = BTreeSet::new();
            for name in names {
                let Ok(category) = name.parse::<Category>() else {
                    return error_response(StatusCode::BAD_REQUEST, "invalid_category");
                };
                set.insert(category);
            }
            Some(set)
        }
        None => None,
    };

    let mut log = state.log.lock().await;
    let mut settings = { state.settings.lock().await.clone() };
    if let Some(v) = req.max_history {
        settings.max_history = v;
    }
    if let Some(v) = toggleable {
        settings.toggleable = v;
    }

    // The log applies the new cap even if persisting it fails; keep the shared copy in step.
    let truncated = log.set_max_history(settings.max_history);
    {
        let mut guard = state.settings.lock().await;
        *guard = settings.clone();
    }
    if let Err(err) = truncated {
        error!("set_max_history failed: {err:#}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "db_error");
    }
    if let Err(err) = save_settings(log.blobs_mut(), &settings) {
        error!("save_settings failed: {err:#}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "db_error");
    }
    drop(log);

    ok_response(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use chrono::{DateTime, Utc};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const MINUTE: i64 = 60 * 1000;

    fn at(s: &str) -> i64 {
        DateTime::parse_from_rfc3339(s).unwrap().timestamp_millis()
    }

    fn test_settings() -> Settings {
        Settings {
            max_history: 400,
            toggleable: BTreeSet::from([Category::Sleep]),
        }
    }

    fn test_log() -> EventLog<SqliteBlobStore> {
        EventLog::load(SqliteBlobStore::open_in_memory().unwrap(), 400)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn build_status_reports_today() {
        let mut log = test_log();
        log.record_at(EventType::plain(Category::Poop), at("2026-02-14T18:00:00Z")).unwrap();
        for h in ["08", "11", "15"] {
            log.record_at(
                EventType::plain(Category::Poop),
                at(&format!("2026-02-15T{h}:00:00Z")),
            )
            .unwrap();
        }
        log.record_at(EventType::start(Category::Sleep), at("2026-02-15T16:00:00Z")).unwrap();

        let now = at("2026-02-15T16:30:00Z");
        let snap = build_status(&log, &test_settings(), now, 0, &Utc);
        assert!(snap.can_undo);
        assert!(!snap.can_redo);
        assert_eq!(snap.history_len, 5);
        assert_eq!(snap.redo_depth, 0);

        let poop = &snap.categories[Category::Poop as usize];
        assert_eq!(poop.count_in_day, 3);
        assert_eq!(poop.last_time, Some(at("2026-02-15T15:00:00Z")));
        assert!(poop.toggle.is_none());

        let feed = &snap.categories[Category::Feed as usize];
        assert_eq!(feed.last_time, None);

        let sleep = snap.categories[Category::Sleep as usize].toggle.as_ref().unwrap();
        assert!(sleep.active);
        assert_eq!(sleep.last_start, Some(at("2026-02-15T16:00:00Z")));
        assert_eq!(sleep.last_stop, None);
        assert_eq!(sleep.active_ms_in_day, 30 * MINUTE);
    }

    #[test]
    fn build_status_bounds_past_days() {
        let mut log = test_log();
        log.record_at(EventType::plain(Category::Feed), at("2026-02-14T09:00:00Z")).unwrap();
        log.record_at(EventType::plain(Category::Feed), at("2026-02-15T09:00:00Z")).unwrap();

        let snap = build_status(&log, &test_settings(), at("2026-02-15T12:00:00Z"), -1, &Utc);
        let feed = &snap.categories[Category::Feed as usize];
        assert_eq!(feed.count_in_day, 1);
        assert_eq!(feed.last_time, Some(at("2026-02-14T09:00:00Z")));
    }

    #[test]
    fn build_status_reports_toggle_state_at_day_end() {
        let mut log = test_log();
        let sleep = Category::Sleep;
        log.record_at(EventType::start(sleep), at("2026-02-14T08:00:00Z")).unwrap();
        log.record_at(EventType::stop(sleep), at("2026-02-14T09:00:00Z")).unwrap();
        log.record_at(EventType::start(sleep), at("2026-02-15T10:00:00Z")).unwrap();
        let now = at("2026-02-15T12:00:00Z");

        let snap = build_status(&log, &test_settings(), now, -1, &Utc);
        let yesterday = snap.categories[sleep as usize].toggle.as_ref().unwrap();
        assert!(!yesterday.active);
        assert_eq!(yesterday.last_start, Some(at("2026-02-14T08:00:00Z")));
        assert_eq!(yesterday.last_stop, Some(at("2026-02-14T09:00:00Z")));
        assert_eq!(yesterday.active_ms_in_day, 60 * MINUTE);

        let snap = build_status(&log, &test_settings(), now, 0, &Utc);
        let today = snap.categories[sleep as usize].toggle.as_ref().unwrap();
        assert!(today.active);
        assert_eq!(today.last_start, Some(at("2026-02-15T10:00:00Z")));
    }

    #[tokio::test]
    async fn track_undo_redo_over_http() {
        let app = router(AppState::new(test_log(), test_settings()));

        let (status, body) = call(&app, "POST", "/track", Some(r#"{"category":"poop"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["event"]["type"], "poop");
        assert_eq!(body["data"]["revision"], 1);

        let (_, body) = call(&app, "POST", "/undo", None).await;
        assert_eq!(body["data"]["changed"], true);

        let (_, body) = call(&app, "GET", "/status?tz_offset_minutes=0", None).await;
        assert_eq!(body["data"]["can_undo"], false);
        assert_eq!(body["data"]["can_redo"], true);

        let (_, body) = call(&app, "POST", "/redo", None).await;
        assert_eq!(body["data"]["event"]["type"], "poop");

        let (_, body) = call(&app, "POST", "/redo", None).await;
        assert_eq!(body["data"]["changed"], false);

        let (_, body) = call(&app, "GET", "/events?limit=10", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn toggle_requires_a_toggleable_category() {
        let app = router(AppState::new(test_log(), test_settings()));

        let (status, body) = call(&app, "POST", "/toggle", Some(r#"{"category":"feed"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "not_toggleable");

        let (_, body) = call(&app, "POST", "/toggle", Some(r#"{"category":"sleep"}"#)).await;
        assert_eq!(body["data"]["event"]["type"], "sleep_start");
        let (_, body) = call(&app, "POST", "/toggle", Some(r#"{"category":"sleep"}"#)).await;
        assert_eq!(body["data"]["event"]["type"], "sleep_stop");

        let (status, body) = call(&app, "POST", "/track", Some(r#"{"category":"nap"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_category");
    }

    #[tokio::test]
    async fn reset_bumps_epoch() {
        let app = router(AppState::new(test_log(), test_settings()));
        call(&app, "POST", "/track", Some(r#"{"category":"pee"}"#)).await;

        let (status, _) = call(&app, "POST", "/reset", None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, "GET", "/status", None).await;
        assert_eq!(body["data"]["epoch"], 1);
        assert_eq!(body["data"]["can_undo"], false);
        assert_eq!(body["data"]["can_redo"], false);
    }

    #[tokio::test]
    async fn settings_update_changes_toggleable_set() {
        let app = router(AppState::new(test_log(), test_settings()));

        let (status, body) = call(&app, "POST", "/settings", Some(r#"{"max_history":0}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_max_history");

        let (status, body) = call(
            &app,
            "POST",
            "/settings",
            Some(r#"{"toggleable":["sleep","feed"],"max_history":10}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["max_history"], 10);

        let (status, body) = call(&app, "POST", "/toggle", Some(r#"{"category":"feed"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["event"]["type"], "feed_start");
    }

    #[tokio::test]
    async fn settings_follow_the_log_cap_when_persisting_fails() {
        let mut log = test_log();
        for i in 0..5 {
            log.record_at(EventType::plain(Category::Pee), i * MINUTE).unwrap();
        }
        log.blobs_mut().drop_table_for_test();
        let app = router(AppState::new(log, test_settings()));

        let (status, body) = call(&app, "POST", "/settings", Some(r#"{"max_history":2}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "db_error");

        let (_, body) = call(&app, "GET", "/settings", None).await;
        assert_eq!(body["data"]["max_history"], 2);
        let (_, body) = call(&app, "GET", "/status", None).await;
        assert_eq!(body["data"]["history_len"], 2);
    }
}
