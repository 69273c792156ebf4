//! 조회 라우트
//!
//! 세 읽기 엔드포인트와 liveness 쌍을 제공합니다. 핸들러 패닉은
//! catch-panic 레이어가 500으로 바꾸고, not-found 계열 저장소 에러는
//! 빈 본문의 404로 내려갑니다. X-Forwarded-* 류 헤더는 어디서도
//! 참조하지 않습니다.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

use lanaudit_core::types::Meta;
use lanaudit_store::{Store, StoreError};

/// 핸들러 에러 — 저장소 에러를 HTTP 상태로 사상합니다.
struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.is_not_found() {
            return StatusCode::NOT_FOUND.into_response();
        }
        error!(error = %self.0, "read api request failed");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

#[derive(Serialize)]
struct Liveness {
    status: &'static str,
}

/// 저장소를 상태로 갖는 라우터를 만듭니다.
pub fn router(store: Arc<Store>) -> Router {
    Router::new()
        .route("/ip/", get(all_ips))
        .route("/ip/:ip", get(meta_by_ip))
        .route("/actions/:ip", get(actions_by_ip))
        .route("/live", get(liveness))
        .route("/ready", get(liveness))
        .layer(CatchPanicLayer::new())
        .with_state(store)
}

/// `GET /ip/` — 기록된 모든 IP. 비어 있으면 `[]`이며 404가 아닙니다.
async fn all_ips(State(store): State<Arc<Store>>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(store.get()?))
}

/// `GET /ip/:ip` — IP 하나의 메타데이터. 모르는 IP면 404입니다.
async fn meta_by_ip(
    State(store): State<Arc<Store>>,
    Path(ip): Path<String>,
) -> Result<Json<Meta>, ApiError> {
    Ok(Json(store.get_meta(&ip)?))
}

/// `GET /actions/:ip` — 통신 이력의 `traffic` 매핑만 내려줍니다.
async fn actions_by_ip(
    State(store): State<Arc<Store>>,
    Path(ip): Path<String>,
) -> Result<Json<BTreeMap<String, BTreeSet<String>>>, ApiError> {
    Ok(Json(store.get_actions(&ip)?.traffic))
}

/// `GET /live`, `GET /ready` — 저장소가 열려 있으면 항상 ok입니다.
async fn liveness() -> Json<Liveness> {
    Json(Liveness { status: "ok" })
}
