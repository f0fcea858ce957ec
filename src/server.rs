use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ReportError;
use crate::excel_export;
use crate::report::{build_report, ReportFormat, ReportRequest, TimesheetSource};
use crate::timesheet_data::EmployeeTimesheetRecord;

/// サーバー設定
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    /// 生成したxlsxの保存先（/reports で公開）
    pub reports_dir: PathBuf,
    /// file_url の前半部分
    pub public_base_url: String,
}

impl ServerConfig {
    /// 環境変数から設定を読み込み
    /// PORT, REPORTS_DIR, PUBLIC_BASE_URL
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);
        Self {
            port,
            reports_dir: env::var("REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("reports")),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
        }
    }

    fn file_url(&self, file_name: &str) -> String {
        format!("{}/reports/{}", self.public_base_url.trim_end_matches('/'), file_name)
    }
}

/// アプリケーション状態（DBハンドルと設定を共有）
#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn TimesheetSource>,
    pub config: ServerConfig,
}

/// 共通レスポンス（error: 0 成功 / 1 失敗）
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub error: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<EmployeeTimesheetRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

impl ApiResponse {
    pub fn data(records: Vec<EmployeeTimesheetRecord>) -> Self {
        Self {
            error: 0,
            message: "Timesheet data retrieved successfully".to_string(),
            data: Some(records),
            file_url: None,
        }
    }

    pub fn file(file_url: String) -> Self {
        Self {
            error: 0,
            message: "Excel file generated successfully".to_string(),
            data: None,
            file_url: Some(file_url),
        }
    }

    pub fn failure(message: String) -> Self {
        Self {
            error: 1,
            message,
            data: None,
            file_url: None,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let reports = ServeDir::new(&state.config.reports_dir);

    Router::new()
        .route("/health", get(health_check))
        .route("/overall-timesheet-report", post(overall_timesheet_report))
        .nest_service("/reports", reports)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

/// HTTPサーバーを起動
pub async fn run(config: ServerConfig, source: Arc<dyn TimesheetSource>) -> std::io::Result<()> {
    let port = config.port;
    let app = router(AppState { source, config });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Server listening on port {}", port);
    axum::serve(listener, app).await
}

/// ヘルスチェック
async fn health_check() -> &'static str {
    "OK"
}

/// 期間内のタイムシートを集計（JSON または Excel）
async fn overall_timesheet_report(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ReportRequest>, JsonRejection>,
) -> Result<Json<ApiResponse>, ReportError> {
    let Json(req) = payload.map_err(|e| ReportError::Validation(e.body_text()))?;
    let range = req.date_range()?;
    let format = req.format();
    info!("Timesheet report requested: {} to {} ({:?})", range.start, range.end, format);

    // mysqlクライアントは同期なのでブロッキングスレッドで実行
    let source = state.source.clone();
    let records = tokio::task::spawn_blocking(move || build_report(source.as_ref(), &range)).await??;

    match format {
        ReportFormat::Json => Ok(Json(ApiResponse::data(records))),
        ReportFormat::Excel => {
            let dir = state.config.reports_dir.clone();
            let path = tokio::task::spawn_blocking(move || excel_export::write_report(&dir, &records))
                .await??;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(Json(ApiResponse::file(state.config.file_url(&file_name))))
        }
    }
}
