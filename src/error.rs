use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::db::DataSourceError;
use crate::excel_export::ExportError;
use crate::server::ApiResponse;

/// レポートAPIのエラー
#[derive(Debug, Error)]
pub enum ReportError {
    /// 必須項目の欠落・日付形式の誤り（400）
    #[error("{0}")]
    Validation(String),

    /// DB接続・クエリの失敗（500）
    #[error("{0}")]
    DataSource(#[from] DataSourceError),

    /// Excel出力の失敗（500）
    #[error("{0}")]
    Export(#[from] ExportError),

    /// ブロッキングタスクの異常終了（500）
    #[error("report task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ReportError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ReportError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ReportError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Timesheet report failed: {}", self);
        }
        (status, Json(ApiResponse::failure(self.to_string()))).into_response()
    }
}
