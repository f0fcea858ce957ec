use chrono::{NaiveDate, NaiveDateTime};
use mysql::prelude::{FromRow, Queryable};
use mysql::{from_row_opt, FromRowError, OptsBuilder, Pool, PoolConstraints, PoolOpts, Value};
use serde_json::Value as JsonValue;
use std::env;
use thiserror::Error;
use tracing::debug;

use crate::report::TimesheetSource;
use crate::timesheet_data::{
    Category, DateRange, Employee, EmploymentStatus, TimesheetEntry, ACTIVE_STATUS,
};

/// IN句1回あたりのID数上限
const ID_BATCH_SIZE: usize = 1000;

/// 接続プールの既定上限
const DEFAULT_POOL_SIZE: usize = 10;

/// DBアクセスのエラー
#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("database error: {0}")]
    Mysql(#[from] mysql::Error),

    #[error("unexpected row shape: {0}")]
    Row(#[from] FromRowError),

    #[error("invalid value '{value}' in column {column}")]
    Column { column: &'static str, value: String },

    #[error("invalid pool configuration: {0}")]
    Config(String),
}

/// データベース接続設定
#[derive(Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub pool_size: usize,
}

impl DbConfig {
    /// 環境変数から設定を読み込み
    /// DB_HOST, DB_PORT, DB_USER, DB_PASS, DB_NAME, DB_POOL_SIZE
    pub fn from_env() -> Self {
        Self {
            host: env::var("DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3306),
            user: env::var("DB_USER").unwrap_or_else(|_| "root".to_string()),
            password: env::var("DB_PASS").unwrap_or_default(),
            database: env::var("DB_NAME").unwrap_or_else(|_| "timesheet".to_string()),
            pool_size: env::var("DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_POOL_SIZE),
        }
    }

    /// 接続オプションを生成（上限に達したら空き接続を待つ）
    fn opts(&self) -> Result<OptsBuilder, DataSourceError> {
        let constraints = PoolConstraints::new(1, self.pool_size).ok_or_else(|| {
            DataSourceError::Config(format!("pool size must be at least 1, got {}", self.pool_size))
        })?;

        Ok(OptsBuilder::new()
            .ip_or_hostname(Some(self.host.clone()))
            .tcp_port(self.port)
            .user(Some(self.user.clone()))
            .pass(Some(self.password.clone()))
            .db_name(Some(self.database.clone()))
            .pool_opts(PoolOpts::default().with_constraints(constraints)))
    }
}

/// users の取得結果
type EmployeeRow = (
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    i64,
);

/// 区分テーブルの取得結果（日付は文字列で取得してパース）
/// duration / bms_parameter は列の型のまま受け取る
type EntryRow = (
    i64,
    i64,
    String,
    Value,
    Option<String>,
    Value,
    Option<String>,
);

/// タイムシートデータベースアクセス
pub struct TimesheetDb {
    pool: Pool,
}

impl TimesheetDb {
    /// データベースに接続
    pub fn connect(config: &DbConfig) -> Result<Self, DataSourceError> {
        let pool = Pool::new(config.opts()?)?;
        Ok(Self { pool })
    }

    /// プレースホルダ付きクエリを実行して行を変換
    fn fetch<T: FromRow>(&self, query: &str, params: Vec<Value>) -> Result<Vec<T>, DataSourceError> {
        let mut conn = self.pool.get_conn()?;
        let result = conn.exec_iter(query, params)?;
        result
            .map(|row| -> Result<T, DataSourceError> { Ok(from_row_opt(row?)?) })
            .collect()
    }
}

impl TimesheetSource for TimesheetDb {
    fn active_employee_ids(&self) -> Result<Vec<i64>, DataSourceError> {
        self.fetch(
            "SELECT id FROM users WHERE status = ? ORDER BY id",
            vec![Value::from(ACTIVE_STATUS)],
        )
    }

    fn employees_by_ids(&self, ids: &[i64]) -> Result<Vec<Employee>, DataSourceError> {
        let mut employees = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(ID_BATCH_SIZE) {
            let rows: Vec<EmployeeRow> = self.fetch(&employee_query(chunk.len()), id_params(chunk))?;
            employees.extend(rows.into_iter().map(employee_from_row));
        }

        debug!("Loaded {} employee rows for {} ids", employees.len(), ids.len());
        Ok(employees)
    }

    fn entries(
        &self,
        category: Category,
        emp_ids: &[i64],
        range: &DateRange,
    ) -> Result<Vec<TimesheetEntry>, DataSourceError> {
        let mut entries = Vec::new();

        for chunk in emp_ids.chunks(ID_BATCH_SIZE) {
            let mut params = id_params(chunk);
            params.push(Value::from(range.start.format("%Y-%m-%d").to_string()));
            params.push(Value::from(range.end.format("%Y-%m-%d").to_string()));

            let rows: Vec<EntryRow> = self.fetch(&entry_query(category, chunk.len()), params)?;
            for row in rows {
                entries.push(entry_from_row(row)?);
            }
        }

        debug!("Loaded {} {} entries", entries.len(), category.key());
        Ok(entries)
    }
}

/// "?, ?, ?" を生成
fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn id_params(ids: &[i64]) -> Vec<Value> {
    ids.iter().map(|&id| Value::from(id)).collect()
}

fn employee_query(id_count: usize) -> String {
    format!(
        "SELECT id, emp_code, first_name, middle_name, last_name,
                designation_id, department_id, plant_id, band_id,
                reporting_manager, status
         FROM users
         WHERE id IN ({})
         ORDER BY id",
        placeholders(id_count)
    )
}

/// 区分テーブルのクエリ（有効行のみ、日付降順）
fn entry_query(category: Category, id_count: usize) -> String {
    format!(
        "SELECT id, emp_id,
                DATE_FORMAT(date, '%Y-%m-%d') as dt,
                duration,
                remark,
                bms_parameter,
                DATE_FORMAT(updated_at, '%Y-%m-%d %H:%i:%s') as updated
         FROM {}
         WHERE emp_id IN ({})
           AND date BETWEEN ? AND ?
           AND status = 1
         ORDER BY emp_id, date DESC, id DESC",
        category.table_name(),
        placeholders(id_count)
    )
}

fn employee_from_row(row: EmployeeRow) -> Employee {
    let (
        id,
        emp_code,
        first_name,
        middle_name,
        last_name,
        designation_id,
        department_id,
        plant_id,
        band_id,
        reporting_manager,
        status,
    ) = row;

    Employee {
        id,
        emp_code,
        first_name: first_name.unwrap_or_default(),
        middle_name,
        last_name: last_name.unwrap_or_default(),
        designation_id,
        department_id,
        plant_id,
        band_id,
        reporting_manager,
        status: EmploymentStatus::from_flag(status),
    }
}

fn entry_from_row(row: EntryRow) -> Result<TimesheetEntry, DataSourceError> {
    let (id, emp_id, date, duration, remark, bms_parameter, updated_at) = row;

    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|_| DataSourceError::Column {
        column: "date",
        value: date.clone(),
    })?;

    let updated_at = match updated_at {
        Some(s) => Some(
            NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                .map_err(|_| DataSourceError::Column { column: "updated_at", value: s.clone() })?,
        ),
        None => None,
    };

    Ok(TimesheetEntry {
        id,
        emp_id,
        date,
        duration: column_json(duration),
        remark,
        bms_parameter: column_json(bms_parameter),
        updated_at,
    })
}

/// 列の値をJSONに変換（整数・浮動小数は数値、DECIMAL・文字列・TIMEは文字列）
fn column_json(value: Value) -> Option<JsonValue> {
    match value {
        Value::NULL => None,
        Value::Int(n) => Some(JsonValue::from(n)),
        Value::UInt(n) => Some(JsonValue::from(n)),
        Value::Float(n) => Some(JsonValue::from(n as f64)),
        Value::Double(n) => Some(JsonValue::from(n)),
        Value::Bytes(bytes) => Some(JsonValue::String(String::from_utf8_lossy(&bytes).into_owned())),
        Value::Date(year, month, day, hour, minute, second, _) => Some(JsonValue::String(format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            year, month, day, hour, minute, second
        ))),
        Value::Time(negative, days, hours, minutes, seconds, _) => Some(JsonValue::String(format!(
            "{}{:02}:{:02}:{:02}",
            if negative { "-" } else { "" },
            days * 24 + hours as u32,
            minutes,
            seconds
        ))),
    }
}
