use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::ReportError;

/// リクエストの日付形式（DD-MM-YYYY）
pub const REQUEST_DATE_FORMAT: &str = "%d-%m-%Y";

/// usersテーブルのstatus値（在籍）
pub const ACTIVE_STATUS: i64 = 1;

/// 在籍区分
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmploymentStatus {
    Active,
    Separated,
}

impl EmploymentStatus {
    pub fn from_flag(flag: i64) -> Self {
        if flag == ACTIVE_STATUS {
            EmploymentStatus::Active
        } else {
            EmploymentStatus::Separated
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EmploymentStatus::Active => "Active",
            EmploymentStatus::Separated => "Separated",
        }
    }
}

/// 従業員情報（usersテーブル）
#[derive(Debug, Clone)]
pub struct Employee {
    pub id: i64,
    pub emp_code: Option<String>,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub designation_id: Option<i64>,
    pub department_id: Option<i64>,
    pub plant_id: Option<i64>,
    pub band_id: Option<i64>,
    pub reporting_manager: Option<i64>, // 上長のusers.id
    pub status: EmploymentStatus,
}

impl Employee {
    /// 氏名を連結（ミドルネームが空なら詰める）
    pub fn full_name(&self) -> String {
        [
            Some(self.first_name.as_str()),
            self.middle_name.as_deref(),
            Some(self.last_name.as_str()),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }
}

/// タイムシートの区分（6種類、出力順固定）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    KraKpi,
    Routine,
    Initiative,
    Project,
    Onetime,
    Leave,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::KraKpi,
        Category::Routine,
        Category::Initiative,
        Category::Project,
        Category::Onetime,
        Category::Leave,
    ];

    /// 区分ごとのテーブル名
    pub fn table_name(&self) -> &'static str {
        match self {
            Category::KraKpi => "kra_kpi",
            Category::Routine => "routine",
            Category::Initiative => "initiative",
            Category::Project => "project",
            Category::Onetime => "onetime",
            Category::Leave => "leave_timesheet",
        }
    }

    /// JSONのキー名
    pub fn key(&self) -> &'static str {
        match self {
            Category::Leave => "leave",
            other => other.table_name(),
        }
    }

    /// Excelの見出し
    pub fn header(&self) -> &'static str {
        match self {
            Category::KraKpi => "KRA/KPI",
            Category::Routine => "Routine",
            Category::Initiative => "Initiative",
            Category::Project => "Project",
            Category::Onetime => "Onetime",
            Category::Leave => "Leave",
        }
    }
}

/// タイムシート1行分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimesheetEntry {
    pub id: i64,
    pub emp_id: i64,
    pub date: NaiveDate,
    pub duration: Option<serde_json::Value>, // 列の型に従う（数値または文字列）
    pub remark: Option<String>,
    pub bms_parameter: Option<serde_json::Value>,
    pub updated_at: Option<NaiveDateTime>,
}

/// レスポンスの employee 部分
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmployeeSummary {
    pub id: i64,
    pub emp_code: Option<String>,
    pub full_name: String,
    pub designation: Option<i64>,
    pub department: Option<i64>,
    pub plant: Option<i64>,
    pub band: Option<i64>,
    pub reporting_manager: Option<i64>,
    pub job_status: &'static str,
}

impl From<&Employee> for EmployeeSummary {
    fn from(employee: &Employee) -> Self {
        Self {
            id: employee.id,
            emp_code: employee.emp_code.clone(),
            full_name: employee.full_name(),
            designation: employee.designation_id,
            department: employee.department_id,
            plant: employee.plant_id,
            band: employee.band_id,
            reporting_manager: employee.reporting_manager,
            job_status: employee.status.label(),
        }
    }
}

/// 従業員1人分の集計結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmployeeTimesheetRecord {
    pub employee: EmployeeSummary,
    pub kra_kpi: Vec<TimesheetEntry>,
    pub routine: Vec<TimesheetEntry>,
    pub initiative: Vec<TimesheetEntry>,
    pub project: Vec<TimesheetEntry>,
    pub onetime: Vec<TimesheetEntry>,
    pub leave: Vec<TimesheetEntry>,
}

impl EmployeeTimesheetRecord {
    pub fn new(employee: EmployeeSummary) -> Self {
        Self {
            employee,
            kra_kpi: Vec::new(),
            routine: Vec::new(),
            initiative: Vec::new(),
            project: Vec::new(),
            onetime: Vec::new(),
            leave: Vec::new(),
        }
    }

    pub fn entries(&self, category: Category) -> &[TimesheetEntry] {
        match category {
            Category::KraKpi => &self.kra_kpi,
            Category::Routine => &self.routine,
            Category::Initiative => &self.initiative,
            Category::Project => &self.project,
            Category::Onetime => &self.onetime,
            Category::Leave => &self.leave,
        }
    }

    pub fn entries_mut(&mut self, category: Category) -> &mut Vec<TimesheetEntry> {
        match category {
            Category::KraKpi => &mut self.kra_kpi,
            Category::Routine => &mut self.routine,
            Category::Initiative => &mut self.initiative,
            Category::Project => &mut self.project,
            Category::Onetime => &mut self.onetime,
            Category::Leave => &mut self.leave,
        }
    }
}

/// 集計期間（両端を含む）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// DD-MM-YYYY 形式の開始日・終了日から生成
    pub fn parse(start_date: &str, end_date: &str) -> Result<Self, ReportError> {
        let start = parse_request_date("start_date", start_date)?;
        let end = parse_request_date("end_date", end_date)?;
        if start > end {
            return Err(ReportError::Validation(format!(
                "start_date {} is after end_date {}",
                start_date, end_date
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// DD-MM-YYYY をパース（曖昧な値は補正せずエラー）
pub fn parse_request_date(field: &str, value: &str) -> Result<NaiveDate, ReportError> {
    let invalid = || {
        ReportError::Validation(format!(
            "{} must be a valid DD-MM-YYYY date, got '{}'",
            field, value
        ))
    };

    // chronoの%Yは桁数を問わないので、先に "DD-MM-YYYY" の形を確認
    let trimmed = value.trim();
    if !has_request_date_shape(trimmed) {
        return Err(invalid());
    }
    NaiveDate::parse_from_str(trimmed, REQUEST_DATE_FORMAT).map_err(|_| invalid())
}

fn has_request_date_shape(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            2 | 5 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}
