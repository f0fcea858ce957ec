use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

use crate::db::DataSourceError;
use crate::error::ReportError;
use crate::timesheet_data::{
    Category, DateRange, Employee, EmployeeSummary, EmployeeTimesheetRecord, EmploymentStatus,
    TimesheetEntry,
};

/// タイムシートの取得元（本番はMySQL、テストはメモリ上のデータ）
pub trait TimesheetSource: Send + Sync {
    /// 在籍中（status = 1）の従業員ID
    fn active_employee_ids(&self) -> Result<Vec<i64>, DataSourceError>;

    /// 従業員情報をまとめて取得
    fn employees_by_ids(&self, ids: &[i64]) -> Result<Vec<Employee>, DataSourceError>;

    /// 指定区分の有効行を期間で絞り込み、従業員ごとに日付降順で返す
    fn entries(
        &self,
        category: Category,
        emp_ids: &[i64],
        range: &DateRange,
    ) -> Result<Vec<TimesheetEntry>, DataSourceError>;
}

/// レポート出力形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Excel,
}

impl ReportFormat {
    /// "Excel" の完全一致のみExcel扱い
    pub fn from_report_type(report_type: Option<&str>) -> Self {
        match report_type {
            Some("Excel") => ReportFormat::Excel,
            _ => ReportFormat::Json,
        }
    }
}

/// レポート生成リクエスト
#[derive(Debug, Default, Deserialize)]
pub struct ReportRequest {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub report_type: Option<String>,
}

impl ReportRequest {
    /// 開始日・終了日を検証して期間に変換
    pub fn date_range(&self) -> Result<DateRange, ReportError> {
        let start = self.start_date.as_deref().filter(|s| !s.is_empty());
        let end = self.end_date.as_deref().filter(|s| !s.is_empty());

        match (start, end) {
            (Some(start), Some(end)) => DateRange::parse(start, end),
            _ => Err(ReportError::Validation(
                "Start and end date required".to_string(),
            )),
        }
    }

    pub fn format(&self) -> ReportFormat {
        ReportFormat::from_report_type(self.report_type.as_deref())
    }
}

/// 在籍従業員ごとに6区分のタイムシートを集計
/// どれか1つのクエリが失敗したら全体をエラーにする
pub fn build_report(
    source: &dyn TimesheetSource,
    range: &DateRange,
) -> Result<Vec<EmployeeTimesheetRecord>, ReportError> {
    let ids = source.active_employee_ids()?;
    if ids.is_empty() {
        info!("No active employees");
        return Ok(Vec::new());
    }

    let mut employees: Vec<Employee> = source
        .employees_by_ids(&ids)?
        .into_iter()
        .filter(|e| e.status == EmploymentStatus::Active)
        .collect();
    employees.sort_by_key(|e| e.id);

    let mut records: Vec<EmployeeTimesheetRecord> = employees
        .iter()
        .map(|e| EmployeeTimesheetRecord::new(EmployeeSummary::from(e)))
        .collect();
    let index: HashMap<i64, usize> = employees
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id, i))
        .collect();
    let emp_ids: Vec<i64> = employees.iter().map(|e| e.id).collect();

    for category in Category::ALL {
        for entry in source.entries(category, &emp_ids, range)? {
            if !range.contains(entry.date) {
                continue;
            }
            if let Some(&i) = index.get(&entry.emp_id) {
                records[i].entries_mut(category).push(entry);
            }
        }
    }

    info!(
        "Built timesheet report for {} employees ({} to {})",
        records.len(),
        range.start,
        range.end
    );
    Ok(records)
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;

    /// テスト用のメモリ上データ
    #[derive(Default)]
    pub struct InMemorySource {
        pub users: Vec<(Employee, i64)>, // (従業員, statusフラグ)
        pub tables: HashMap<Category, Vec<(TimesheetEntry, bool)>>, // (行, 有効フラグ)
        pub fail_on: Option<Category>,
    }

    impl InMemorySource {
        pub fn add_user(&mut self, employee: Employee, status: i64) {
            self.users.push((employee, status));
        }

        pub fn add_entry(&mut self, category: Category, entry: TimesheetEntry, active: bool) {
            self.tables.entry(category).or_default().push((entry, active));
        }
    }

    impl TimesheetSource for InMemorySource {
        fn active_employee_ids(&self) -> Result<Vec<i64>, DataSourceError> {
            let mut ids: Vec<i64> = self
                .users
                .iter()
                .filter(|(_, status)| *status == 1)
                .map(|(e, _)| e.id)
                .collect();
            ids.sort();
            Ok(ids)
        }

        fn employees_by_ids(&self, ids: &[i64]) -> Result<Vec<Employee>, DataSourceError> {
            Ok(self
                .users
                .iter()
                .filter(|(e, _)| ids.contains(&e.id))
                .map(|(e, status)| Employee {
                    status: EmploymentStatus::from_flag(*status),
                    ..e.clone()
                })
                .collect())
        }

        fn entries(
            &self,
            category: Category,
            emp_ids: &[i64],
            range: &DateRange,
        ) -> Result<Vec<TimesheetEntry>, DataSourceError> {
            if self.fail_on == Some(category) {
                return Err(DataSourceError::Column {
                    column: "date",
                    value: format!("{} table unavailable", category.table_name()),
                });
            }

            let mut rows: Vec<TimesheetEntry> = self
                .tables
                .get(&category)
                .map(|rows| {
                    rows.iter()
                        .filter(|(entry, active)| {
                            *active
                                && emp_ids.contains(&entry.emp_id)
                                && range.contains(entry.date)
                        })
                        .map(|(entry, _)| entry.clone())
                        .collect()
                })
                .unwrap_or_default();
            rows.sort_by(|a, b| {
                a.emp_id
                    .cmp(&b.emp_id)
                    .then(b.date.cmp(&a.date))
                    .then(b.id.cmp(&a.id))
            });
            Ok(rows)
        }
    }

    pub fn employee(id: i64, first_name: &str, last_name: &str) -> Employee {
        Employee {
            id,
            emp_code: Some(format!("E{:03}", id)),
            first_name: first_name.to_string(),
            middle_name: None,
            last_name: last_name.to_string(),
            designation_id: Some(10),
            department_id: Some(20),
            plant_id: Some(30),
            band_id: Some(2),
            reporting_manager: None,
            status: EmploymentStatus::Active,
        }
    }

    pub fn entry(id: i64, emp_id: i64, date: &str, duration: &str) -> TimesheetEntry {
        TimesheetEntry {
            id,
            emp_id,
            date: chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            duration: Some(serde_json::from_str(duration).unwrap()),
            remark: Some(format!("remark {}", id)),
            bms_parameter: None,
            updated_at: None,
        }
    }

    /// 在籍1名・routine 1件のデータ
    pub fn single_routine_source() -> InMemorySource {
        let mut source = InMemorySource::default();
        source.add_user(employee(1, "Asha", "Rao"), 1);
        source.add_entry(Category::Routine, entry(100, 1, "2024-01-15", "8"), true);
        source
    }
}
