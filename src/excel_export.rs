use chrono::Utc;
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::timesheet_data::{Category, EmployeeTimesheetRecord, TimesheetEntry};

pub const SHEET_NAME: &str = "Timesheet Report";

/// セル上限を超えた明細の続き（Emp Code, Category, Part, Entries）
pub const OVERFLOW_SHEET_NAME: &str = "Timesheet Overflow";

/// Excelの1セルあたりの文字数上限
const MAX_CELL_CHARS: usize = 32_767;

/// 区分列以外の見出しと列幅
const EMPLOYEE_COLUMNS: [(&str, f64); 6] = [
    ("Emp Code", 15.0),
    ("Full Name", 25.0),
    ("Designation", 20.0),
    ("Department", 20.0),
    ("Plant", 20.0),
    ("Job Status", 15.0),
];

const CATEGORY_COLUMN_WIDTH: f64 = 30.0;

/// Excel出力のエラー
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Excel write error: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{category} entry {entry_id} of employee {emp_code} is {chars} characters, over Excel's 32,767 character cell limit")]
    EntryTooLong {
        emp_code: String,
        category: &'static str,
        entry_id: i64,
        chars: usize,
    },
}

/// レポートをxlsxに書き出し、作成したファイルのパスを返す
/// 区分ごとの明細はJSON文字列として1セルに格納
/// 上限を超える分は Timesheet Overflow シートに続きを書く
pub fn write_report(dir: &Path, records: &[EmployeeTimesheetRecord]) -> Result<PathBuf, ExportError> {
    let mut worksheet = Worksheet::new();
    worksheet.set_name(SHEET_NAME)?;
    write_header(&mut worksheet)?;

    let mut overflow = OverflowSheet::new()?;
    for (i, record) in records.iter().enumerate() {
        write_record(&mut worksheet, &mut overflow, (i + 1) as u32, record)?;
    }

    let mut workbook = Workbook::new();
    workbook.push_worksheet(worksheet);
    if overflow.next_row > 1 {
        workbook.push_worksheet(overflow.worksheet);
    }

    let bytes = workbook.save_to_buffer()?;
    fs::create_dir_all(dir)?;
    let path = create_unique_file(dir, &bytes)?;

    info!("Timesheet report written: {} ({} rows)", path.display(), records.len());
    Ok(path)
}

fn write_header(worksheet: &mut Worksheet) -> Result<(), XlsxError> {
    let bold = Format::new().set_bold();
    let category_columns = Category::ALL
        .iter()
        .map(|c| (c.header(), CATEGORY_COLUMN_WIDTH));

    for (col, (header, width)) in EMPLOYEE_COLUMNS.into_iter().chain(category_columns).enumerate() {
        let col = col as u16;
        worksheet.write_string_with_format(0, col, header, &bold)?;
        worksheet.set_column_width(col, width)?;
    }
    worksheet.set_freeze_panes(1, 0)?;
    Ok(())
}

fn write_record(
    worksheet: &mut Worksheet,
    overflow: &mut OverflowSheet,
    row: u32,
    record: &EmployeeTimesheetRecord,
) -> Result<(), ExportError> {
    let employee = &record.employee;

    worksheet.write_string(row, 0, employee.emp_code.as_deref().unwrap_or(""))?;
    worksheet.write_string(row, 1, &employee.full_name)?;
    for (col, value) in [(2, employee.designation), (3, employee.department), (4, employee.plant)] {
        if let Some(id) = value {
            worksheet.write_number(row, col, id as f64)?;
        }
    }
    worksheet.write_string(row, 5, employee.job_status)?;

    let emp_code = employee.emp_code.as_deref().unwrap_or("");
    for (offset, category) in Category::ALL.iter().enumerate() {
        let mut parts = split_entries(emp_code, *category, record.entries(*category))?.into_iter();
        let first = parts.next().unwrap_or_else(|| "[]".to_string());
        worksheet.write_string(row, (EMPLOYEE_COLUMNS.len() + offset) as u16, &first)?;
        for (i, part) in parts.enumerate() {
            overflow.push(emp_code, *category, (i + 2) as u32, &part)?;
        }
    }
    Ok(())
}

/// 続きシート（1行目は見出し）
struct OverflowSheet {
    worksheet: Worksheet,
    next_row: u32,
}

impl OverflowSheet {
    fn new() -> Result<Self, XlsxError> {
        let mut worksheet = Worksheet::new();
        worksheet.set_name(OVERFLOW_SHEET_NAME)?;
        let bold = Format::new().set_bold();
        for (col, (header, width)) in [
            ("Emp Code", 15.0),
            ("Category", 15.0),
            ("Part", 8.0),
            ("Entries", 60.0),
        ]
        .into_iter()
        .enumerate()
        {
            let col = col as u16;
            worksheet.write_string_with_format(0, col, header, &bold)?;
            worksheet.set_column_width(col, width)?;
        }
        Ok(Self { worksheet, next_row: 1 })
    }

    fn push(&mut self, emp_code: &str, category: Category, part: u32, json: &str) -> Result<(), XlsxError> {
        let row = self.next_row;
        self.worksheet.write_string(row, 0, emp_code)?;
        self.worksheet.write_string(row, 1, category.key())?;
        self.worksheet.write_number(row, 2, part as f64)?;
        self.worksheet.write_string(row, 3, json)?;
        self.next_row += 1;
        Ok(())
    }
}

/// 明細をセル上限以内のJSON配列に分割（空なら "[]" 1つ）
fn split_entries(
    emp_code: &str,
    category: Category,
    entries: &[TimesheetEntry],
) -> Result<Vec<String>, ExportError> {
    let mut parts = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_chars = 2; // "[]"

    for entry in entries {
        let json = serde_json::to_string(entry)?;
        let chars = json.chars().count();
        if chars + 2 > MAX_CELL_CHARS {
            return Err(ExportError::EntryTooLong {
                emp_code: emp_code.to_string(),
                category: category.key(),
                entry_id: entry.id,
                chars,
            });
        }

        let separator = if current.is_empty() { 0 } else { 1 };
        if current_chars + separator + chars > MAX_CELL_CHARS {
            parts.push(format!("[{}]", current.join(",")));
            current.clear();
            current_chars = 2;
        }
        let separator = if current.is_empty() { 0 } else { 1 };
        current_chars += separator + chars;
        current.push(json);
    }

    if !current.is_empty() || parts.is_empty() {
        parts.push(format!("[{}]", current.join(",")));
    }
    Ok(parts)
}

/// timesheet_report_<ミリ秒>.xlsx を新規作成（同名があれば連番を付与）
fn create_unique_file(dir: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    let stamp = Utc::now().timestamp_millis();
    let mut attempt = 0u32;

    loop {
        let file_name = if attempt == 0 {
            format!("timesheet_report_{}.xlsx", stamp)
        } else {
            format!("timesheet_report_{}_{}.xlsx", stamp, attempt)
        };
        let path = dir.join(file_name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(bytes)?;
                return Ok(path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::build_report;
    use crate::report::testing::*;
    use crate::timesheet_data::{DateRange, TimesheetEntry};
    use calamine::{open_workbook, DataType, Reader, Xlsx};
    use tempfile::tempdir;

    fn cell_string(cell: &DataType) -> String {
        match cell {
            DataType::String(s) => s.clone(),
            DataType::Empty => String::new(),
            other => other.to_string(),
        }
    }

    fn sample_records() -> Vec<EmployeeTimesheetRecord> {
        let mut source = single_routine_source();
        source.add_user(employee(2, "Ravi", "Kumar"), 1);
        source.add_user(employee(3, "Old", "Timer"), 0);
        source.add_entry(Category::KraKpi, entry(400, 2, "2024-01-12", "2"), true);
        source.add_entry(Category::KraKpi, entry(401, 2, "2024-01-03", "1.5"), true);
        let range = DateRange::parse("01-01-2024", "31-01-2024").unwrap();
        build_report(&source, &range).unwrap()
    }

    #[test]
    fn test_write_report_rows() {
        let dir = tempdir().unwrap();
        let records = sample_records();
        let path = write_report(dir.path(), &records).unwrap();

        let mut workbook: Xlsx<_> = open_workbook(&path).unwrap();
        let range = workbook.worksheet_range(SHEET_NAME).unwrap().unwrap();
        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(cell_string).collect())
            .collect();

        assert_eq!(rows.len(), records.len() + 1);
        assert_eq!(rows[0][0], "Emp Code");
        assert_eq!(rows[0][6], "KRA/KPI");
        assert_eq!(rows[0][11], "Leave");
        assert_eq!(rows[1][0], "E001");
        assert_eq!(rows[1][1], "Asha Rao");
        assert_eq!(rows[2][5], "Active");

        for (record, row) in records.iter().zip(rows.iter().skip(1)) {
            for (offset, category) in Category::ALL.iter().enumerate() {
                let parsed: Vec<TimesheetEntry> = serde_json::from_str(&row[6 + offset]).unwrap();
                assert_eq!(parsed, record.entries(*category));
            }
        }
    }

    /// 1年分のroutineでセル上限を超えるデータ
    fn long_routine_record() -> EmployeeTimesheetRecord {
        let mut source = single_routine_source();
        let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for i in 0..365 {
            let date = start + chrono::Duration::days(i);
            let mut row = entry(1000 + i, 1, &date.format("%Y-%m-%d").to_string(), "8");
            row.remark = Some(format!("Daily line inspection and shift handover notes {}", i));
            source.add_entry(Category::Routine, row, true);
        }
        let range = DateRange::parse("01-01-2024", "31-12-2024").unwrap();
        build_report(&source, &range).unwrap().remove(0)
    }

    #[test]
    fn test_split_entries_under_cell_limit() {
        let record = long_routine_record();
        let parts = split_entries("E001", Category::Routine, &record.routine).unwrap();

        assert!(parts.len() > 1);
        assert!(parts.iter().all(|p| p.chars().count() <= MAX_CELL_CHARS));
        let joined: Vec<TimesheetEntry> = parts
            .iter()
            .flat_map(|p| serde_json::from_str::<Vec<TimesheetEntry>>(p).unwrap())
            .collect();
        assert_eq!(joined, record.routine);

        assert_eq!(split_entries("E001", Category::Leave, &[]).unwrap(), vec!["[]".to_string()]);
    }

    #[test]
    fn test_long_category_goes_to_overflow_sheet() {
        let dir = tempdir().unwrap();
        let record = long_routine_record();
        let path = write_report(dir.path(), std::slice::from_ref(&record)).unwrap();

        let mut workbook: Xlsx<_> = open_workbook(&path).unwrap();
        let main = workbook.worksheet_range(SHEET_NAME).unwrap().unwrap();
        assert_eq!(main.height(), 2);
        let first_cell = main.get_value((1, 7)).map(cell_string).unwrap();
        let mut routine: Vec<TimesheetEntry> = serde_json::from_str(&first_cell).unwrap();

        let overflow = workbook.worksheet_range(OVERFLOW_SHEET_NAME).unwrap().unwrap();
        for row in overflow.rows().skip(1) {
            assert_eq!(cell_string(&row[0]), "E001");
            assert_eq!(cell_string(&row[1]), "routine");
            let part: Vec<TimesheetEntry> = serde_json::from_str(&cell_string(&row[3])).unwrap();
            routine.extend(part);
        }
        assert_eq!(routine, record.routine);
    }

    #[test]
    fn test_no_overflow_sheet_for_short_report() {
        let dir = tempdir().unwrap();
        let path = write_report(dir.path(), &sample_records()).unwrap();
        let mut workbook: Xlsx<_> = open_workbook(&path).unwrap();
        assert!(workbook.worksheet_range(OVERFLOW_SHEET_NAME).is_none());
    }

    #[test]
    fn test_single_oversized_entry_is_reported() {
        let mut record = sample_records().remove(0);
        record.routine[0].remark = Some("x".repeat(MAX_CELL_CHARS));

        let dir = tempdir().unwrap();
        let err = write_report(dir.path(), &[record]).unwrap_err();
        assert!(matches!(
            err,
            ExportError::EntryTooLong { category: "routine", entry_id: 100, .. }
        ));
        assert!(err.to_string().contains("E001"));
    }

    #[test]
    fn test_write_report_creates_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("reports");
        let path = write_report(&nested, &[]).unwrap();

        assert!(path.starts_with(&nested));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("timesheet_report_"));
        assert!(name.ends_with(".xlsx"));
    }

    #[test]
    fn test_each_export_gets_new_file() {
        let dir = tempdir().unwrap();
        let records = sample_records();
        let first = write_report(dir.path(), &records).unwrap();
        let second = write_report(dir.path(), &records).unwrap();
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }
}
