//! The stock job body: sum one numeric column of a CSV file.
//!
//! Records are read one at a time. A row that is blank, too short, or whose
//! value does not parse as a finite number is skipped and left out of the
//! total; only failing to read or write a file fails the job.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::body::{BodyInput, BodyOutput, JobBody, Progress};
use crate::config::Settings;
use crate::error::JobFailure;

/// Progress is reported every this many data rows.
const PROGRESS_EVERY: u64 = 1000;

/// Header of the single column in a result artifact.
pub const RESULT_HEADER: &str = "Sum";

/// Verdict on a single data row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowOutcome {
    Value(f64),
    Skip,
}

/// Running aggregate over the rows of one file.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Tally {
    pub total: f64,
    /// Rows that contributed to `total`.
    pub summed: u64,
    /// Non-blank data rows seen.
    pub rows: u64,
}

impl Tally {
    pub fn accept(&mut self, outcome: RowOutcome) {
        self.rows += 1;
        if let RowOutcome::Value(value) = outcome {
            self.total += value;
            self.summed += 1;
        }
    }
}

/// Classify a record by the field at `column`.
pub fn parse_row(fields: &[String], column: Option<usize>) -> RowOutcome {
    let raw = match column.and_then(|i| fields.get(i)) {
        Some(raw) => raw.trim(),
        None => return RowOutcome::Skip,
    };
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => RowOutcome::Value(value),
        _ => RowOutcome::Skip,
    }
}

/// Stream `path` and sum the column named `column`.
///
/// The first non-blank record is the header. A header without `column`
/// means every row is skipped and the total is 0. Quoted fields may span
/// lines. A total that overflows to infinity fails the job.
pub async fn sum_column(path: &Path, column: &str, progress: &Progress) -> Result<Tally, JobFailure> {
    let path = path.to_path_buf();
    let column = column.to_string();
    let progress = progress.clone();
    tokio::task::spawn_blocking(move || sum_records(&path, &column, &progress))
        .await
        .map_err(|e| JobFailure::Transient(format!("CSV reader task failed: {e}")))?
}

fn sum_records(path: &Path, column: &str, progress: &Progress) -> Result<Tally, JobFailure> {
    let file = std::fs::File::open(path).map_err(|e| JobFailure::Transient(format!("{}: {e}", path.display())))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut tally = Tally::default();
    let mut index: Option<Option<usize>> = None;
    let mut record = csv::ByteRecord::new();

    while reader
        .read_byte_record(&mut record)
        .map_err(|e| read_failure(path, e))?
    {
        // Undecodable bytes become replacement chars and fail the number parse.
        let fields: Vec<String> = record
            .iter()
            .map(|field| String::from_utf8_lossy(field).into_owned())
            .collect();
        if fields.iter().all(|field| field.trim().is_empty()) && fields.len() <= 1 {
            continue;
        }

        match index {
            None => {
                let found = fields
                    .iter()
                    .position(|name| name.trim().trim_start_matches('\u{feff}') == column);
                if found.is_none() {
                    tracing::debug!(path = %path.display(), column, "column not in header");
                }
                index = Some(found);
            }
            Some(column_index) => {
                tally.accept(parse_row(&fields, column_index));
                if tally.rows % PROGRESS_EVERY == 0 {
                    progress.report(format!("Processed {} rows", tally.rows));
                }
            }
        }
    }

    if !tally.total.is_finite() {
        return Err(JobFailure::Permanent(format!(
            "{}: column {column} sums to {}",
            path.display(),
            tally.total
        )));
    }
    Ok(tally)
}

fn read_failure(path: &Path, err: csv::Error) -> JobFailure {
    if err.is_io_error() {
        JobFailure::Transient(format!("{}: {err}", path.display()))
    } else {
        JobFailure::Permanent(format!("{}: {err}", path.display()))
    }
}

/// `<output_dir>/<input name without .csv><suffix>`.
pub fn result_path(input: &Path, output_dir: &Path, suffix: &str) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    let stem = name.strip_suffix(".csv").unwrap_or(&name);
    output_dir.join(format!("{stem}{suffix}"))
}

pub fn render_artifact(total: f64) -> String {
    format!("{RESULT_HEADER}\n{total}\n")
}

/// Read back the total stored in a result artifact.
pub async fn read_artifact_total(path: &Path) -> Result<f64, JobFailure> {
    let tally = sum_column(path, RESULT_HEADER, &Progress::detached()).await?;
    if tally.summed != 1 {
        return Err(JobFailure::Permanent(format!(
            "{} holds {} totals, expected 1",
            path.display(),
            tally.summed
        )));
    }
    Ok(tally.total)
}

/// Sums `value_column` and writes a one-cell result CSV.
#[derive(Debug, Clone)]
pub struct CsvSum {
    value_column: String,
    result_suffix: String,
    delay: Duration,
}

impl CsvSum {
    pub fn new(value_column: impl Into<String>, result_suffix: impl Into<String>) -> Self {
        Self {
            value_column: value_column.into(),
            result_suffix: result_suffix.into(),
            delay: Duration::ZERO,
        }
    }

    /// Wait this long before reading the input.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.value_column, &settings.result_suffix).with_delay(settings.processing_delay)
    }
}

impl Default for CsvSum {
    fn default() -> Self {
        Self::new("value", "_result.csv")
    }
}

impl JobBody for CsvSum {
    async fn run(&self, input: BodyInput<'_>, progress: Progress) -> Result<BodyOutput, JobFailure> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let tally = sum_column(input.input, &self.value_column, &progress).await?;
        tracing::debug!(
            job_id = input.job_id,
            total = tally.total,
            summed = tally.summed,
            rows = tally.rows,
            "column summed"
        );

        tokio::fs::create_dir_all(input.output_dir).await?;
        let artifact = result_path(input.input, input.output_dir, &self.result_suffix);
        tokio::fs::write(&artifact, render_artifact(tally.total)).await?;

        Ok(BodyOutput {
            artifact,
            summary: Some(format!("Summed {} of {} rows", tally.summed, tally.rows)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn parse_row_skips_garbage() {
        assert_eq!(parse_row(&fields(&["10"]), Some(0)), RowOutcome::Value(10.0));
        assert_eq!(parse_row(&fields(&[" 2.5 "]), Some(0)), RowOutcome::Value(2.5));
        assert_eq!(parse_row(&fields(&["", "5"]), Some(0)), RowOutcome::Skip);
        assert_eq!(parse_row(&fields(&["abc"]), Some(0)), RowOutcome::Skip);
        assert_eq!(parse_row(&fields(&["NaN"]), Some(0)), RowOutcome::Skip);
        assert_eq!(parse_row(&fields(&["inf"]), Some(0)), RowOutcome::Skip);
        assert_eq!(parse_row(&fields(&["1"]), Some(3)), RowOutcome::Skip);
        assert_eq!(parse_row(&fields(&["1"]), None), RowOutcome::Skip);
    }

    #[test]
    fn tally_counts_rows_and_values() {
        let mut tally = Tally::default();
        tally.accept(RowOutcome::Value(10.0));
        tally.accept(RowOutcome::Skip);
        tally.accept(RowOutcome::Value(7.0));
        assert_eq!(
            tally,
            Tally {
                total: 17.0,
                summed: 2,
                rows: 3
            }
        );
    }

    #[test]
    fn result_path_replaces_extension() {
        let out = Path::new("results");
        assert_eq!(
            result_path(Path::new("uploads/sales.csv"), out, "_result.csv"),
            PathBuf::from("results/sales_result.csv")
        );
        assert_eq!(
            result_path(Path::new("uploads/notes.txt"), out, "_result.csv"),
            PathBuf::from("results/notes.txt_result.csv")
        );
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("mixed.csv");
        std::fs::write(&input, "value\n10\n,5\n\nabc\n7").unwrap();

        let tally = sum_column(&input, "value", &Progress::detached()).await.unwrap();
        assert_eq!(tally.total, 17.0);
        assert_eq!(tally.summed, 2);
        assert_eq!(tally.rows, 4);
    }

    #[tokio::test]
    async fn named_column_among_others() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("wide.csv");
        std::fs::write(
            &input,
            "\u{feff}id,value,label\r\n1,1.5,a\r\n2,\"2,5\",b\r\n3,-0.5,\"c, d\"\r\n",
        )
        .unwrap();

        let tally = sum_column(&input, "value", &Progress::detached()).await.unwrap();
        assert_eq!(tally.total, 1.0);
        assert_eq!(tally.summed, 2);
    }

    #[tokio::test]
    async fn quoted_newline_stays_inside_its_record() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("notes.csv");
        std::fs::write(&input, "value,note\n5,\"x\n100,2\"\n").unwrap();

        let tally = sum_column(&input, "value", &Progress::detached()).await.unwrap();
        assert_eq!(tally.total, 5.0);
        assert_eq!(tally.summed, 1);
        assert_eq!(tally.rows, 1);
    }

    #[tokio::test]
    async fn overflowing_total_fails_permanently() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("huge.csv");
        std::fs::write(&input, "value\n1e308\n1e308\n").unwrap();

        let err = sum_column(&input, "value", &Progress::detached()).await.unwrap_err();
        assert!(matches!(err, JobFailure::Permanent(msg) if msg.contains("inf")));
    }

    #[tokio::test]
    async fn blank_and_whitespace_lines_are_not_rows() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("gaps.csv");
        std::fs::write(&input, "\n  \nvalue\n\n1\n   \n2\n").unwrap();

        let tally = sum_column(&input, "value", &Progress::detached()).await.unwrap();
        assert_eq!(tally.total, 3.0);
        assert_eq!(tally.rows, 2);
    }

    #[tokio::test]
    async fn missing_column_sums_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("other.csv");
        std::fs::write(&input, "amount\n1\n2\n").unwrap();

        let tally = sum_column(&input, "value", &Progress::detached()).await.unwrap();
        assert_eq!(tally.total, 0.0);
        assert_eq!(tally.summed, 0);
        assert_eq!(tally.rows, 2);
    }

    #[tokio::test]
    async fn empty_file_sums_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.csv");
        std::fs::write(&input, "").unwrap();

        let tally = sum_column(&input, "value", &Progress::detached()).await.unwrap();
        assert_eq!(tally, Tally::default());
    }

    #[tokio::test]
    async fn missing_input_is_transient_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = sum_column(&dir.path().join("gone.csv"), "value", &Progress::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, JobFailure::Transient(msg) if msg.contains("gone.csv")));
    }

    #[tokio::test]
    async fn progress_is_reported_while_reading() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("big.csv");
        let mut contents = String::from("value\n");
        for i in 0..2500 {
            contents.push_str(&format!("{i}\n"));
        }
        std::fs::write(&input, contents).unwrap();

        let (progress, mut rx) = Progress::channel();
        let tally = sum_column(&input, "value", &progress).await.unwrap();
        drop(progress);

        assert_eq!(tally.summed, 2500);
        let mut reports = Vec::new();
        while let Some(report) = rx.recv().await {
            reports.push(report);
        }
        assert_eq!(reports, vec!["Processed 1000 rows", "Processed 2000 rows"]);
    }

    #[tokio::test]
    async fn body_writes_artifact_that_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("sales.csv");
        let output_dir = dir.path().join("results");
        std::fs::write(&input, "value\n10\n,5\n\nabc\n7\n0.25\n").unwrap();

        let body = CsvSum::default();
        let body_input = BodyInput {
            job_id: "job-1",
            input: &input,
            output_dir: &output_dir,
        };

        let first = body.run(body_input, Progress::detached()).await.unwrap();
        assert_eq!(first.artifact, output_dir.join("sales_result.csv"));
        assert_eq!(first.summary.as_deref(), Some("Summed 3 of 5 rows"));
        let first_bytes = std::fs::read(&first.artifact).unwrap();
        assert_eq!(first_bytes, b"Sum\n17.25\n");

        assert_eq!(read_artifact_total(&first.artifact).await.unwrap(), 17.25);

        // Identical input, identical artifact.
        let second = body.run(body_input, Progress::detached()).await.unwrap();
        assert_eq!(std::fs::read(&second.artifact).unwrap(), first_bytes);
    }
}
