//! Naming and discovery of the GST submitted tree.
//!
//! Layout: `<FY>/<BILL> BILLS SUBMITTED IN <SENT>/<file>`, for example
//! `2025-26/JUNE 2025 BILLS SUBMITTED IN JULY 2025/report.pdf`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::error::{CoreError, CoreResult};
use super::months::BillMonth;

static YEAR_FOLDER_RE: OnceLock<Option<Regex>> = OnceLock::new();
static SUBMISSION_FOLDER_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn year_folder_re() -> Option<&'static Regex> {
    YEAR_FOLDER_RE
        .get_or_init(|| Regex::new(r"^(\d{4})-(\d{2})$").ok())
        .as_ref()
}

fn submission_folder_re() -> Option<&'static Regex> {
    SUBMISSION_FOLDER_RE
        .get_or_init(|| {
            Regex::new(r"(?i)^([a-z]+)\s+(\d{4})\s+BILLS\s+SUBMITTED\s+IN\s+([a-z]+)\s+(\d{4})$").ok()
        })
        .as_ref()
}

/// The two directory names under the GST root that hold one submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderNames {
    pub year_folder: String,
    pub submission_folder: String,
}

impl FolderNames {
    /// The directory these names denote below `gst_root`.
    pub fn dir_in(&self, gst_root: &Path) -> PathBuf {
        gst_root.join(&self.year_folder).join(&self.submission_folder)
    }
}

/// `2025-26` for every month from April 2025 to March 2026.
pub fn financial_year_folder(sent: BillMonth) -> String {
    let start = sent.financial_year_start();
    format!("{}-{:02}", start, (start + 1) % 100)
}

pub fn derive_folder_names(sent: BillMonth, bill: BillMonth) -> FolderNames {
    FolderNames {
        year_folder: financial_year_folder(sent),
        submission_folder: format!(
            "{} {} BILLS SUBMITTED IN {} {}",
            bill.name(),
            bill.year(),
            sent.name(),
            sent.year()
        ),
    }
}

/// Parses `2025-26` into its starting year. The two-digit suffix must follow
/// the start year.
pub fn parse_year_folder(name: &str) -> Option<i32> {
    let caps = year_folder_re()?.captures(name.trim())?;
    let start: i32 = caps[1].parse().ok()?;
    let end: i32 = caps[2].parse().ok()?;
    ((start + 1) % 100 == end).then_some(start)
}

/// Parses a submission folder name into `(sent, bill)`.
pub fn parse_submission_folder(name: &str) -> Option<(BillMonth, BillMonth)> {
    let caps = submission_folder_re()?.captures(name.trim())?;
    let bill = BillMonth::from_name(&caps[1], caps[2].parse().ok()?)?;
    let sent = BillMonth::from_name(&caps[3], caps[4].parse().ok()?)?;
    Some((sent, bill))
}

/// The inverse of [`derive_folder_names`]. Rejects a pair whose year folder
/// is not the financial year of the sent month.
pub fn parse_folder_names(year_folder: &str, submission_folder: &str) -> Option<(BillMonth, BillMonth)> {
    let start = parse_year_folder(year_folder)?;
    let (sent, bill) = parse_submission_folder(submission_folder)?;
    (sent.financial_year_start() == start).then_some((sent, bill))
}

/// A file found in the submitted tree whose name is one of the candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GstMatch {
    pub file_name: String,
    pub submission_month: BillMonth,
    pub bill_month: BillMonth,
    pub path: PathBuf,
}

impl GstMatch {
    /// Later submissions win; a tie goes to the lexicographically last path.
    fn supersedes(&self, other: &GstMatch) -> bool {
        (self.submission_month, &self.path) > (other.submission_month, &other.path)
    }
}

/// Finds the submitted copy of every candidate file name below `gst_root`.
///
/// At most one match is returned per name. A missing or unreadable root is a
/// [`CoreError::Match`]; unreadable folders below it are logged and skipped.
pub async fn scan_submitted_folder(
    gst_root: &Path,
    candidates: &HashSet<String>,
) -> CoreResult<Vec<GstMatch>> {
    let root = gst_root.to_path_buf();
    let candidates = candidates.clone();
    tokio::task::spawn_blocking(move || scan_submitted_blocking(&root, &candidates)).await?
}

fn scan_submitted_blocking(root: &Path, candidates: &HashSet<String>) -> CoreResult<Vec<GstMatch>> {
    let year_entries = fs::read_dir(root).map_err(|source| CoreError::Match {
        path: root.to_path_buf(),
        source,
    })?;

    let mut best: HashMap<String, GstMatch> = HashMap::new();
    let mut folders_seen = 0usize;

    for year_entry in year_entries.filter_map(Result::ok) {
        let year_path = year_entry.path();
        if !year_path.is_dir() {
            continue;
        }
        let year_name = year_entry.file_name().to_string_lossy().to_string();
        let Some(fy_start) = parse_year_folder(&year_name) else {
            tracing::debug!("Skipping non financial-year folder {:?}", year_path);
            continue;
        };

        let submissions = match fs::read_dir(&year_path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Could not read GST year folder {:?}: {}", year_path, e);
                continue;
            }
        };

        for submission_entry in submissions.filter_map(Result::ok) {
            let submission_path = submission_entry.path();
            if !submission_path.is_dir() {
                continue;
            }
            let submission_name = submission_entry.file_name().to_string_lossy().to_string();
            let Some((sent, bill)) = parse_submission_folder(&submission_name) else {
                continue;
            };
            if sent.financial_year_start() != fy_start {
                tracing::warn!(
                    "Submission folder {:?} is filed under the wrong financial year {}",
                    submission_path,
                    year_name
                );
            }
            folders_seen += 1;
            collect_matches(&submission_path, sent, bill, candidates, &mut best);
        }
    }

    let mut matches: Vec<GstMatch> = best.into_values().collect();
    matches.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    tracing::info!(
        "Checked {} submission folders under {:?}: {} of {} candidates found",
        folders_seen,
        root,
        matches.len(),
        candidates.len()
    );
    Ok(matches)
}

fn collect_matches(
    dir: &Path,
    sent: BillMonth,
    bill: BillMonth,
    candidates: &HashSet<String>,
    best: &mut HashMap<String, GstMatch>,
) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Could not read submission folder {:?}: {}", dir, e);
            return;
        }
    };

    for entry in entries.filter_map(Result::ok) {
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().to_string();
        if !candidates.contains(&file_name) {
            continue;
        }
        let found = GstMatch {
            file_name: file_name.clone(),
            submission_month: sent,
            bill_month: bill,
            path: entry.path(),
        };
        match best.get(&file_name) {
            Some(current) if !found.supersedes(current) => {}
            _ => {
                best.insert(file_name, found);
            }
        }
    }
}
