use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::primitives::pager::BufferCache;
use crate::storage::{dir_page, heap, meta};
use crate::types::{PageId, Result};

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Worth knowing, not a defect.
    Info,
    /// Structural defect.
    Error,
}

/// A single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

impl VerifyFinding {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Error,
            message: message.into(),
        }
    }

    fn info(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Info,
            message: message.into(),
        }
    }
}

/// One directory page visited while walking the chain.
#[derive(Clone, Debug, Serialize)]
pub struct ChainPage {
    /// Page number.
    pub page: u64,
    /// Page LSN.
    pub lsn: u64,
    /// Live entries on the page.
    pub entries: usize,
    /// Bytes free after compaction.
    pub free_space: usize,
    /// `prev` link from the trailer.
    pub prev: Option<u64>,
    /// `next` link from the trailer.
    pub next: Option<u64>,
}

/// Result of walking the directory chain from the metadata page.
#[derive(Clone, Debug, Serialize)]
pub struct ChainReport {
    /// Metadata page consulted.
    pub meta_page: u64,
    /// Head recorded on the metadata page.
    pub first_used: Option<u64>,
    /// Tail recorded on the metadata page.
    pub last_used: Option<u64>,
    /// Pages in chain order.
    pub pages: Vec<ChainPage>,
    /// Everything that looked wrong.
    pub findings: Vec<VerifyFinding>,
    /// True when no error-level finding was recorded.
    pub success: bool,
}

/// Walks the chain from the metadata page, checking every link in both directions.
pub fn verify_chain(cache: &BufferCache, meta_page: PageId) -> Result<ChainReport> {
    let mut report = ChainReport {
        meta_page: meta_page.0,
        first_used: None,
        last_used: None,
        pages: Vec::new(),
        findings: Vec::new(),
        success: false,
    };
    let Some(anchor) = cache.read(meta_page)? else {
        report
            .findings
            .push(VerifyFinding::error(format!("metadata page {meta_page} missing")));
        return Ok(report);
    };
    let state = match meta::read(anchor.data()) {
        Ok(state) => state,
        Err(err) => {
            report.findings.push(VerifyFinding::error(format!(
                "metadata page {meta_page} unreadable: {err}"
            )));
            return Ok(report);
        }
    };
    drop(anchor);
    report.first_used = state.first_used.map(|p| p.0);
    report.last_used = state.last_used.map(|p| p.0);

    if state.first_used.is_none() != state.last_used.is_none() {
        report.findings.push(VerifyFinding::error(
            "metadata anchors disagree about whether the chain is empty",
        ));
    }
    if state.is_empty() {
        report.findings.push(VerifyFinding::info("directory chain is empty"));
    }

    let mut visited = HashSet::new();
    let mut expected_prev: Option<PageId> = None;
    let mut cursor = state.first_used;
    while let Some(current) = cursor {
        if !visited.insert(current) {
            report
                .findings
                .push(VerifyFinding::error(format!("cycle detected at page {current}")));
            break;
        }
        let Some(page) = cache.read(current)? else {
            report
                .findings
                .push(VerifyFinding::error(format!("chain page {current} missing")));
            break;
        };
        let data = page.data();
        let visit = dir_page::trailer(data).and_then(|trailer| {
            Ok(ChainPage {
                page: current.0,
                lsn: page.lsn().0,
                entries: dir_page::entry_count(data)?,
                free_space: dir_page::free_space(data)?,
                prev: trailer.prev.map(|p| p.0),
                next: trailer.next.map(|p| p.0),
            })
        });
        let visit = match visit {
            Ok(visit) => visit,
            Err(err) => {
                report.findings.push(VerifyFinding::error(format!(
                    "chain page {current} is not a valid directory page: {err}"
                )));
                break;
            }
        };
        if visit.prev != expected_prev.map(|p| p.0) {
            report.findings.push(VerifyFinding::error(format!(
                "page {current} prev link {:?} does not match predecessor {:?}",
                visit.prev,
                expected_prev.map(|p| p.0)
            )));
        }
        let next = visit.next.map(PageId);
        report.pages.push(visit);
        if next.is_none() && state.last_used != Some(current) {
            report.findings.push(VerifyFinding::error(format!(
                "chain ends at page {current} but metadata tail is {:?}",
                report.last_used
            )));
        }
        expected_prev = Some(current);
        cursor = next;
    }

    report.success = report
        .findings
        .iter()
        .all(|finding| finding.severity != VerifySeverity::Error);
    debug!(
        pages = report.pages.len(),
        findings = report.findings.len(),
        success = report.success,
        "admin.verify_chain"
    );
    Ok(report)
}

/// Result of checking one data page's back-reference.
#[derive(Clone, Debug, Serialize)]
pub struct BackReferenceReport {
    /// Data page checked.
    pub data_page: u64,
    /// Directory page the back-reference names.
    pub dir_page: Option<u64>,
    /// Offset the back-reference names.
    pub offset: Option<u16>,
    /// True when the reference is absent or names a live entry.
    pub valid: bool,
    /// Explanation when `valid` is false.
    pub message: Option<String>,
}

/// Checks that a data page's back-reference, if any, names a live directory entry.
pub fn verify_back_reference(cache: &BufferCache, data_page: PageId) -> Result<BackReferenceReport> {
    let mut report = BackReferenceReport {
        data_page: data_page.0,
        dir_page: None,
        offset: None,
        valid: false,
        message: None,
    };
    let location = {
        let Some(page) = cache.read(data_page)? else {
            report.message = Some(format!("data page {data_page} missing"));
            return Ok(report);
        };
        match heap::back_reference(page.data()) {
            Ok(location) => location,
            Err(err) => {
                report.message = Some(format!("data page {data_page} unreadable: {err}"));
                return Ok(report);
            }
        }
    };
    let Some(location) = location else {
        report.valid = true;
        return Ok(report);
    };
    report.dir_page = Some(location.page.0);
    report.offset = Some(location.offset.0);
    let Some(dir) = cache.read(location.page)? else {
        report.message = Some(format!("directory page {} missing", location.page));
        return Ok(report);
    };
    match dir_page::entry(dir.data(), location.offset) {
        Ok(Some(_)) => report.valid = true,
        Ok(None) => {
            report.message = Some(format!(
                "offset {} on directory page {} holds no live entry",
                location.offset, location.page
            ))
        }
        Err(err) => {
            report.message = Some(format!(
                "directory page {} unreadable: {err}",
                location.page
            ))
        }
    }
    Ok(report)
}
