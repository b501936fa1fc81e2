use std::{
    collections::{BTreeMap, HashSet},
    io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    artifact::{self, MANIFEST_FILE, SUMMARY_FILE},
    crawler::executor::FetchResult,
    declare::{FetchStatus, Source},
    error::CrawlError,
    logging,
};

fn is_false(value: &bool) -> bool {
    !*value
}

/// manifest.json 中的一筆，對應一個有發出請求的端點
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// 只有成功的端點才有檔案
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub path: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub status: FetchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub verify_fallback_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl ManifestEntry {
    pub fn from_result(result: &FetchResult, file: Option<String>) -> Self {
        ManifestEntry {
            file,
            path: result.endpoint.path.clone(),
            method: "GET".to_string(),
            operation_id: result.endpoint.operation_id.clone(),
            summary: result.endpoint.summary.clone(),
            status: result.status(),
            status_code: result.status_code,
            verify_fallback_used: result.verify_fallback_used,
            error: result.error.clone(),
            headers: result.headers.clone(),
        }
    }

    /// 寫檔失敗時改記為失敗
    pub fn into_write_failure(mut self, why: &CrawlError) -> Self {
        self.file = None;
        self.status = FetchStatus::Failure;
        self.error = Some(why.to_string());
        self
    }
}

/// summary.json 中的一筆，每個來源一筆
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SummaryRecord {
    pub source: Source,
    pub total: usize,
    pub success: usize,
    pub failure: usize,
    /// 因缺少參數值而未呼叫的端點數
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SummaryRecord {
    pub fn from_manifest(source: Source, entries: &[ManifestEntry], skipped: usize) -> Self {
        let success = entries
            .iter()
            .filter(|e| e.status == FetchStatus::Success)
            .count();

        SummaryRecord {
            source,
            total: entries.len(),
            success,
            failure: entries.len() - success,
            skipped,
            error: None,
        }
    }

    pub fn discovery_failed(source: Source, why: &CrawlError) -> Self {
        SummaryRecord {
            source,
            total: 0,
            success: 0,
            failure: 0,
            skipped: 0,
            error: Some(why.to_string()),
        }
    }
}

/// 來源的所有端點處理完後才寫入 manifest
pub async fn write_manifest(dir: &Path, entries: &[ManifestEntry]) -> Result<PathBuf, CrawlError> {
    let path = dir.join(MANIFEST_FILE);
    artifact::write_json(&path, entries).await?;
    Ok(path)
}

pub async fn read_manifest(dir: &Path) -> Option<Vec<ManifestEntry>> {
    let bytes = fs::read(dir.join(MANIFEST_FILE)).await.ok()?;
    match serde_json::from_slice::<Vec<ManifestEntry>>(&bytes) {
        Ok(entries) => Some(entries),
        Err(why) => {
            logging::warn_file_async(format!(
                "Failed to parse {} because {:?}",
                dir.join(MANIFEST_FILE).display(),
                why
            ));
            None
        }
    }
}

/// 所有來源處理完後才寫入 summary
pub async fn write_summary(root: &Path, records: &[SummaryRecord]) -> Result<PathBuf, CrawlError> {
    let path = root.join(SUMMARY_FILE);
    artifact::write_json(&path, records).await?;
    Ok(path)
}

/// 刪除 manifest 沒有提到的 JSON 檔與殘留的暫存檔
pub async fn prune_orphans(
    dir: &Path,
    entries: &[ManifestEntry],
) -> Result<Vec<PathBuf>, CrawlError> {
    let referenced: HashSet<&str> = entries.iter().filter_map(|e| e.file.as_deref()).collect();
    let mut removed = Vec::new();

    let mut read_dir = fs::read_dir(dir)
        .await
        .map_err(|why| CrawlError::write(dir, why))?;

    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|why| CrawlError::write(dir, why))?
    {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let is_orphan = name != MANIFEST_FILE
            && name.to_ascii_lowercase().ends_with(".json")
            && !referenced.contains(name);

        if is_orphan || artifact::is_tmp_file(&path) {
            remove_if_exists(&path).await?;
            removed.push(path);
        }
    }

    removed.sort();
    Ok(removed)
}

/// 來源探索失敗時清掉前次的 manifest 與所有產出，目錄本身保留
pub async fn clear_source(dir: &Path) -> Result<Vec<PathBuf>, CrawlError> {
    if !fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(Vec::new());
    }

    let mut removed = prune_orphans(dir, &[]).await?;
    let manifest = dir.join(MANIFEST_FILE);
    if remove_if_exists(&manifest).await? {
        removed.push(manifest);
        removed.sort();
    }

    Ok(removed)
}

pub async fn remove_if_exists(path: &Path) -> Result<bool, CrawlError> {
    match fs::remove_file(path).await {
        Ok(_) => Ok(true),
        Err(why) if why.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(why) => Err(CrawlError::write(path, why)),
    }
}
