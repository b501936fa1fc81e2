use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::fs;

use crate::{
    artifact::{self, index, FILELIST_FILE, MANIFEST_FILE},
    declare::Source,
    error::CrawlError,
    logging,
};

/// 依序嘗試的資料陣列鍵名
pub const RECORD_KEYS: [&str; 7] = [
    "data", "items", "records", "result", "results", "rows", "list",
];

/// 找出回應中的資料列
///
/// 最外層就是陣列時直接使用，否則依 `RECORD_KEYS` 的順序找第一個陣列；
/// 都找不到時回傳 None，由頁面改以鍵值方式顯示。
pub fn locate_records(value: &Value) -> Option<&Vec<Value>> {
    if let Value::Array(records) = value {
        return Some(records);
    }

    let object = value.as_object()?;
    RECORD_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_array))
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    pub generated_at: String,
    pub files: Vec<FileEntry>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub src: Source,
    pub file: String,
    pub summary: Option<String>,
    pub display: String,
    pub count: Option<usize>,
    #[serde(rename = "sizeKB")]
    pub size_kb: Option<f64>,
}

/// 掃描各來源目錄，產生 <root>/filelist.json
pub async fn generate(root: &Path, sources: &[Source]) -> Result<PathBuf, CrawlError> {
    let mut files = Vec::new();

    for source in sources {
        let dir = root.join(source.dir_name());
        if !dir.is_dir() {
            continue;
        }

        files.extend(scan(&dir, *source).await?);
    }

    let list = FileList {
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        files,
    };

    let path = root.join(FILELIST_FILE);
    artifact::write_json(&path, &list).await?;
    logging::info_file_async(format!(
        "filelist.json generated: {} ({} files)",
        path.display(),
        list.files.len()
    ));

    Ok(path)
}

async fn scan(dir: &Path, source: Source) -> Result<Vec<FileEntry>, CrawlError> {
    let summaries: HashMap<String, String> = index::read_manifest(dir)
        .await
        .unwrap_or_default()
        .into_iter()
        .filter_map(|e| Some((e.file?, e.summary?)))
        .collect();

    let mut names = Vec::new();
    let mut read_dir = fs::read_dir(dir)
        .await
        .map_err(|why| CrawlError::write(dir, why))?;

    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|why| CrawlError::write(dir, why))?
    {
        if let Some(name) = entry.file_name().to_str() {
            if name.to_ascii_lowercase().ends_with(".json") && name != MANIFEST_FILE {
                names.push(name.to_string());
            }
        }
    }
    names.sort();

    let mut entries = Vec::with_capacity(names.len());
    for name in names {
        let path = dir.join(&name);
        let size_kb = fs::metadata(&path)
            .await
            .ok()
            .map(|m| (m.len() as f64 / 1024.0 * 10.0).round() / 10.0);
        let count = fs::read(&path)
            .await
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
            .and_then(|value| locate_records(&value).map(Vec::len));
        let summary = summaries.get(&name).cloned();
        let display = match &summary {
            Some(s) => format!("{} ({})", s, name),
            None => name.clone(),
        };

        entries.push(FileEntry {
            src: source,
            file: name,
            summary,
            display,
            count,
            size_kb,
        });
    }

    Ok(entries)
}
