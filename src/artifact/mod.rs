use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;

use crate::error::CrawlError;

/// 給展示頁面用的檔案清單
pub mod filelist;
/// manifest 與 summary
pub mod index;
/// 端點 path 轉為檔名
pub mod naming;
/// 寫入各端點的回應
pub mod writer;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SUMMARY_FILE: &str = "summary.json";
pub const FILELIST_FILE: &str = "filelist.json";

const TMP_SUFFIX: &str = ".tmp";

/// 先寫入同目錄的暫存檔再改名，中斷時不會留下寫到一半的 JSON
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CrawlError> {
    let tmp = tmp_path(path);

    if let Err(why) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(CrawlError::write(&tmp, why));
    }

    if let Err(why) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(CrawlError::write(path, why));
    }

    Ok(())
}

/// 以兩格縮排輸出 JSON（結尾換行）並寫入檔案
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CrawlError> {
    let mut bytes = serde_json::to_vec_pretty(value)
        .map_err(|why| CrawlError::write(path, std::io::Error::other(why)))?;
    bytes.push(b'\n');
    write_atomic(path, &bytes).await
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

pub(crate) fn is_tmp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(TMP_SUFFIX))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("GET_a.json");

        write_atomic(&path, b"[1]").await.unwrap();
        write_atomic(&path, b"[2]").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"[2]");
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_write_atomic_reports_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("GET_a.json");

        let err = write_atomic(&path, b"{}").await.unwrap_err();
        assert!(matches!(err, CrawlError::Write { .. }));
    }

    #[test]
    fn test_tmp_path() {
        let path = Path::new("swagger/twse/GET_a.json");
        assert_eq!(tmp_path(path), PathBuf::from("swagger/twse/GET_a.json.tmp"));
        assert!(is_tmp_file(&tmp_path(path)));
    }
}
