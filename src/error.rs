use std::{io, path::PathBuf};

use thiserror::Error;

use crate::declare::Source;

/// 抓取流程中會出現的錯誤種類
///
/// 端點與來源層級的錯誤會被記錄在 manifest 與 summary 中，
/// 只有 `Config` 與根目錄的 `Write` 會中止整個流程。
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to discover endpoints of {origin}: {reason}")]
    Discovery { origin: Source, reason: String },

    #[error("TLS certificate verification failed for {url}: {reason}")]
    TlsVerification { url: String, reason: String },

    #[error("{0}")]
    Fetch(String),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CrawlError {
    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CrawlError::Write {
            path: path.into(),
            source,
        }
    }
}
