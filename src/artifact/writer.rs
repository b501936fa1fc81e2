use std::path::{Path, PathBuf};

use tokio::fs;

use crate::{
    artifact::{self, index, index::ManifestEntry, naming::NameAllocator},
    crawler::executor::FetchResult,
    declare::Source,
    error::CrawlError,
    logging,
};

/// 將單一來源的回應寫到 <root>/<source>/
pub struct ArtifactWriter {
    source: Source,
    dir: PathBuf,
    names: NameAllocator,
}

impl ArtifactWriter {
    /// 建立（或沿用）來源目錄
    pub async fn open(root: &Path, source: Source) -> Result<Self, CrawlError> {
        let dir = root.join(source.dir_name());
        fs::create_dir_all(&dir)
            .await
            .map_err(|why| CrawlError::write(&dir, why))?;

        Ok(ArtifactWriter {
            source,
            dir,
            names: NameAllocator::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 寫入一個端點的結果並回傳對應的 manifest 項目
    ///
    /// 每個端點都會分配檔名（失敗也一樣），讓檔名不受其他端點成敗影響；
    /// 失敗的端點會刪除前次留下的同名檔案。
    pub async fn write(&mut self, result: &FetchResult) -> ManifestEntry {
        let name = self.names.allocate(&result.endpoint.path);
        let path = self.dir.join(&name);

        let Some(body) = result.body.as_deref() else {
            if let Err(why) = index::remove_if_exists(&path).await {
                logging::error_file_async(format!("[{}] {:?}", self.source, why));
            }
            return ManifestEntry::from_result(result, None);
        };

        let entry = ManifestEntry::from_result(result, Some(name));
        match artifact::write_atomic(&path, body).await {
            Ok(_) => entry,
            Err(why) => {
                logging::error_file_async(format!("[{}] {:?}", self.source, why));
                if let Err(cleanup) = index::remove_if_exists(&path).await {
                    logging::error_file_async(format!("[{}] {:?}", self.source, cleanup));
                }
                entry.into_write_failure(&why)
            }
        }
    }
}
