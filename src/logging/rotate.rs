use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeDelta};

use crate::logging;

/// 單一日誌檔超過 10 MiB 就換下一個編號
const SEGMENT_LIMIT: u64 = 10 * 1024 * 1024;
/// 日誌保留 7 天
const KEEP_DAYS: i64 = 7;

/// 目前寫入中的日誌檔
struct Segment {
    /// 依日期展開後的檔名，例如 log/2025-02-03-http.log
    day_fn: String,
    /// 同一天內第幾個檔案，0 表示沒有編號
    seq: u32,
    written: u64,
    out: BufWriter<File>,
}

impl Segment {
    fn open(day_fn: String, seq: u32) -> Result<Self> {
        let path = segment_path(&day_fn, seq);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Segment {
            day_fn,
            seq,
            written,
            out: BufWriter::new(file),
        })
    }

    fn is_full(&self, incoming: usize, limit: u64) -> bool {
        self.written > 0 && self.written + incoming as u64 > limit
    }
}

/// 依日期切檔，同一天超過大小上限時以編號接續
pub struct Rotate {
    pattern: String,
    limit: u64,
    keep: TimeDelta,
    segment: Option<Segment>,
}

impl Rotate {
    /// pattern 為 chrono 格式字串，例如 "log/%Y-%m-%d-default.log"
    pub fn new(pattern: String) -> Self {
        Self::with_options(pattern, SEGMENT_LIMIT, KEEP_DAYS)
    }

    pub fn with_options(pattern: String, limit: u64, keep_days: i64) -> Self {
        Rotate {
            pattern,
            limit,
            keep: TimeDelta::try_days(keep_days).unwrap_or_else(|| TimeDelta::days(KEEP_DAYS)),
            segment: None,
        }
    }

    pub fn write_msg(&mut self, now: DateTime<Local>, msg: &[u8]) -> Result<()> {
        let day_fn = now.format(&self.pattern).to_string();

        let next = match self.segment.as_ref() {
            Some(seg) if seg.day_fn != day_fn => Some(0),
            Some(seg) if seg.is_full(msg.len(), self.limit) => Some(seg.seq + 1),
            Some(_) => None,
            None => Some(0),
        };

        if let Some(seq) = next {
            self.flush();
            let is_new_day = seq == 0;
            self.segment = Some(Segment::open(day_fn, seq)?);
            if is_new_day {
                self.purge_expired(now);
            }
        }

        match self.segment.as_mut() {
            Some(seg) => {
                seg.out.write_all(msg)?;
                seg.written += msg.len() as u64;
                Ok(())
            }
            None => Err(io::Error::other("no log segment is open").into()),
        }
    }

    pub fn flush(&mut self) {
        if let Some(seg) = self.segment.as_mut() {
            let _ = seg.out.flush();
        }
    }

    fn purge_expired(&self, now: DateTime<Local>) {
        let Some(seg) = self.segment.as_ref() else {
            return;
        };

        let dir = match Path::new(&seg.day_fn).parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let Ok(entries) = fs::read_dir(&dir) else {
            return;
        };

        let expire_before = SystemTime::from(now - self.keep);
        for path in entries.flatten().map(|e| e.path()) {
            if path.extension().and_then(|e| e.to_str()) != Some("log") {
                continue;
            }

            let expired = fs::metadata(&path)
                .and_then(|m| m.modified())
                .is_ok_and(|modified| modified < expire_before);

            if expired {
                if let Err(why) = fs::remove_file(&path) {
                    logging::error_console(format!(
                        "Failed to remove expired log {} because {:?}",
                        path.display(),
                        why
                    ));
                }
            }
        }
    }
}

impl Drop for Rotate {
    fn drop(&mut self) {
        self.flush();
    }
}

/// seq 為 0 時就是原檔名，其餘在副檔名前插入編號：app.log、app.1.log、app.2.log
fn segment_path(day_fn: &str, seq: u32) -> PathBuf {
    let path = Path::new(day_fn);
    if seq == 0 {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("log");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("log");
    path.with_file_name(format!("{}.{}.{}", stem, seq, ext))
}
