use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::artifact::MANIFEST_FILE;

/// 檔名長度上限（含副檔名）
pub const MAX_NAME_LEN: usize = 120;

const PREFIX: &str = "GET_";
const EXTENSION: &str = ".json";

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9A-Za-z._-]+").expect("valid file name pattern"));

/// path 的 SHA-256 前 8 碼
pub fn short_hash(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    hex::encode(&digest[..4])
}

/// 由 path 推得的檔名，不處理同名衝突
///
/// "/opendata/t187ap03_L" => "GET_opendata_t187ap03_L.json"
pub fn base_name(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    let mut stem = UNSAFE_CHARS.replace_all(trimmed, "_").to_string();
    if stem.is_empty() {
        stem = "root".to_string();
    }

    let name = format!("{}{}{}", PREFIX, stem, EXTENSION);
    if name.len() <= MAX_NAME_LEN {
        return name;
    }

    // 過長時截斷並附上雜湊，保持唯一
    let keep = MAX_NAME_LEN - EXTENSION.len() - 9;
    let full_stem = format!("{}{}", PREFIX, stem);
    format!("{}_{}{}", &full_stem[..keep], short_hash(path), EXTENSION)
}

fn with_hash(name: &str, path: &str) -> String {
    let stem = name.strip_suffix(EXTENSION).unwrap_or(name);
    format!("{}_{}{}", stem, short_hash(path), EXTENSION)
}

/// 同一個來源內分配不重複的檔名
///
/// 先出現的端點取得原始檔名，之後撞名的端點在副檔名前加上 path 的雜湊。
#[derive(Debug)]
pub struct NameAllocator {
    taken: HashSet<String>,
}

impl Default for NameAllocator {
    fn default() -> Self {
        let mut taken = HashSet::new();
        taken.insert(MANIFEST_FILE.to_string());
        NameAllocator { taken }
    }
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, path: &str) -> String {
        let mut name = base_name(path);

        if self.taken.contains(&name) {
            name = with_hash(&name, path);
        }

        let mut serial = 2;
        while self.taken.contains(&name) {
            let stem = base_name(path);
            let stem = stem.strip_suffix(EXTENSION).unwrap_or(&stem).to_string();
            name = format!("{}_{}_{}{}", stem, short_hash(path), serial, EXTENSION);
            serial += 1;
        }

        self.taken.insert(name.clone());
        name
    }
}
