use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde_json::Value;

use crate::{
    crawler::openapi::Endpoint,
    declare::FetchStatus,
    util::http::{Fetch, Reply},
};

/// 單一端點的抓取結果，寫入檔案後即丟棄
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub endpoint: Endpoint,
    /// 有收到回應時的 HTTP 狀態碼
    pub status_code: Option<u16>,
    /// 僅在成功時保留原始回應內容
    pub body: Option<Vec<u8>>,
    pub headers: Option<BTreeMap<String, String>>,
    pub verify_fallback_used: bool,
    pub error: Option<String>,
    pub fetched_at: DateTime<Local>,
}

impl FetchResult {
    fn new(endpoint: Endpoint) -> Self {
        FetchResult {
            endpoint,
            status_code: None,
            body: None,
            headers: None,
            verify_fallback_used: false,
            error: None,
            fetched_at: Local::now(),
        }
    }

    pub fn status(&self) -> FetchStatus {
        if self.body.is_some() {
            FetchStatus::Success
        } else {
            FetchStatus::Failure
        }
    }
}

/// 對端點發出一次 GET；任何失敗都只記錄在結果中
pub async fn execute<F: Fetch + ?Sized>(
    fetcher: &F,
    endpoint: Endpoint,
    capture_headers: bool,
) -> FetchResult {
    let url = endpoint.url.clone();
    let mut result = FetchResult::new(endpoint);

    let reply = match fetcher.get(&url).await {
        Ok(reply) => reply,
        Err(why) => {
            result.error = Some(why.to_string());
            return result;
        }
    };

    let Reply {
        status,
        headers,
        body,
        verify_fallback_used,
    } = reply;

    result.status_code = Some(status);
    result.verify_fallback_used = verify_fallback_used;
    if capture_headers {
        result.headers = Some(headers);
    }

    if !(200..300).contains(&status) {
        result.error = Some(format!("HTTP {}", status));
        return result;
    }

    if let Err(why) = serde_json::from_slice::<Value>(&body) {
        result.error = Some(format!("response body is not JSON: {}", why));
        return result;
    }

    result.body = Some(body);
    result
}
