use serde_json::Value;
use url::Url;

use crate::{
    declare::Source,
    error::CrawlError,
    util::http::Fetch,
};

/// path / query 參數的展開與代入
pub mod parameter;

/// 文件中可以直接呼叫的 GET 端點
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub source: Source,
    /// 文件上宣告的 path（未代入參數）
    pub path: String,
    /// 實際請求的完整網址
    pub url: String,
    pub operation_id: Option<String>,
    pub summary: Option<String>,
}

/// 因缺少參數值而無法呼叫的端點
#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub base_url: String,
    /// 依文件宣告順序排列
    pub endpoints: Vec<Endpoint>,
    pub skipped: Vec<Skipped>,
}

/// 下載 swagger 文件並列出可呼叫的 GET 端點
pub async fn visit<F: Fetch + ?Sized>(
    fetcher: &F,
    source: Source,
    swagger_url: &str,
) -> Result<Discovery, CrawlError> {
    let discovery_error = |reason: String| CrawlError::Discovery {
        origin: source,
        reason,
    };

    let reply = fetcher
        .get(swagger_url)
        .await
        .map_err(|why| discovery_error(why.to_string()))?;

    if !reply.is_success() {
        return Err(discovery_error(format!(
            "{} responded with HTTP {}",
            swagger_url, reply.status
        )));
    }

    let doc = serde_json::from_slice::<Value>(&reply.body).map_err(|why| {
        discovery_error(format!("{} is not valid JSON: {}", swagger_url, why))
    })?;

    parse_document(source, swagger_url, &doc)
}

/// 解析 swagger / OpenAPI 文件
pub fn parse_document(
    source: Source,
    swagger_url: &str,
    doc: &Value,
) -> Result<Discovery, CrawlError> {
    let paths = doc
        .get("paths")
        .and_then(Value::as_object)
        .ok_or_else(|| CrawlError::Discovery {
            origin: source,
            reason: format!("{} has no paths object", swagger_url),
        })?;

    let base_url = base_url(doc, swagger_url);
    let mut discovery = Discovery {
        base_url: base_url.clone(),
        endpoints: Vec::with_capacity(paths.len()),
        skipped: Vec::new(),
    };

    for (path, item) in paths {
        let Some(operation) = item.get("get").filter(|op| op.is_object()) else {
            continue;
        };

        let params = parameter::collect(doc, item, operation);
        match parameter::build_target(path, &params) {
            Ok(target) => {
                let mut url = format!("{}{}", base_url, ensure_leading_slash(&target.path));
                if !target.query.is_empty() {
                    url.push('?');
                    url.push_str(&target.query_string());
                }

                discovery.endpoints.push(Endpoint {
                    source,
                    path: path.clone(),
                    url,
                    operation_id: text_field(operation, "operationId"),
                    summary: text_field(operation, "summary"),
                });
            }
            Err(reason) => discovery.skipped.push(Skipped {
                path: path.clone(),
                reason,
            }),
        }
    }

    Ok(discovery)
}

/// 決定端點的根網址
///
/// OpenAPI 3 取 servers[0].url；Swagger 2 組合 schemes/host/basePath；
/// 都沒有時以 swagger 文件位置去掉 /swagger.json 為準。
pub fn base_url(doc: &Value, swagger_url: &str) -> String {
    let server = doc
        .get("servers")
        .and_then(Value::as_array)
        .and_then(|servers| servers.first())
        .and_then(|server| server.get("url"))
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty());

    if let Some(server) = server {
        if let Some(url) = join(swagger_url, server) {
            return trim_slash(&url);
        }
    }

    let host = doc.get("host").and_then(Value::as_str).unwrap_or_default();
    let base_path = doc.get("basePath").and_then(Value::as_str).unwrap_or_default();

    if !host.is_empty() {
        let scheme = doc
            .get("schemes")
            .and_then(Value::as_array)
            .and_then(|schemes| schemes.first())
            .and_then(Value::as_str)
            .unwrap_or("https");
        return trim_slash(&format!("{}://{}{}", scheme, host, base_path));
    }

    if !base_path.is_empty() {
        if let Some(url) = join(swagger_url, base_path) {
            return trim_slash(&url);
        }
    }

    let location = swagger_url.strip_suffix("/swagger.json").unwrap_or(swagger_url);
    trim_slash(location)
}

fn join(base: &str, reference: &str) -> Option<String> {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return Some(reference.to_string());
    }

    Url::parse(base)
        .and_then(|base| base.join(reference))
        .map(|url| url.to_string())
        .ok()
}

fn trim_slash(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

fn text_field(operation: &Value, key: &str) -> Option<String> {
    operation
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
