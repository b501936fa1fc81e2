use std::{
    collections::BTreeMap,
    error::Error as StdError,
    io,
    time::Instant,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use once_cell::sync::{Lazy, OnceCell};
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Client, Response,
};

use crate::{config::Http, error::CrawlError, logging::Logger, util};

pub mod user_agent;

static LOGGER: Lazy<Logger> = Lazy::new(|| Logger::new("http"));

/// 一次 GET 的回應內容
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub status: u16,
    /// 標頭名稱皆為小寫並排序
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// 是否關閉憑證驗證後才取得回應
    pub verify_fallback_used: bool,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 對外發出 GET 請求的介面
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn get(&self, url: &str) -> Result<Reply, CrawlError>;
}

/// 一次執行期間共用的 HTTP 連線設定
///
/// 憑證驗證失敗時只會以關閉驗證的 client 重試一次，
/// 並在 `Reply::verify_fallback_used` 標記。
pub struct HttpSession {
    secure: Client,
    insecure: OnceCell<Client>,
    settings: Http,
    headers: HeaderMap,
    user_agent: String,
}

impl HttpSession {
    pub fn new(settings: &Http) -> Result<Self> {
        util::ensure_rustls_crypto_provider();

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        if !settings.authorization.is_empty() {
            let mut value = HeaderValue::from_str(&settings.authorization)
                .map_err(|why| anyhow!("Invalid authorization header because {:?}", why))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let user_agent = if settings.user_agent.is_empty() {
            user_agent::gen_random_ua()
        } else {
            settings.user_agent.clone()
        };

        let secure = build_client(settings, &headers, &user_agent, false)?;

        Ok(HttpSession {
            secure,
            insecure: OnceCell::new(),
            settings: settings.clone(),
            headers,
            user_agent,
        })
    }

    /// 關閉憑證驗證的 client 只在需要時才建立
    fn insecure_client(&self) -> Result<&Client, CrawlError> {
        self.insecure.get_or_try_init(|| {
            build_client(&self.settings, &self.headers, &self.user_agent, true)
                .map_err(|why| CrawlError::Fetch(format!("{:?}", why)))
        })
    }

    async fn read(
        &self,
        url: &str,
        response: Response,
        verify_fallback_used: bool,
        start: Instant,
    ) -> Result<Reply, CrawlError> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect::<BTreeMap<String, String>>();

        let body = response.bytes().await.map_err(|why| {
            LOGGER.error(format!("GET:{} failed to read body because {:?}", url, why));
            CrawlError::Fetch(describe(&why))
        })?;

        LOGGER.info(format!(
            "GET:{} {} {} bytes {} ms{}",
            url,
            status,
            body.len(),
            start.elapsed().as_millis(),
            if verify_fallback_used {
                " (verify disabled)"
            } else {
                ""
            }
        ));

        Ok(Reply {
            status,
            headers,
            body: body.to_vec(),
            verify_fallback_used,
        })
    }
}

#[async_trait]
impl Fetch for HttpSession {
    async fn get(&self, url: &str) -> Result<Reply, CrawlError> {
        let start = Instant::now();

        match self.secure.get(url).send().await {
            Ok(response) => self.read(url, response, false, start).await,
            Err(why) if is_tls_verification_error(&why) => {
                if !self.settings.insecure_fallback {
                    return Err(CrawlError::TlsVerification {
                        url: url.to_string(),
                        reason: describe(&why),
                    });
                }

                LOGGER.warn(format!(
                    "GET:{} certificate verification failed, retry without it. because {:?}",
                    url, why
                ));

                let client = self.insecure_client()?;
                match client.get(url).send().await {
                    Ok(response) => self.read(url, response, true, start).await,
                    Err(why) => {
                        LOGGER.error(format!(
                            "GET:{} failed again with verification disabled because {:?}",
                            url, why
                        ));
                        Err(CrawlError::Fetch(describe(&why)))
                    }
                }
            }
            Err(why) => {
                LOGGER.error(format!(
                    "GET:{} failed because {:?}. {} ms",
                    url,
                    why,
                    start.elapsed().as_millis()
                ));
                Err(CrawlError::Fetch(describe(&why)))
            }
        }
    }
}

fn build_client(
    settings: &Http,
    headers: &HeaderMap,
    user_agent: &str,
    accept_invalid_certs: bool,
) -> Result<Client> {
    Client::builder()
        // ===== 壓縮 =====
        .brotli(true)
        .gzip(true)
        .zstd(true)
        // ===== 超時設置 =====
        .connect_timeout(settings.connect_timeout())
        .timeout(settings.timeout())
        .tcp_nodelay(true)
        .redirect(reqwest::redirect::Policy::limited(5))
        // ===== Headers =====
        .user_agent(user_agent)
        .default_headers(headers.clone())
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .map_err(|e| anyhow!("Failed to create reqwest client: {:?}", e))
}

/// 將 reqwest 的錯誤轉成寫在 manifest 的簡短說明
fn describe(why: &reqwest::Error) -> String {
    if why.is_timeout() {
        format!("request timed out: {}", why)
    } else if why.is_connect() {
        format!("connection failed: {}", why)
    } else {
        why.to_string()
    }
}

/// 沿著錯誤鏈判斷是否為憑證驗證失敗
pub fn is_tls_verification_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);

    while let Some(e) = current {
        if let Some(tls) = e.downcast_ref::<rustls::Error>() {
            if matches!(tls, rustls::Error::InvalidCertificate(_)) {
                return true;
            }
        }

        // io::Error::source 會略過自身包裝的錯誤，需另外檢查
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if let Some(inner) = io_err.get_ref() {
                if is_tls_verification_error(inner) {
                    return true;
                }
            }
        }

        let text = e.to_string().to_ascii_lowercase();
        if text.contains("invalid peer certificate") || text.contains("certificate verify failed")
        {
            return true;
        }

        current = e.source();
    }

    false
}
