use std::{collections::HashSet, env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Result;
use config::{Config as config_config, File as config_file};
use serde::{Deserialize, Serialize};

use crate::{declare::Source, error::CrawlError, logging};

const CONFIG_PATH: &str = "app.json";

#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct App {
    #[serde(default)]
    pub swagger: Swagger,
    #[serde(default)]
    pub http: Http,
}

const SWAGGER_OUTPUT_DIR: &str = "SWAGGER_OUTPUT_DIR";
const SWAGGER_SOURCES: &str = "SWAGGER_SOURCES";
const SWAGGER_TWSE_URL: &str = "SWAGGER_TWSE_URL";
const SWAGGER_TPEX_URL: &str = "SWAGGER_TPEX_URL";
const SWAGGER_TAIFEX_URL: &str = "SWAGGER_TAIFEX_URL";
const SWAGGER_FILELIST: &str = "SWAGGER_FILELIST";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Swagger {
    /// 依序處理的資料來源
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceSetting>,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// 是否在 summary 之後產生 filelist.json
    #[serde(default = "default_true")]
    pub filelist: bool,
}

impl Default for Swagger {
    fn default() -> Self {
        Swagger {
            sources: default_sources(),
            output_dir: default_output_dir(),
            filelist: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SourceSetting {
    pub source: Source,
    #[serde(default)]
    pub url: String,
}

impl SourceSetting {
    pub fn new(source: Source) -> Self {
        SourceSetting {
            source,
            url: source.swagger_url().to_string(),
        }
    }

    /// 未設定 url 時使用預設的 swagger 位址
    pub fn swagger_url(&self) -> &str {
        if self.url.is_empty() {
            self.source.swagger_url()
        } else {
            &self.url
        }
    }
}

const HTTP_TIMEOUT_SECS: &str = "HTTP_TIMEOUT_SECS";
const HTTP_CONNECT_TIMEOUT_SECS: &str = "HTTP_CONNECT_TIMEOUT_SECS";
const HTTP_AUTHORIZATION: &str = "HTTP_AUTHORIZATION";
const HTTP_USER_AGENT: &str = "HTTP_USER_AGENT";
const HTTP_CAPTURE_HEADERS: &str = "HTTP_CAPTURE_HEADERS";
const HTTP_INSECURE_FALLBACK: &str = "HTTP_INSECURE_FALLBACK";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Http {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 需要授權的 API 自行填入，預設不帶任何憑證
    #[serde(default)]
    pub authorization: String,
    #[serde(default)]
    pub user_agent: String,
    /// 將回應標頭寫入 manifest
    #[serde(default)]
    pub capture_headers: bool,
    /// 憑證驗證失敗時是否以關閉驗證的方式重試一次（僅限公開資料）
    #[serde(default = "default_true")]
    pub insecure_fallback: bool,
}

impl Default for Http {
    fn default() -> Self {
        Http {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            authorization: String::new(),
            user_agent: String::new(),
            capture_headers: false,
            insecure_fallback: true,
        }
    }
}

impl Http {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_sources() -> Vec<SourceSetting> {
    Source::iterator().map(SourceSetting::new).collect()
}

fn default_output_dir() -> String {
    "./swagger".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    8
}

impl App {
    /// 讀取 app.json（若存在）並以環境變數覆蓋
    pub fn get() -> Result<Self> {
        let config_path = config_path();
        if config_path.exists() {
            let config: App = config_config::builder()
                .add_source(config_file::from(config_path))
                .build()?
                .try_deserialize()?;
            return Ok(config.override_with_env());
        }

        Ok(App::default().override_with_env())
    }

    /// 將來自於 env 的設定值覆蓋掉 json 上的設定值
    fn override_with_env(mut self) -> Self {
        if let Ok(dir) = env::var(SWAGGER_OUTPUT_DIR) {
            if !dir.is_empty() {
                self.swagger.output_dir = dir;
            }
        }

        if let Ok(list) = env::var(SWAGGER_SOURCES) {
            let mut sources = Vec::with_capacity(3);
            for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                match Source::from_str(name) {
                    Ok(source) => {
                        let url = self
                            .swagger
                            .sources
                            .iter()
                            .find(|s| s.source == source)
                            .map(|s| s.url.clone())
                            .unwrap_or_default();
                        sources.push(SourceSetting { source, url });
                    }
                    Err(why) => {
                        logging::error_file_async(format!(
                            "Unknown source '{}' in {} because {:?}",
                            name, SWAGGER_SOURCES, why
                        ));
                    }
                }
            }
            self.swagger.sources = sources;
        }

        for (key, source) in [
            (SWAGGER_TWSE_URL, Source::TWSE),
            (SWAGGER_TPEX_URL, Source::TPEx),
            (SWAGGER_TAIFEX_URL, Source::TAIFEX),
        ] {
            if let Ok(url) = env::var(key) {
                for setting in self.swagger.sources.iter_mut().filter(|s| s.source == source) {
                    setting.url = url.clone();
                }
            }
        }

        if let Ok(flag) = env::var(SWAGGER_FILELIST) {
            self.swagger.filelist = parse_bool(&flag).unwrap_or(self.swagger.filelist);
        }

        if let Ok(secs) = env::var(HTTP_TIMEOUT_SECS) {
            self.http.timeout_secs = u64::from_str(&secs).unwrap_or(self.http.timeout_secs);
        }

        if let Ok(secs) = env::var(HTTP_CONNECT_TIMEOUT_SECS) {
            self.http.connect_timeout_secs =
                u64::from_str(&secs).unwrap_or(self.http.connect_timeout_secs);
        }

        if let Ok(authorization) = env::var(HTTP_AUTHORIZATION) {
            self.http.authorization = authorization;
        }

        if let Ok(ua) = env::var(HTTP_USER_AGENT) {
            self.http.user_agent = ua;
        }

        if let Ok(flag) = env::var(HTTP_CAPTURE_HEADERS) {
            self.http.capture_headers = parse_bool(&flag).unwrap_or(self.http.capture_headers);
        }

        if let Ok(flag) = env::var(HTTP_INSECURE_FALLBACK) {
            self.http.insecure_fallback =
                parse_bool(&flag).unwrap_or(self.http.insecure_fallback);
        }

        self
    }

    /// 檢查設定是否足以開始執行
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.swagger.sources.is_empty() {
            return Err(CrawlError::Config("no sources configured".to_string()));
        }

        let mut seen = HashSet::with_capacity(self.swagger.sources.len());
        for setting in &self.swagger.sources {
            if !seen.insert(setting.source) {
                return Err(CrawlError::Config(format!(
                    "source {} is configured more than once",
                    setting.source
                )));
            }

            let url = setting.swagger_url();
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(CrawlError::Config(format!(
                    "swagger url of {} must be http(s): '{}'",
                    setting.source, url
                )));
            }
        }

        if self.swagger.output_dir.trim().is_empty() {
            return Err(CrawlError::Config("output_dir is empty".to_string()));
        }

        if self.http.timeout_secs == 0 {
            return Err(CrawlError::Config("timeout_secs must be greater than 0".to_string()));
        }

        Ok(())
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.swagger.output_dir)
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// 回傳設定檔的路徑
fn config_path() -> PathBuf {
    PathBuf::from(CONFIG_PATH)
}
