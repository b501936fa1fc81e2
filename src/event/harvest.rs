use std::{fmt, path::Path, path::PathBuf};

use tokio::fs;

use crate::{
    artifact::{filelist, index, index::SummaryRecord, writer::ArtifactWriter},
    config::{App, SourceSetting},
    crawler::{executor, openapi},
    declare::Source,
    error::CrawlError,
    logging,
    util::http::{Fetch, HttpSession},
};

/// 整次執行的狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Discovering(Source),
    Fetching(Source),
    WritingManifest(Source),
    SourceFailed(Source),
    WritingSummary,
    Done,
    FatalAbort,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "Idle"),
            RunPhase::Discovering(s) => write!(f, "Discovering({})", s),
            RunPhase::Fetching(s) => write!(f, "Fetching({})", s),
            RunPhase::WritingManifest(s) => write!(f, "WritingManifest({})", s),
            RunPhase::SourceFailed(s) => write!(f, "SourceFailed({})", s),
            RunPhase::WritingSummary => write!(f, "WritingSummary"),
            RunPhase::Done => write!(f, "Done"),
            RunPhase::FatalAbort => write!(f, "FatalAbort"),
        }
    }
}

/// 執行結果
#[derive(Debug)]
pub struct RunReport {
    pub phase: RunPhase,
    pub summary: Vec<SummaryRecord>,
    pub summary_path: Option<PathBuf>,
    /// FatalAbort 的原因
    pub error: Option<String>,
}

impl RunReport {
    pub fn is_done(&self) -> bool {
        self.phase == RunPhase::Done
    }
}

struct Run {
    phase: RunPhase,
}

impl Run {
    fn new() -> Self {
        Run {
            phase: RunPhase::Idle,
        }
    }

    fn transition(&mut self, next: RunPhase) {
        logging::info_file_async(format!("run phase {} -> {}", self.phase, next));
        self.phase = next;
    }

    fn abort(mut self, why: CrawlError, summary: Vec<SummaryRecord>) -> RunReport {
        logging::error_file_async(format!("run aborted in {} because {:?}", self.phase, why));
        logging::error_console(format!("run aborted: {}", why));
        self.transition(RunPhase::FatalAbort);

        RunReport {
            phase: self.phase,
            summary,
            summary_path: None,
            error: Some(why.to_string()),
        }
    }
}

/// 依設定建立 HTTP session 後執行一次完整的抓取
pub async fn execute(app: &App) -> RunReport {
    if let Err(why) = app.validate() {
        return Run::new().abort(why, Vec::new());
    }

    match HttpSession::new(&app.http) {
        Ok(session) => run(app, &session).await,
        Err(why) => Run::new().abort(CrawlError::Config(format!("{:#}", why)), Vec::new()),
    }
}

/// 依序處理每個來源，最後寫入 summary 與 filelist
pub async fn run<F: Fetch + ?Sized>(app: &App, fetcher: &F) -> RunReport {
    let mut run = Run::new();

    if let Err(why) = app.validate() {
        return run.abort(why, Vec::new());
    }

    let root = app.output_dir();
    if let Err(why) = fs::create_dir_all(&root).await {
        return run.abort(CrawlError::write(&root, why), Vec::new());
    }

    let mut records = Vec::with_capacity(app.swagger.sources.len());
    for setting in &app.swagger.sources {
        match harvest_source(&mut run, &root, setting, fetcher, app.http.capture_headers).await {
            Ok(record) => {
                logging::info_file_async(format!(
                    "[{}] total:{} success:{} failure:{} skipped:{}",
                    record.source, record.total, record.success, record.failure, record.skipped
                ));
                records.push(record);
            }
            Err(why) => return run.abort(why, records),
        }
    }

    run.transition(RunPhase::WritingSummary);
    let summary_path = match index::write_summary(&root, &records).await {
        Ok(path) => path,
        Err(why) => return run.abort(why, records),
    };
    logging::info_console(format!("Wrote summary to {}", summary_path.display()));

    if app.swagger.filelist {
        let sources: Vec<Source> = app.swagger.sources.iter().map(|s| s.source).collect();
        if let Err(why) = filelist::generate(&root, &sources).await {
            logging::error_file_async(format!("Failed to generate filelist because {:?}", why));
        }
    }

    run.transition(RunPhase::Done);

    RunReport {
        phase: run.phase,
        summary: records,
        summary_path: Some(summary_path),
        error: None,
    }
}

/// 處理單一來源；只有目錄層級的寫入錯誤會回傳 Err
async fn harvest_source<F: Fetch + ?Sized>(
    run: &mut Run,
    root: &Path,
    setting: &SourceSetting,
    fetcher: &F,
    capture_headers: bool,
) -> Result<SummaryRecord, CrawlError> {
    let source = setting.source;
    let swagger_url = setting.swagger_url();

    run.transition(RunPhase::Discovering(source));
    logging::info_console(format!("Fetching swagger of {}: {}", source.name(), swagger_url));

    let discovery = match openapi::visit(fetcher, source, swagger_url).await {
        Ok(discovery) => discovery,
        Err(why) => {
            run.transition(RunPhase::SourceFailed(source));
            logging::error_file_async(format!("{:?}", why));
            logging::error_console(why.to_string());
            for removed in index::clear_source(&root.join(source.dir_name())).await? {
                logging::info_file_async(format!(
                    "[{}] removed stale {}",
                    source,
                    removed.display()
                ));
            }
            return Ok(SummaryRecord::discovery_failed(source, &why));
        }
    };

    for skipped in &discovery.skipped {
        logging::warn_file_async(format!(
            "[{}] skip GET {} because {}",
            source, skipped.path, skipped.reason
        ));
    }

    let mut writer = ArtifactWriter::open(root, source).await?;
    run.transition(RunPhase::Fetching(source));

    let mut entries = Vec::with_capacity(discovery.endpoints.len());
    for (idx, endpoint) in discovery.endpoints.into_iter().enumerate() {
        logging::info_console(format!("[{}] {}: GET {}", source, idx + 1, endpoint.url));

        let result = executor::execute(fetcher, endpoint, capture_headers).await;
        logging::debug_file_async(format!(
            "[{}] {} -> {:?} at {}",
            source,
            result.endpoint.url,
            result.status_code,
            result.fetched_at.format("%F %X")
        ));
        if result.verify_fallback_used {
            logging::warn_file_async(format!(
                "[{}] {} fetched with certificate verification disabled",
                source, result.endpoint.url
            ));
        }
        if let Some(why) = &result.error {
            logging::error_file_async(format!(
                "[{}] GET {} failed: {}",
                source, result.endpoint.url, why
            ));
        }

        entries.push(writer.write(&result).await);
    }

    run.transition(RunPhase::WritingManifest(source));
    index::write_manifest(writer.dir(), &entries).await?;
    for removed in index::prune_orphans(writer.dir(), &entries).await? {
        logging::info_file_async(format!("[{}] removed orphan {}", source, removed.display()));
    }

    logging::info_console(format!(
        "Saved {} GET endpoints to {}",
        entries.len(),
        writer.dir().display()
    ));

    Ok(SummaryRecord::from_manifest(
        source,
        &entries,
        discovery.skipped.len(),
    ))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use crate::{
        artifact::{index::ManifestEntry, FILELIST_FILE, MANIFEST_FILE, SUMMARY_FILE},
        config::{Http, Swagger},
        declare::FetchStatus,
        util::http::Reply,
    };

    use super::*;

    const TWSE_SWAGGER: &str = "https://openapi.twse.com.tw/v1/swagger.json";
    const TPEX_SWAGGER: &str = "https://www.tpex.org.tw/openapi/swagger.json";
    const TAIFEX_SWAGGER: &str = "https://openapi.taifex.com.tw/swagger.json";

    enum Script {
        Reply(u16, String, bool),
        Timeout,
    }

    /// 依網址回傳預先安排好的回應
    #[derive(Default)]
    struct ScriptedFetcher {
        scripts: HashMap<String, Script>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn json(mut self, url: &str, body: Value) -> Self {
            self.scripts.insert(url.to_string(), Script::Reply(200, body.to_string(), false));
            self
        }

        fn fallback(mut self, url: &str, body: Value) -> Self {
            self.scripts.insert(url.to_string(), Script::Reply(200, body.to_string(), true));
            self
        }

        fn status(mut self, url: &str, status: u16) -> Self {
            self.scripts.insert(url.to_string(), Script::Reply(status, String::new(), false));
            self
        }

        fn timeout(mut self, url: &str) -> Self {
            self.scripts.insert(url.to_string(), Script::Timeout);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetch for ScriptedFetcher {
        async fn get(&self, url: &str) -> Result<Reply, CrawlError> {
            self.calls.lock().unwrap().push(url.to_string());

            match self.scripts.get(url) {
                Some(Script::Reply(status, body, fallback)) => Ok(Reply {
                    status: *status,
                    headers: Default::default(),
                    body: body.as_bytes().to_vec(),
                    verify_fallback_used: *fallback,
                }),
                Some(Script::Timeout) => {
                    Err(CrawlError::Fetch("request timed out: operation timed out".to_string()))
                }
                None => Err(CrawlError::Fetch(format!("connection failed: {}", url))),
            }
        }
    }

    fn twse_doc(paths: Value) -> Value {
        json!({
            "swagger": "2.0",
            "host": "openapi.twse.com.tw",
            "basePath": "/v1",
            "schemes": ["https"],
            "paths": paths
        })
    }

    fn app(root: &Path, sources: &[Source]) -> App {
        App {
            swagger: Swagger {
                sources: sources.iter().map(|s| SourceSetting::new(*s)).collect(),
                output_dir: root.display().to_string(),
                filelist: true,
            },
            http: Http::default(),
        }
    }

    fn read_json(path: PathBuf) -> Value {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    fn manifest(root: &Path, source: &str) -> Vec<ManifestEntry> {
        serde_json::from_slice(&std::fs::read(root.join(source).join(MANIFEST_FILE)).unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn test_two_endpoints_both_succeed() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::default()
            .json(
                TWSE_SWAGGER,
                twse_doc(json!({
                    "/opendata/t187ap03_L": {"get": {"summary": "上市公司基本資料"}},
                    "/exchangeReport/BWIBBU_ALL": {"get": {}}
                })),
            )
            .json(
                "https://openapi.twse.com.tw/v1/opendata/t187ap03_L",
                json!([{"公司代號": "2330"}]),
            )
            .json(
                "https://openapi.twse.com.tw/v1/exchangeReport/BWIBBU_ALL",
                json!([{"Code": "1101", "PEratio": "15.2"}]),
            );

        let report = run(&app(root.path(), &[Source::TWSE]), &fetcher).await;

        assert_eq!(report.phase, RunPhase::Done);
        let entries = manifest(root.path(), "twse");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.status == FetchStatus::Success));
        assert_eq!(entries[0].path, "/opendata/t187ap03_L");
        assert_eq!(entries[0].summary.as_deref(), Some("上市公司基本資料"));

        let summary = read_json(root.path().join(SUMMARY_FILE));
        assert_eq!(
            summary,
            json!([{"source": "twse", "total": 2, "success": 2, "failure": 0, "skipped": 0}])
        );

        // 每個成功的項目都指向內容相同的檔案
        for entry in &entries {
            let file = root.path().join("twse").join(entry.file.as_ref().unwrap());
            let body = std::fs::read(file).unwrap();
            assert!(serde_json::from_slice::<Value>(&body).is_ok());
        }
        let body = std::fs::read(root.path().join("twse/GET_opendata_t187ap03_L.json")).unwrap();
        assert_eq!(body, json!([{"公司代號": "2330"}]).to_string().into_bytes());
    }

    #[tokio::test]
    async fn test_tls_fallback_is_visible_in_manifest() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::default()
            .json(TWSE_SWAGGER, twse_doc(json!({"/opendata/t05st10_if": {"get": {}}})))
            .fallback(
                "https://openapi.twse.com.tw/v1/opendata/t05st10_if",
                json!([{"出表日期": "1130102"}]),
            );

        let report = run(&app(root.path(), &[Source::TWSE]), &fetcher).await;
        assert!(report.is_done());

        let raw = read_json(root.path().join("twse").join(MANIFEST_FILE));
        assert_eq!(raw[0]["status"], "success");
        assert_eq!(raw[0]["verifyFallbackUsed"], true);
    }

    #[tokio::test]
    async fn test_timeout_is_recorded_without_artifact() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::default()
            .json(
                TWSE_SWAGGER,
                twse_doc(json!({
                    "/opendata/slow": {"get": {}},
                    "/opendata/fast": {"get": {}}
                })),
            )
            .timeout("https://openapi.twse.com.tw/v1/opendata/slow")
            .json("https://openapi.twse.com.tw/v1/opendata/fast", json!({"data": []}));

        let report = run(&app(root.path(), &[Source::TWSE]), &fetcher).await;

        assert!(report.is_done());
        let entries = manifest(root.path(), "twse");
        assert_eq!(entries[0].status, FetchStatus::Failure);
        assert!(entries[0].file.is_none());
        assert!(entries[0].error.as_deref().unwrap().contains("timed out"));
        assert!(!root.path().join("twse/GET_opendata_slow.json").exists());

        assert_eq!(report.summary[0].failure, 1);
        assert_eq!(report.summary[0].success, 1);
        assert_eq!(report.summary[0].success + report.summary[0].failure, entries.len());
    }

    #[tokio::test]
    async fn test_unreachable_swagger_does_not_stop_other_sources() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("tpex")).unwrap();
        std::fs::write(root.path().join("tpex").join(MANIFEST_FILE), b"[]").unwrap();

        let fetcher = ScriptedFetcher::default()
            .json(TWSE_SWAGGER, twse_doc(json!({"/a": {"get": {}}})))
            .json("https://openapi.twse.com.tw/v1/a", json!([]))
            .status(TPEX_SWAGGER, 502)
            .json(
                TAIFEX_SWAGGER,
                json!({"openapi": "3.0.0", "servers": [{"url": "/v1"}],
                       "paths": {"/DailyMarketReportFut": {"get": {}}}}),
            )
            .status("https://openapi.taifex.com.tw/v1/DailyMarketReportFut", 500);

        let report = run(
            &app(root.path(), &[Source::TWSE, Source::TPEx, Source::TAIFEX]),
            &fetcher,
        )
        .await;

        assert_eq!(report.phase, RunPhase::Done);
        let summary = read_json(root.path().join(SUMMARY_FILE));
        let summary = summary.as_array().unwrap();
        assert_eq!(summary.len(), 3);
        assert_eq!(summary[0]["source"], "twse");
        assert_eq!(summary[0]["success"], 1);
        assert_eq!(summary[1]["source"], "tpex");
        assert_eq!(summary[1]["total"], 0);
        assert_eq!(summary[1]["success"], 0);
        assert!(summary[1]["error"].as_str().unwrap().contains("502"));
        assert_eq!(summary[2]["source"], "taifex");
        assert_eq!(summary[2]["failure"], 1);

        assert!(!root.path().join("tpex").join(MANIFEST_FILE).exists());
        assert_eq!(manifest(root.path(), "taifex")[0].status_code, Some(500));

        // 來源依設定順序處理，端點依文件順序處理
        assert_eq!(
            fetcher.calls(),
            vec![
                TWSE_SWAGGER.to_string(),
                "https://openapi.twse.com.tw/v1/a".to_string(),
                TPEX_SWAGGER.to_string(),
                TAIFEX_SWAGGER.to_string(),
                "https://openapi.taifex.com.tw/v1/DailyMarketReportFut".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_discovery_clears_previous_outputs() {
        let root = tempfile::tempdir().unwrap();
        let app = app(root.path(), &[Source::TWSE]);

        let healthy = ScriptedFetcher::default()
            .json(TWSE_SWAGGER, twse_doc(json!({"/a": {"get": {}}})))
            .json("https://openapi.twse.com.tw/v1/a", json!([1, 2]));
        assert!(run(&app, &healthy).await.is_done());
        assert!(root.path().join("twse/GET_a.json").exists());

        let broken = ScriptedFetcher::default().status(TWSE_SWAGGER, 502);
        let report = run(&app, &broken).await;

        assert!(report.is_done());
        assert!(report.summary[0].error.is_some());
        assert!(!root.path().join("twse").join(MANIFEST_FILE).exists());
        assert!(!root.path().join("twse/GET_a.json").exists());

        let list = read_json(root.path().join(FILELIST_FILE));
        assert_eq!(list["files"], json!([]));
    }

    #[tokio::test]
    async fn test_rerun_is_byte_identical_and_prunes_orphans() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = || {
            ScriptedFetcher::default()
                .json(
                    TWSE_SWAGGER,
                    twse_doc(json!({
                        "/b": {"get": {}},
                        "/a": {"get": {"summary": "甲"}},
                        "/c/{code}": {"get": {"parameters": [
                            {"name": "code", "in": "path", "type": "string"}
                        ]}}
                    })),
                )
                .json("https://openapi.twse.com.tw/v1/b", json!({"rows": [1]}))
                .json("https://openapi.twse.com.tw/v1/a", json!([1, 2]))
        };
        let app = app(root.path(), &[Source::TWSE]);

        std::fs::create_dir_all(root.path().join("twse")).unwrap();
        std::fs::write(root.path().join("twse/GET_removed.json"), b"[]").unwrap();

        run(&app, &fetcher()).await;
        let manifest_first = std::fs::read(root.path().join("twse").join(MANIFEST_FILE)).unwrap();
        let summary_first = std::fs::read(root.path().join(SUMMARY_FILE)).unwrap();

        let report = run(&app, &fetcher()).await;
        assert!(report.is_done());
        assert_eq!(report.summary[0].skipped, 1);

        assert_eq!(
            std::fs::read(root.path().join("twse").join(MANIFEST_FILE)).unwrap(),
            manifest_first
        );
        assert_eq!(std::fs::read(root.path().join(SUMMARY_FILE)).unwrap(), summary_first);

        let mut files: Vec<String> = std::fs::read_dir(root.path().join("twse"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        files.sort();
        assert_eq!(files, vec!["GET_a.json", "GET_b.json", MANIFEST_FILE]);

        let list = read_json(root.path().join(FILELIST_FILE));
        assert_eq!(list["files"][0]["display"], "甲 (GET_a.json)");
        assert_eq!(list["files"][1]["count"], 1);
    }

    #[tokio::test]
    async fn test_no_sources_is_fatal_before_any_output() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("swagger");
        let report = run(&app(&out, &[]), &ScriptedFetcher::default()).await;

        assert_eq!(report.phase, RunPhase::FatalAbort);
        assert!(report.summary_path.is_none());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_uncreatable_output_dir_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("swagger");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let fetcher = ScriptedFetcher::default();
        let report = run(&app(&blocker, &[Source::TWSE]), &fetcher).await;

        assert_eq!(report.phase, RunPhase::FatalAbort);
        assert!(report.error.is_some());
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    #[ignore = "hits the public TAIFEX API"]
    async fn test_live_taifex() {
        let root = tempfile::tempdir().unwrap();
        let report = execute(&app(root.path(), &[Source::TAIFEX])).await;

        assert!(report.is_done(), "{:?}", report.error);
        assert!(report.summary[0].error.is_none(), "{:?}", report.summary[0]);
        assert!(report.summary[0].total > 0);
        assert!(root.path().join("taifex").join(MANIFEST_FILE).exists());
    }

    #[tokio::test]
    async fn test_execute_against_local_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/openapi/swagger.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "openapi": "3.0.1",
                "servers": [{"url": "/openapi/v1"}],
                "paths": {
                    "/tpex_mainboard_peratio_analysis": {"get": {"summary": "上櫃股票本益比"}},
                    "/tpex_off_market": {"get": {}}
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/openapi/v1/tpex_mainboard_peratio_analysis"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"[{"SecuritiesCompanyCode":"6488"}]"#, "application/json"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/openapi/v1/tpex_off_market"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let root = tempfile::tempdir().unwrap();
        let mut app = app(root.path(), &[Source::TPEx]);
        app.swagger.sources[0].url = format!("{}/openapi/swagger.json", server.uri());

        let report = execute(&app).await;

        assert!(report.is_done(), "{:?}", report.error);
        assert_eq!(report.summary[0].total, 2);
        assert_eq!(report.summary[0].success, 1);
        assert_eq!(report.summary[0].failure, 1);

        let body = std::fs::read_to_string(
            root.path().join("tpex/GET_tpex_mainboard_peratio_analysis.json"),
        )
        .unwrap();
        assert_eq!(body, r#"[{"SecuritiesCompanyCode":"6488"}]"#);
        assert!(!root.path().join("tpex/GET_tpex_off_market.json").exists());
    }
}
