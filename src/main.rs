use std::process::ExitCode;

use crate::{config::App, event::harvest};

pub mod artifact;
pub mod config;
pub mod crawler;
pub mod declare;
pub mod error;
pub mod event;
pub mod logging;
pub mod util;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    util::ensure_rustls_crypto_provider();

    let app = match App::get() {
        Ok(app) => app,
        Err(why) => {
            logging::error_file_async(format!("Failed to load config because {:?}", why));
            logging::error_console(format!("Failed to load config: {:#}", why));
            logging::flush();
            return ExitCode::FAILURE;
        }
    };

    logging::info_file_async(format!(
        "swagger_crawler start, output: {}",
        app.output_dir().display()
    ));

    let report = harvest::execute(&app).await;

    for record in &report.summary {
        match &record.error {
            Some(why) => logging::info_console(format!("[{}] failed: {}", record.source, why)),
            None => logging::info_console(format!(
                "[{}] {}/{} succeeded, {} skipped",
                record.source, record.success, record.total, record.skipped
            )),
        }
    }

    if let Some(path) = &report.summary_path {
        logging::info_console(format!("summary: {}", path.display()));
    }

    logging::info_file_async(format!("swagger_crawler finished in {}", report.phase));
    logging::flush();

    if report.is_done() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
