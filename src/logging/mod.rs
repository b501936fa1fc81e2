use std::{thread, time::Duration};

use chrono::{DateTime, Local};
use concat_string::concat_string;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use once_cell::sync::Lazy;
use strum::Display;

pub mod rotate;

static LOGGER: Lazy<Logger> = Lazy::new(|| Logger::new("default"));

/// 等待背景執行緒寫完日誌的最長時間
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

enum Command {
    Write(LogMessage),
    Flush(Sender<()>),
}

pub struct Logger {
    writer: Sender<Command>,
}

impl Logger {
    pub fn new(log_name: &str) -> Self {
        let (tx, rx) = unbounded::<Command>();
        let fn_pattern = format!("log/%Y-%m-%d-{}.log", log_name);

        //寫入檔案的操作使用另一個線程處理
        thread::spawn(move || Self::run(rx, rotate::Rotate::new(fn_pattern)));

        Logger { writer: tx }
    }

    fn run(rx: Receiver<Command>, mut rotate: rotate::Rotate) {
        let mut together = String::with_capacity(4096);

        while let Ok(command) = rx.recv() {
            match command {
                Command::Write(received) => {
                    together.push_str(&concat_string!(
                        received.created_at.format("%F %X%.6f").to_string(),
                        " ",
                        received.level.to_string(),
                        " ",
                        received.msg,
                        "\r\n"
                    ));

                    if rx.is_empty() || together.len() >= 4096 {
                        Self::write_out(&mut rotate, &mut together);
                        rotate.flush();
                    }
                }
                Command::Flush(done) => {
                    Self::write_out(&mut rotate, &mut together);
                    rotate.flush();
                    let _ = done.send(());
                }
            }
        }
    }

    fn write_out(rotate: &mut rotate::Rotate, together: &mut String) {
        if together.is_empty() {
            return;
        }

        if let Err(why) = rotate.write_msg(Local::now(), together.as_bytes()) {
            error_console(format!("Failed to write log because {:?}", why));
            info_console(together.clone());
        }

        together.clear();
    }

    pub fn debug(&self, log: String) {
        self.send(Level::Debug, log);
    }

    pub fn info(&self, log: String) {
        self.send(Level::Info, log);
    }

    pub fn warn(&self, log: String) {
        self.send(Level::Warn, log);
    }

    pub fn error(&self, log: String) {
        self.send(Level::Error, log);
    }

    fn send(&self, level: Level, msg: String) {
        if let Err(why) = self.writer.send(Command::Write(LogMessage::new(level, msg))) {
            error_console(why.to_string());
        }
    }

    /// 等到目前佇列中的日誌都寫入檔案為止
    pub fn flush(&self) {
        let (tx, rx) = bounded::<()>(1);
        if self.writer.send(Command::Flush(tx)).is_err() {
            return;
        }

        let _ = rx.recv_timeout(FLUSH_TIMEOUT);
    }
}

pub struct LogMessage {
    pub level: Level,
    pub msg: String,
    pub created_at: DateTime<Local>,
}

impl LogMessage {
    pub fn new(level: Level, msg: String) -> Self {
        LogMessage {
            level,
            msg,
            created_at: Local::now(),
        }
    }
}

pub fn debug_file_async(log: String) {
    if cfg!(debug_assertions) {
        LOGGER.debug(log);
    }
}

pub fn info_file_async(log: String) {
    LOGGER.info(log);
}

pub fn warn_file_async(log: String) {
    LOGGER.warn(log);
}

pub fn error_file_async(log: String) {
    LOGGER.error(log);
}

/// 程式結束前呼叫，確保預設日誌都已落地
pub fn flush() {
    LOGGER.flush();
}

pub fn info_console(log: String) {
    println!(
        "{} Info {}",
        Local::now().format("%Y-%m-%d %H:%M:%S.%3f"),
        log
    );
}

pub fn error_console(log: String) {
    println!(
        "{} Error {}",
        Local::now().format("%Y-%m-%d %H:%M:%S.%3f"),
        log
    );
}
