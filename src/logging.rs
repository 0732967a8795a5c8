//! Process logger: console through `env_logger` (info+ unless `RUST_LOG` says
//! otherwise) and an append-only file sink at debug+.

use anyhow::{anyhow, Context, Result};
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::Path;
use std::sync::Mutex;

const FILE_LEVEL: LevelFilter = LevelFilter::Debug;

struct DualLogger {
    console: env_logger::Logger,
    file: Mutex<LineWriter<File>>,
}

impl Log for DualLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= FILE_LEVEL || self.console.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.console.matches(record) {
            self.console.log(record);
        }
        if record.level() <= FILE_LEVEL {
            if let Ok(mut file) = self.file.lock() {
                let _ = writeln!(
                    file,
                    "{} {:<5} {}: {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    record.args()
                );
            }
        }
    }

    fn flush(&self) {
        self.console.flush();
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Install the global logger. Creates the log file's parent directory if needed.
pub fn init(log_path: &Path) -> Result<()> {
    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("open log file {}", log_path.display()))?;

    let console =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .build();
    let max_level = console.filter().max(FILE_LEVEL);

    log::set_boxed_logger(Box::new(DualLogger {
        console,
        file: Mutex::new(LineWriter::new(file)),
    }))
    .map_err(|e| anyhow!("logger already installed: {}", e))?;
    log::set_max_level(max_level);
    Ok(())
}
