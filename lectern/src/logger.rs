use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter, Metadata, Record};
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Console logger with an optional plain text mirror on disk.
///
/// The file receives debug records of this crate no matter what the console
/// level is, so failed runs can be inspected afterwards.
pub struct Logger {
    console: LevelFilter,
    file: Option<Mutex<File>>,
}

impl Logger {
    /// Install the logger globally, returns the path of the log file if one was created.
    pub fn init(console: LevelFilter, log_dir: Option<&Path>) -> Result<Option<PathBuf>> {
        let (file, path) = match log_dir {
            Some(dir) => {
                fs::create_dir_all(dir)
                    .with_context(|| format!("couldn't create log directory {}", dir.display()))?;
                let path = dir.join(format!(
                    "{}.log",
                    chrono::Local::now().format("%Y-%m-%d-%H-%M-%S")
                ));
                let file = File::create(&path)
                    .with_context(|| format!("couldn't create log file {}", path.display()))?;
                (Some(Mutex::new(file)), Some(path))
            }
            None => (None, None),
        };

        let max_level = if file.is_some() {
            console.max(LevelFilter::Debug)
        } else {
            console
        };

        log::set_boxed_logger(Box::new(Self { console, file }))?;
        log::set_max_level(max_level);
        Ok(path)
    }

    fn write_file(&self, record: &Record) {
        let Some(file) = &self.file else {
            return;
        };

        if record.level() > Level::Info && !record.target().starts_with(env!("CARGO_CRATE_NAME")) {
            return;
        }

        if let Ok(mut file) = file.lock() {
            let _ = writeln!(
                file,
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn write_console(&self, record: &Record) {
        match self.console {
            LevelFilter::Off => (),
            LevelFilter::Error | LevelFilter::Warn | LevelFilter::Info => match record.level() {
                Level::Info => {
                    println!("{}", record.args());
                }
                _ => {
                    eprintln!("{} {}", label(record.level()), record.args());
                }
            },
            LevelFilter::Debug | LevelFilter::Trace => {
                let location = match (record.file(), record.line()) {
                    (Some(file), Some(line)) => format!("[{}:{}]", file, line).dimmed(),
                    _ => "[unk]".dimmed(),
                };

                eprintln!(
                    "{} {} {} {}",
                    label(record.level()),
                    record.target().dimmed(),
                    location,
                    record.args()
                );
            }
        }
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.console || (self.file.is_some() && metadata.level() <= Level::Debug)
    }

    fn log(&self, record: &Record) {
        if record.level() <= self.console {
            self.write_console(record);
        }

        if self.enabled(record.metadata()) {
            self.write_file(record);
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file
            && let Ok(mut file) = file.lock()
        {
            let _ = file.flush();
        }
    }
}

fn label(level: Level) -> ColoredString {
    match level {
        Level::Debug => "[DEBUG]".bold().blue(),
        Level::Error => "[ERROR]".bold().red(),
        Level::Info => "[INFO]".bold().green(),
        Level::Trace => "[TRACE]".bold().purple(),
        Level::Warn => "[WARN]".bold().yellow(),
    }
}
