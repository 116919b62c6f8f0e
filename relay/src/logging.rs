use crate::config::Config as RelayConfig;
use flate2::{write::GzEncoder, Compression};
use log::*;
use log4rs::{
    append::{
        rolling_file::{
            policy::compound::{roll::Roll, trigger::size::SizeTrigger, CompoundPolicy},
            RollingFileAppender,
        },
        Append,
    },
    config::{Appender, Config as Log4rsConfig, Root},
    encode::{self, Encode},
    filter::{Filter, Response},
};
use once_cell::sync::Lazy;
use std::{
    fs::{remove_file, rename, File},
    io,
    io::{stdout, Write},
    path::{Path, PathBuf},
    thread,
};
use termion::color;
use time::{
    format_description::{self, FormatItem},
    OffsetDateTime,
    UtcOffset,
};

static TIME_FORMAT: Lazy<Vec<FormatItem<'static>>> = Lazy::new(|| {
    format_description::parse("[hour repr:24]:[minute]:[second]")
        .expect("Invalid time format description")
});

static ROLL_FORMAT: Lazy<Vec<FormatItem<'static>>> = Lazy::new(|| {
    format_description::parse("[year]-[month]-[day]_[hour]-[minute]-[second]")
        .expect("Invalid roll format description")
});

const FILE_SIZE_LIMIT: u64 = 50_000_000;

#[cfg(debug_assertions)]
const LEVEL_FILTER: LevelFilter = LevelFilter::Debug;
#[cfg(not(debug_assertions))]
const LEVEL_FILTER: LevelFilter = LevelFilter::Info;

macro_rules! format_record {
    ($writer:expr, $record:expr) => {{
        let record = $record;
        writeln!(
            $writer,
            "[{} {}]: {}",
            format_time(current_time()),
            record.metadata().level(),
            record.args()
        )
    }};
}

pub fn init_logger(crate_name: &'static str) -> Result<(), anyhow::Error> {
    // Colored output for the operator's terminal
    let console = CustomConsoleAppender;

    // Size-rolled log files, compressed once rolled
    let log_file = RollingFileAppender::builder()
        .encoder(Box::new(LogEncoder))
        .build(
            latest_log_path(),
            Box::new(CompoundPolicy::new(
                Box::new(SizeTrigger::new(FILE_SIZE_LIMIT)),
                Box::new(GzipLogRoller),
            )),
        )?;

    let crate_filter = CrateFilter { prefix: crate_name };

    let config = Log4rsConfig::builder()
        .appender(
            Appender::builder()
                .filter(Box::new(crate_filter))
                .build("console", Box::new(console)),
        )
        .appender(
            Appender::builder()
                .filter(Box::new(crate_filter))
                .build("log_file", Box::new(log_file)),
        )
        .build(
            Root::builder()
                .appender("console")
                .appender("log_file")
                .build(LEVEL_FILTER),
        )?;

    log4rs::init_config(config)?;

    Ok(())
}

// Called at the end of main, compresses the last log file
pub fn cleanup() {
    // There's no reason to handle an error here
    let _ = roll_log(&latest_log_path(), false);
}

fn latest_log_path() -> PathBuf {
    RelayConfig::get().log_dir.join("latest.log")
}

fn current_time() -> OffsetDateTime {
    try_localize(OffsetDateTime::now_utc())
}

pub fn try_localize(datetime: OffsetDateTime) -> OffsetDateTime {
    match RelayConfig::get().utc_offset {
        Some(offset) => datetime.to_offset(offset),
        None => match UtcOffset::local_offset_at(datetime) {
            Ok(offset) => datetime.to_offset(offset),
            Err(_) => datetime,
        },
    }
}

fn format_time(datetime: OffsetDateTime) -> String {
    match datetime.format(&*TIME_FORMAT) {
        Ok(formatted) => formatted,
        Err(_) => "??:??:??".to_owned(),
    }
}

// Only allow logging from our own crates
#[derive(Debug, Clone, Copy)]
struct CrateFilter {
    #[allow(dead_code)]
    prefix: &'static str,
}

impl Filter for CrateFilter {
    #[cfg(debug_assertions)]
    fn filter(&self, record: &Record<'_>) -> Response {
        match record.module_path() {
            Some(path) =>
                if path.starts_with(self.prefix)
                    || path.starts_with("io")
                    || path.starts_with("peer")
                    || path.starts_with("common")
                {
                    Response::Accept
                } else {
                    Response::Reject
                },
            None => Response::Reject,
        }
    }

    #[cfg(not(debug_assertions))]
    fn filter(&self, _record: &Record<'_>) -> Response {
        Response::Neutral
    }
}

// Custom console logger so levels are color-coded
#[derive(Debug)]
struct CustomConsoleAppender;

impl Append for CustomConsoleAppender {
    fn append(&self, record: &Record<'_>) -> Result<(), anyhow::Error> {
        let mut writer = stdout().lock();
        match record.metadata().level() {
            Level::Error => write!(writer, "{}", color::Fg(color::Red))?,
            Level::Warn => write!(writer, "{}", color::Fg(color::LightYellow))?,
            Level::Debug => write!(writer, "{}", color::Fg(color::LightCyan))?,
            _ => write!(writer, "{}", color::Fg(color::Reset))?,
        }
        format_record!(&mut writer, record)?;
        write!(writer, "{}", color::Fg(color::Reset))?;
        Ok(())
    }

    fn flush(&self) {}
}

// Renames the full log aside and compresses it on a background thread. Rolled
// files are named by their roll time, e.g. 2022-03-14_09-26-53.log.gz
#[derive(Debug)]
struct GzipLogRoller;

impl Roll for GzipLogRoller {
    fn roll(&self, file: &Path) -> Result<(), anyhow::Error> {
        roll_log(file, true)
    }
}

fn roll_log(file: &Path, threaded: bool) -> Result<(), anyhow::Error> {
    if !file.exists() {
        return Ok(());
    }

    let config = RelayConfig::get();

    // Rename the file in case it's large and will take a while to compress
    let log = config.log_dir.join("rolling-tmp.log");
    rename(file, &log)?;

    let output = config
        .log_dir
        .join(format!("{}.log.gz", current_time().format(&*ROLL_FORMAT)?));

    if threaded {
        thread::spawn(move || try_compress_log(&log, &output));
    } else {
        try_compress_log(&log, &output);
    }

    Ok(())
}

// Attempts compress_log and prints an error if it fails
fn try_compress_log(input_path: &Path, output_path: &Path) {
    if let Err(error) = compress_log(input_path, output_path) {
        error!("Failed to compress log file: {}", error);
    }
}

// Compresses the source file into the output path, removing the source when done
fn compress_log(input_path: &Path, output_path: &Path) -> Result<(), io::Error> {
    let mut input = File::open(input_path)?;
    let mut output = GzEncoder::new(File::create(output_path)?, Compression::default());
    io::copy(&mut input, &mut output)?;
    drop(output.finish()?);
    drop(input); // This needs to occur before file deletion on some OS's
    remove_file(input_path)
}

#[derive(Debug)]
struct LogEncoder;

impl Encode for LogEncoder {
    fn encode(&self, writer: &mut dyn encode::Write, record: &Record<'_>) -> anyhow::Result<()> {
        format_record!(writer, record).map_err(Into::into)
    }
}
