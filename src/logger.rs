use log::LevelFilter;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::{Path, PathBuf};

/// Target for audit events (principal creation, connects, schema commits).
pub const AUDIT_TARGET: &str = "wyvern_data::audit";

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_BYTES: u64 = 10 * 1024 * 1024;

#[must_use]
pub fn parse_level(level: Option<&str>) -> LevelFilter {
    match level.unwrap_or("info").to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

fn rolling(base: &Path, stem: &str, keep: u32) -> Result<RollingFileAppender, Box<dyn std::error::Error>> {
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", base.join(format!("{stem}.{{}}.log")).display()), keep)?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_BYTES)), Box::new(roller));
    Ok(RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(base.join(format!("{stem}.log")), Box::new(policy))?)
}

/// Builds the process log configuration: a rolling `app.log` plus a separate `audit.log`.
/// - dir: base directory for logs; if None, current directory.
/// - level: off|error|warn|info|debug|trace
/// - retention: number of rolled files to keep (default 7)
///
/// # Errors
/// Returns an error if an appender cannot be created.
pub fn build_config(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<usize>,
) -> Result<Config, Box<dyn std::error::Error>> {
    let base = dir
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    std::fs::create_dir_all(&base)?;
    let keep = u32::try_from(retention.unwrap_or(7)).unwrap_or(u32::MAX);
    let lvl = parse_level(level);
    let config = Config::builder()
        .appender(Appender::builder().build("app", Box::new(rolling(&base, "app", keep)?)))
        .appender(Appender::builder().build("audit", Box::new(rolling(&base, "audit", keep)?)))
        .logger(Logger::builder().appender("audit").additive(false).build(AUDIT_TARGET, lvl))
        .build(Root::builder().appender("app").build(lvl))?;
    Ok(config)
}

/// Configure logging globally for the process. Calling it again after a logger is installed is a
/// no-op.
///
/// # Errors
/// Returns an error if the log directory or appenders cannot be created.
pub fn configure_logging(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(dir, level, retention)?;
    let _ = log4rs::init_config(config);
    Ok(())
}

/// Configure logging from environment variables if present:
/// - WYVERN_LOG_DIR
/// - WYVERN_LOG_LEVEL
/// - WYVERN_LOG_RETENTION
///
/// # Errors
/// See [`configure_logging`].
pub fn configure_from_env() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::env::var("WYVERN_LOG_DIR").ok().map(PathBuf::from);
    let level = std::env::var("WYVERN_LOG_LEVEL").ok();
    let retention =
        std::env::var("WYVERN_LOG_RETENTION").ok().and_then(|s| s.parse::<usize>().ok());
    configure_logging(dir.as_deref(), level.as_deref(), retention)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_parse_case_insensitively() {
        assert_eq!(parse_level(Some("DEBUG")), LevelFilter::Debug);
        assert_eq!(parse_level(Some("bogus")), LevelFilter::Info);
        assert_eq!(parse_level(None), LevelFilter::Info);
    }

    #[test]
    fn config_routes_audit_target_to_its_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = build_config(Some(dir.path()), Some("warn"), Some(3)).unwrap();
        let audit = config.loggers().iter().find(|l| l.name() == AUDIT_TARGET).unwrap();
        assert_eq!(audit.appenders().to_vec(), vec!["audit".to_string()]);
        assert!(!audit.additive());
        assert_eq!(config.root().level(), LevelFilter::Warn);
    }
}
