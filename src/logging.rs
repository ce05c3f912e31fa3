use log::LevelFilter;
use once_cell::sync::OnceCell;

static INSTALLED_LEVEL: OnceCell<LevelFilter> = OnceCell::new();

fn env_level() -> LevelFilter {
    std::env::var("DLOGG_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .as_deref()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info)
}

/// Logger filtering at exactly `level`; the environment is read only by [`env_level`].
fn builder(level: LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .format_timestamp_millis()
        .format_module_path(true)
        .format_target(false);
    builder
}

/// Parse a level name such as `"debug"`; `None` for missing or unknown names.
pub fn parse_level(input: Option<&str>) -> Option<LevelFilter> {
    input.and_then(|s| s.parse::<LevelFilter>().ok())
}

/// Initialize stderr logging based on `DLOGG_LOG`/`RUST_LOG`.
///
/// Safe to call multiple times; the first call wins and its level is returned
/// by every later call.
pub fn init_logging() -> LevelFilter {
    init_logging_with(None)
}

/// Like [`init_logging`], but an explicit level takes precedence over the environment.
pub fn init_logging_with(level: Option<LevelFilter>) -> LevelFilter {
    *INSTALLED_LEVEL.get_or_init(|| {
        let level = level.unwrap_or_else(env_level);
        let installed = builder(level).try_init().is_ok();
        if installed {
            log::set_max_level(level);
        }
        level
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_level_names() {
        assert_eq!(parse_level(Some("debug")), Some(LevelFilter::Debug));
        assert_eq!(parse_level(Some("WARN")), Some(LevelFilter::Warn));
        assert_eq!(parse_level(Some("loud")), None);
        assert_eq!(parse_level(None), None);
    }

    #[test]
    fn explicit_level_ignores_rust_log() {
        std::env::set_var("RUST_LOG", "warn");
        assert_eq!(builder(LevelFilter::Debug).build().filter(), LevelFilter::Debug);
        assert_eq!(builder(LevelFilter::Error).build().filter(), LevelFilter::Error);
    }

    #[test]
    fn init_is_idempotent() {
        let first = init_logging_with(Some(LevelFilter::Debug));
        let second = init_logging_with(Some(LevelFilter::Error));
        assert_eq!(first, second);
    }
}
