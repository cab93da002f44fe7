//! Structured diagnostics via the `log` facade (§6 `ZIGCAT_VERBOSE`).

use log::LevelFilter;

/// Installs the process-wide logger. `verbosity` is the repeat count of
/// `-v`; `quiet` is `-q`. `ZIGCAT_VERBOSE` (any value) forces at least
/// `Debug` regardless of `verbosity`, matching the env var's historical
/// meaning of "turn on backend-selection chatter".
pub fn init(verbosity: u8, quiet: bool) {
    let mut level = if quiet {
        LevelFilter::Off
    } else {
        match verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    if std::env::var_os("ZIGCAT_VERBOSE").is_some() && level < LevelFilter::Debug {
        level = LevelFilter::Debug;
    }

    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .init();
}
