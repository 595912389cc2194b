// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

use std::fs::File;

use simplelog::{Config, LevelFilter, SimpleLogger, WriteLogger};

fn level_from_env() -> LevelFilter {
    match std::env::var("P11CORE_TRACE_LEVEL") {
        Err(_) => LevelFilter::Error,
        Ok(l) => match l.as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Trace,
        },
    }
}

/// Sets up tracing from the environment.
///
/// P11CORE_TRACE selects the destination: `stdout`, or any other value
/// as the path of a file to log into. When unset nothing is logged.
/// P11CORE_TRACE_LEVEL picks the level (off, error, warn, info, debug,
/// trace), error when unset and trace for unknown values.
///
/// Failures to set up the logger, such as an unwritable file, are
/// silently ignored.
pub fn init() {
    let level = level_from_env();
    match std::env::var("P11CORE_TRACE") {
        Err(_) => return,
        Ok(t) => match t.as_str() {
            "stdout" => {
                let _ = SimpleLogger::init(level, Config::default());
            }
            file_name => {
                let file = match File::create(file_name) {
                    Ok(w) => w,
                    Err(_) => return,
                };
                let _ = WriteLogger::init(level, Config::default(), file);
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn levels() {
        std::env::set_var("P11CORE_TRACE_LEVEL", "warn");
        assert_eq!(level_from_env(), LevelFilter::Warn);
        std::env::set_var("P11CORE_TRACE_LEVEL", "bogus");
        assert_eq!(level_from_env(), LevelFilter::Trace);
        std::env::remove_var("P11CORE_TRACE_LEVEL");
        assert_eq!(level_from_env(), LevelFilter::Error);
    }

    #[test]
    #[serial]
    fn test_init() {
        init();
    }
}
