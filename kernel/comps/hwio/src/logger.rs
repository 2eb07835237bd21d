// SPDX-License-Identifier: MPL-2.0

//! Logging support.
//!
//! The logger formats records and forwards them to the [`Console`] injected
//! at initialization. Records are written in their entirety without being
//! mixed with records generated concurrently on other cores.

use alloc::format;

use log::{LevelFilter, Metadata, Record};

use crate::{platform::Console, prelude::*};

/// A logger that writes to a [`Console`].
pub struct HwioLogger {
    console: Arc<dyn Console>,
    level: LevelFilter,
}

impl HwioLogger {
    pub fn new(console: Arc<dyn Console>, level: LevelFilter) -> Self {
        Self { console, level }
    }
}

impl log::Log for HwioLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format_record(record);

        // Use a global lock to prevent interleaving of log messages.
        static RECORD_LOCK: Mutex<()> = Mutex::new(());
        let _lock = RECORD_LOCK.lock();

        self.console.send(line.as_bytes());
    }

    fn flush(&self) {}
}

fn format_record(record: &Record) -> String {
    format!("{:<5} [hwio]: {}\n", record.level(), record.args())
}

static LOGGER: Once<HwioLogger> = Once::new();

/// Initializes the logger. Records logged before this function is called are dropped.
///
/// # Errors
///
/// Returns [`EEXIST`] if another logger has been installed.
///
/// [`EEXIST`]: Errno::EEXIST
pub fn init(console: Arc<dyn Console>, level: LevelFilter) -> Result<()> {
    let logger = LOGGER.call_once(|| HwioLogger::new(console, level));
    log::set_logger(logger)
        .map_err(|_| Error::with_message(Errno::EEXIST, "a logger is already installed"))?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod test {
    use log::{Level, Log};

    use super::*;
    use crate::test_utils::MockConsole;

    #[test]
    fn records_are_formatted_per_line() {
        let record = Record::builder()
            .level(Level::Info)
            .args(format_args!("hwio module registered"))
            .build();
        assert_eq!(
            format_record(&record),
            "INFO  [hwio]: hwio module registered\n"
        );
    }

    #[test]
    fn logger_writes_to_console() {
        let console = Arc::new(MockConsole::new());
        let logger = HwioLogger::new(console.clone(), LevelFilter::Warn);

        logger.log(
            &Record::builder()
                .level(Level::Info)
                .args(format_args!("dropped"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Warn)
                .args(format_args!("line {}", 5))
                .build(),
        );
        assert_eq!(console.lines(), vec!["WARN  [hwio]: line 5".to_string()]);
    }
}
