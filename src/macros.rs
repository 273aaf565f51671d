/// Logs through the `log` facade with a component-scoped target.
/// Usage:
/// ```rust
/// use log::Level;
/// offline_queue::queue_log!(Level::Info, "maintenance", "Trimmed {} records", 12);
/// ```
/// The record's target becomes `offline_queue::maintenance`, which the
/// `fern` format in `main.rs` prints between the level and pid columns:
/// [2025-04-25T16:32:10+02:00][INFO ][offline_queue::maintenance][pid=4568][tid=ThreadId(1)] Trimmed 12 records
#[macro_export]
macro_rules! queue_log {
    ($level:expr, $component:literal, $($arg:tt)+) => {
        log::log!(
            target: concat!("offline_queue::", $component),
            $level,
            $($arg)+
        )
    };
}

#[cfg(test)]
mod tests {
    use log::{Level, LevelFilter, Log, Metadata, Record};
    use std::sync::Mutex;

    /// A tiny in-memory logger that captures up to DEBUG.
    struct MemoryLogger {
        buffer: Mutex<String>,
    }

    impl MemoryLogger {
        const fn new() -> Self {
            MemoryLogger { buffer: Mutex::new(String::new()) }
        }

        fn take(&self) -> String {
            std::mem::take(&mut *self.buffer.lock().unwrap())
        }
    }

    static LOGGER: MemoryLogger = MemoryLogger::new();

    impl Log for MemoryLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= Level::Debug
        }
        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                let mut buf = self.buffer.lock().unwrap();
                buf.push_str(&format!("[{}][{}] {}\n", record.level(), record.target(), record.args()));
            }
        }
        fn flush(&self) {}
    }

    #[test]
    fn queue_log_emits_component_target() {
        // install our in-memory logger
        log::set_logger(&LOGGER).unwrap();
        log::set_max_level(LevelFilter::Debug);

        // clear any existing
        LOGGER.take();

        queue_log!(Level::Debug, "lease", "Reserved={}!", 42);
        queue_log!(Level::Trace, "lease", "filtered out");

        let output = LOGGER.take();
        assert!(output.contains("[DEBUG][offline_queue::lease]"), "missing level/target: {}", output);
        assert!(output.contains("Reserved=42!"),                  "missing payload: {}", output);
        assert!(!output.contains("filtered out"),                 "trace leaked: {}", output);
    }
}
