// ─────────────────────────────────────────────────────────────────────────────
// logbuf.rs — a `log::Log` wrapper that forwards to `env_logger`'s formatter
// while also retaining the last N lines for the status snapshot's
// `recent_log` field. Concept grounded on the original logging setup's
// buffered UI handler, expressed as a Rust `log::Log` implementation rather
// than a Python logging handler subclass.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const BUFFER_CAPACITY: usize = 200;

#[derive(Clone)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self { lines: Arc::new(Mutex::new(VecDeque::with_capacity(BUFFER_CAPACITY))) }
    }

    fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap();
        if lines.len() >= BUFFER_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn recent(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap();
        lines.iter().rev().take(n).rev().cloned().collect()
    }
}

struct BufferingLogger {
    buffer: LogBuffer,
    inner: env_logger::Logger,
}

impl log::Log for BufferingLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.inner.enabled(record.metadata()) {
            self.buffer.push(format!(
                "{} {} {}",
                chrono::Utc::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            ));
        }
        self.inner.log(record);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Initializes logging once at process start. Returns a handle whose
/// `recent()` feeds the status snapshot's notification area.
pub fn init() -> LogBuffer {
    let buffer = LogBuffer::new();
    let env_logger = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .build();
    let max_level = env_logger.filter();
    let logger = BufferingLogger { buffer: buffer.clone(), inner: env_logger };
    log::set_max_level(max_level);
    if log::set_boxed_logger(Box::new(logger)).is_err() {
        log::warn!("logger already initialized");
    }
    buffer
}
