use chrono::Local;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

/// Maximum number of log entries to keep in memory
const MAX_LOG_ENTRIES: usize = 1000;

/// A log entry with timestamp and message
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: Level, target: &str, message: String) -> Self {
        Self {
            timestamp: Local::now().format("%H:%M:%S.%3f").to_string(),
            level: level.to_string().to_uppercase(),
            target: target.to_string(),
            message,
        }
    }

    /// Format for display in a host's log panel
    pub fn format_for_display(&self) -> String {
        format!(
            "[{}] {} [{}] {}",
            self.timestamp, self.level, self.target, self.message
        )
    }

    /// Parse one line of compact fmt output: "LEVEL target: message"
    fn parse(line: &str) -> Self {
        let levels = [
            ("TRACE ", Level::TRACE),
            ("DEBUG ", Level::DEBUG),
            ("INFO ", Level::INFO),
            ("WARN ", Level::WARN),
            ("ERROR ", Level::ERROR),
        ];
        let Some((level, rest)) = levels
            .iter()
            .find_map(|(prefix, level)| line.strip_prefix(prefix).map(|rest| (*level, rest)))
        else {
            return LogEntry::new(Level::INFO, "general", line.to_string());
        };

        // Target is everything before the first colon, if it has no spaces
        match rest.find(':') {
            Some(colon) if !rest[..colon].contains(' ') => {
                LogEntry::new(level, &rest[..colon], rest[colon + 1..].trim().to_string())
            }
            _ => LogEntry::new(level, "general", rest.to_string()),
        }
    }
}

/// Thread-safe ring buffer for log entries
#[derive(Clone, Default)]
pub struct LogRingBuffer {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl LogRingBuffer {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_LOG_ENTRIES))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        // A panic while logging must not take the log buffer down with it
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.lock();
        if entries.len() >= MAX_LOG_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn get_recent(&self, count: usize) -> Vec<LogEntry> {
        let entries = self.lock();
        entries.iter().rev().take(count).rev().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Custom writer that captures logs to the ring buffer and optionally echoes them to stderr
#[derive(Clone)]
pub struct RingBufferWriter {
    buffer: LogRingBuffer,
    echo_stderr: bool,
}

impl RingBufferWriter {
    pub fn new(buffer: LogRingBuffer) -> Self {
        Self {
            buffer,
            echo_stderr: false,
        }
    }

    pub fn with_stderr(mut self) -> Self {
        self.echo_stderr = true;
        self
    }
}

impl Write for RingBufferWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(message) = std::str::from_utf8(buf) {
            let message = message.trim();
            if !message.is_empty() {
                self.buffer.push(LogEntry::parse(message));
                if self.echo_stderr {
                    let mut stderr = std::io::stderr().lock();
                    writeln!(stderr, "{}", message)?;
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if self.echo_stderr {
            std::io::stderr().flush()?;
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for RingBufferWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Global log buffer accessible throughout the application
static LOG_BUFFER: OnceLock<LogRingBuffer> = OnceLock::new();

/// Initialize the global log buffer
pub fn init_log_buffer() -> LogRingBuffer {
    LOG_BUFFER.get_or_init(LogRingBuffer::new).clone()
}

/// Get the global log buffer
pub fn get_log_buffer() -> Option<LogRingBuffer> {
    LOG_BUFFER.get().cloned()
}

/// Initialize tracing: `RUST_LOG` wins, otherwise `default_filter`.
/// Every line lands in the global ring buffer; `echo_stderr` also prints it.
/// Calling this twice keeps the first subscriber.
pub fn init_tracing(default_filter: &str, echo_stderr: bool) -> LogRingBuffer {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let buffer = init_log_buffer();
    let mut writer = RingBufferWriter::new(buffer.clone());
    if echo_stderr {
        writer = writer.with_stderr();
    }

    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .without_time() // Entries carry their own timestamps
        .compact();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
    {
        tracing::info!(target: "grid_engine", "Logging initialized");
    }
    buffer
}

/// Convenience macros for common operations
#[macro_export]
macro_rules! trace_command {
    ($command:expr) => {
        tracing::debug!(target: "command", "Dispatching: {:?}", $command);
    };
}

#[macro_export]
macro_rules! trace_query {
    ($query:expr) => {
        tracing::debug!(target: "query", "Computing view: {}", $query);
    };
}
