//! Kernel logging facade.
//!
//! Built on the `log` crate the way the rest of the pack reaches for it,
//! rather than hand-rolled `print!` macros: `log::info!`/`warn!`/`error!`
//! work anywhere in the crate once [`init`] installs a [`KernelLogger`].
//! The logger is backed by a [`LogSink`] trait so the freestanding build can
//! write to the 16550 serial port while hosted tests capture lines in a
//! buffer instead.

use core::fmt::Write as _;
use spin::Mutex;

pub use log::{debug, error, info, trace, warn, Level, LevelFilter};

/// Byte sink a [`KernelLogger`] writes formatted lines to.
pub trait LogSink: Send {
    fn write_line(&mut self, line: &str);
}

/// Serial (COM1) sink used by the freestanding build (`log-serial`, the
/// default backend — see `Cargo.toml`).
#[cfg(all(not(test), feature = "log-serial"))]
pub struct SerialSink;

#[cfg(all(not(test), feature = "log-serial"))]
impl LogSink for SerialSink {
    fn write_line(&mut self, line: &str) {
        let mut out = crate::arch::serial::writer();
        let _ = out.write_str(line);
        let _ = out.write_str("\n");
    }
}

/// Stdout sink for hosted tools (`log-std`) — mutually exclusive with
/// `log-serial` in a non-test build; hosted unit tests always use
/// [`BufferSink`] regardless of which backend feature is selected.
#[cfg(all(not(test), feature = "log-std", not(feature = "log-serial")))]
pub struct StdoutSink;

#[cfg(all(not(test), feature = "log-std", not(feature = "log-serial")))]
impl LogSink for StdoutSink {
    fn write_line(&mut self, line: &str) {
        std::println!("{line}");
    }
}

/// In-memory sink used by hosted tests; lines are appended for assertions.
#[cfg(test)]
pub struct BufferSink {
    pub lines: alloc::vec::Vec<alloc::string::String>,
}

#[cfg(test)]
impl BufferSink {
    pub const fn new() -> Self {
        Self { lines: alloc::vec::Vec::new() }
    }
}

#[cfg(test)]
impl LogSink for BufferSink {
    fn write_line(&mut self, line: &str) {
        std::println!("{line}");
        self.lines.push(alloc::string::String::from(line));
    }
}

struct KernelLogger {
    #[cfg(all(not(test), feature = "log-serial"))]
    sink: Mutex<SerialSink>,
    #[cfg(all(not(test), feature = "log-std", not(feature = "log-serial")))]
    sink: Mutex<StdoutSink>,
    #[cfg(test)]
    sink: Mutex<BufferSink>,
}

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut line = alloc::string::String::new();
        let _ = write!(
            line,
            "[{:<5} {}] {}",
            record.level(),
            record.target(),
            record.args()
        );
        self.sink.lock().write_line(&line);
    }

    fn flush(&self) {}
}

#[cfg(all(not(test), feature = "log-serial"))]
static LOGGER: KernelLogger = KernelLogger { sink: Mutex::new(SerialSink) };

#[cfg(all(not(test), feature = "log-std", not(feature = "log-serial")))]
static LOGGER: KernelLogger = KernelLogger { sink: Mutex::new(StdoutSink) };

#[cfg(test)]
static LOGGER: KernelLogger = KernelLogger { sink: Mutex::new(BufferSink::new()) };

/// Installs the kernel logger as the global `log` backend. Idempotent.
pub fn init(level: LevelFilter) {
    // `set_logger` errors if already installed (e.g. a second `System::new`
    // in the same process during tests); that's expected and harmless.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
