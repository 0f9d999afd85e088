use std::io::{self, Write};

use indicatif::MultiProgress;
use tracing_subscriber::{
    fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

pub mod app;
pub mod cli;

pub use app::App;
pub use cli::Cli;

const DEFAULT_LOG_FILTER: &str = "ftr=debug,ftr_receiver=debug";

/// Install the global tracing subscriber.
///
/// With progress bars, log lines are printed above the bars; otherwise they
/// go to stderr without color. `RUST_LOG` overrides the default filter.
pub fn init_logging(progress: Option<&MultiProgress>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    match progress {
        Some(bars) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(ProgressLog {
                        bars: bars.clone(),
                    }),
            )
            .init(),
        None => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(io::stderr),
            )
            .init(),
    }
}

/// Hands out one line buffer per log event.
struct ProgressLog {
    bars: MultiProgress,
}

impl<'a> MakeWriter<'a> for ProgressLog {
    type Writer = ProgressLogLine;

    fn make_writer(&'a self) -> Self::Writer {
        ProgressLogLine {
            bars: self.bars.clone(),
            buf: Vec::new(),
        }
    }
}

/// Collects a formatted event and prints it above the bars once complete.
struct ProgressLogLine {
    bars: MultiProgress,
    buf: Vec<u8>,
}

impl Write for ProgressLogLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        self.bars.println(text.trim_end())
    }
}

impl Drop for ProgressLogLine {
    fn drop(&mut self) {
        // Nowhere left to report a failed print.
        let _ = self.flush();
    }
}
