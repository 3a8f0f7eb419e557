//! Terminal progress for crawls, plus a log writer that keeps the bar pinned.

use crate::crawl::{CrawlService, CrawlStatus};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

static MULTI_PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

fn multi_progress() -> &'static MultiProgress {
    MULTI_PROGRESS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

/// Progress bar mirroring a [`CrawlStatus`]
pub struct CrawlProgress {
    bar: ProgressBar,
}

impl CrawlProgress {
    pub fn new() -> Self {
        let bar = multi_progress().add(ProgressBar::new(0));
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner} [{bar:30}] {pos}/{len} {wide_msg}",
        ) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn update(&self, status: &CrawlStatus) {
        self.bar.set_length(status.total as u64);
        self.bar.set_position(status.progress as u64);
        let label = status.current_item_label.as_deref().unwrap_or("");
        self.bar.set_message(format!(
            "ok {} / failed {}  {}",
            status.success_count, status.failed_count, label
        ));
    }

    pub fn finish(&self, status: &CrawlStatus) {
        self.update(status);
        self.bar.finish_and_clear();
    }
}

impl Default for CrawlProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll the orchestrator until the current run ends, rendering a bar when asked
pub async fn follow_crawl(crawl: &CrawlService, show_bar: bool, poll: Duration) -> CrawlStatus {
    let progress = show_bar.then(CrawlProgress::new);
    loop {
        let status = crawl.status();
        if !status.is_running {
            if let Some(progress) = &progress {
                progress.finish(&status);
            }
            return status;
        }
        if let Some(progress) = &progress {
            progress.update(&status);
        }
        tokio::select! {
            _ = crawl.wait_idle() => {}
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

/// `MakeWriter` for the fmt layer that prints whole lines above the bar
#[derive(Default, Clone)]
pub struct LogWriterFactory;

pub struct LogWriter {
    pending: String,
}

impl LogWriter {
    fn emit(line: &str) {
        // Best effort
        let _ = multi_progress().println(line.trim_end_matches('\r'));
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.push_str(&String::from_utf8_lossy(buf));
        while let Some(idx) = self.pending.find('\n') {
            Self::emit(&self.pending[..idx]);
            self.pending.drain(..=idx);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            Self::emit(&self.pending);
            self.pending.clear();
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        // Drop cannot report errors
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            pending: String::new(),
        }
    }
}
