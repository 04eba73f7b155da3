//! Installation progress reporting
//!
//! The provisioner reports through [`ProgressSink`] so the same code drives
//! a terminal progress bar, a silent run, or a test recorder.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::Read;

/// Receiver of installation progress
pub trait ProgressSink {
    /// A new stage starts; `total` is its size in bytes when known
    fn begin(&mut self, stage: &str, total: Option<u64>);
    /// Absolute progress within the current stage
    fn update(&mut self, current: u64);
    /// The current stage completed
    fn finish(&mut self);
}

/// Discards all progress
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn begin(&mut self, _stage: &str, _total: Option<u64>) {}
    fn update(&mut self, _current: u64) {}
    fn finish(&mut self) {}
}

/// Terminal progress on stderr: a byte bar for sized stages, a spinner
/// otherwise.
#[derive(Debug, Default)]
pub struct BarProgress {
    bar: Option<ProgressBar>,
}

impl BarProgress {
    /// Create a sink that draws nothing until the first stage begins
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for BarProgress {
    fn begin(&mut self, stage: &str, total: Option<u64>) {
        self.finish();
        let pb = match total {
            Some(size) => {
                let pb = ProgressBar::new(size);
                pb.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} {msg} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::with_template("{spinner:.green} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                pb.enable_steady_tick(std::time::Duration::from_millis(120));
                pb
            }
        };
        pb.set_draw_target(ProgressDrawTarget::stderr());
        pb.set_message(stage.to_string());
        self.bar = Some(pb);
    }

    fn update(&mut self, current: u64) {
        if let Some(ref pb) = self.bar {
            pb.set_position(current);
        }
    }

    fn finish(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.finish_and_clear();
        }
    }
}

impl Drop for BarProgress {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Reader adapter reporting the running byte count to a sink
pub struct ProgressReader<'a, R> {
    inner: R,
    sink: &'a mut dyn ProgressSink,
    read: u64,
}

impl<R> std::fmt::Debug for ProgressReader<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReader")
            .field("read", &self.read)
            .finish_non_exhaustive()
    }
}

impl<'a, R: Read> ProgressReader<'a, R> {
    /// Wrap `inner`, reporting to `sink`
    pub fn new(inner: R, sink: &'a mut dyn ProgressSink) -> Self {
        Self {
            inner,
            sink,
            read: 0,
        }
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        self.sink.update(self.read);
        Ok(n)
    }
}
