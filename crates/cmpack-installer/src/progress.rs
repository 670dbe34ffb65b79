/// Receiver for progress events emitted by the fetcher and the archive
/// extractor. `total` may be zero when the size is unknown up front.
pub trait ProgressSink {
    fn begin(&self, label: &str, total: u64);
    fn advance(&self, current: u64);
    fn finish(&self);
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn begin(&self, _label: &str, _total: u64) {}
    fn advance(&self, _current: u64) {}
    fn finish(&self) {}
}
