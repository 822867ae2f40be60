use crate::error::Result;

/// Identifies one started playback source on an output context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Suspended,
    Closed,
}

/// A playback device that can sound one buffer at a time.
///
/// Natural completion of a source is reported asynchronously with its
/// [`SourceId`] on the channel the context was opened with. A source that is
/// stopped through [`OutputContext::stop`] never reports completion.
pub trait OutputContext: Send + Sync {
    fn state(&self) -> ContextState;

    /// Sample rate the context renders at.
    fn sample_rate(&self) -> u32;

    /// Start sounding `samples` (mono, normalized) as source `id`.
    fn start(&self, id: SourceId, samples: Vec<f32>) -> Result<()>;

    /// Stop and disconnect a source immediately. Unknown ids are ignored.
    fn stop(&self, id: SourceId);

    fn suspend(&self);

    fn resume(&self);

    /// Release the device. Further calls are no-ops.
    fn close(&self);
}
