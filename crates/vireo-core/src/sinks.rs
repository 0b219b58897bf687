// crates/vireo-core/src/sinks.rs
//
// Host-implemented capabilities the engine renders and decodes through.
// There is no process-global render state anywhere: the host hands a sink
// value to the player, and the owning decoder worker is its only caller.

use std::time::Duration;

use crate::image::NativeImage;
use crate::params::StreamInfo;

/// How a video sink wants its frames delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderKind {
    /// Sink blits packed RGBA; the engine converts before handing off.
    DirectSurface,
    /// Sink uploads planar/semi-planar YUV itself (GPU path); the engine
    /// passes decoded planes through untouched.
    Accelerated,
}

/// Video output surface.
///
/// `init` receives the source geometry and answers with the geometry it
/// wants frames scaled to. `render` is called from the decoder worker in
/// monotonic PTS order (except across a seek); concurrent access to the
/// underlying surface is the sink's own concern.
pub trait VideoSink: Send {
    fn init(&mut self, src_width: u32, src_height: u32) -> (u32, u32);
    fn render(&mut self, image: &NativeImage);
    fn uninit(&mut self);
    fn kind(&self) -> RenderKind;
}

/// Audio output. Receives 44.1 kHz stereo s16 interleaved PCM.
///
/// `render` may block on the device's own buffer — that backpressure is what
/// makes the audio path the master clock. `clear_cache` drops buffered but
/// unplayed samples (called on seek).
pub trait AudioSink: Send {
    fn init(&mut self);
    fn render(&mut self, pcm: &[u8]);
    fn clear_cache(&mut self);
    fn uninit(&mut self);
}

/// Output slot handed back by a hardware decoder poll.
#[derive(Debug, Clone, Copy)]
pub struct HwOutputFrame {
    pub buffer_index: usize,
    /// Presentation timestamp in stream ticks, round-tripped from the
    /// packet queued into the codec.
    pub pts:          i64,
    /// False for config/side-data-only outputs that carry no picture.
    pub has_payload:  bool,
}

/// Result of one hardware dequeue poll.
#[derive(Debug, Clone, Copy)]
pub enum HwPoll {
    Frame(HwOutputFrame),
    TryAgain,
    OutputFormatChanged,
    OutputBuffersChanged,
}

/// A platform hardware video decoder (e.g. a MediaCodec-style codec bound
/// to an output surface). Input is annex-B framed compressed data; output
/// buffers are released straight to the surface.
pub trait HardwareVideoCodec: Send {
    /// Submit one compressed unit. Returns false when no input slot was
    /// available (the caller drops the packet and moves on).
    fn queue_input(&mut self, data: &[u8], pts: i64, key_frame: bool) -> Result<bool, String>;
    /// Poll for a decoded output buffer, waiting at most `timeout`.
    fn dequeue_output(&mut self, timeout: Duration) -> Result<HwPoll, String>;
    /// Return an output buffer; `render = true` presents it to the surface.
    fn release_output(&mut self, frame: &HwOutputFrame, render: bool) -> Result<(), String>;
    /// Drop all queued input and pending output (seek).
    fn flush(&mut self) -> Result<(), String>;
}

/// Host-scoped asset access (packaged media the host resolves by name).
/// The engine never caches the handle beyond the player's lifetime; the
/// player must not outlive the scope that backs this source.
pub trait AssetSource: Send + Sync {
    fn open(&self, name: &str) -> std::io::Result<Vec<u8>>;
}

/// Builds the platform codec once the demuxer knows the video stream.
/// `assets` is whatever the host installed via `set_asset_source` —
/// factories that configure from packaged media read it, others ignore it.
pub trait HardwareCodecFactory: Send {
    fn create(
        &mut self,
        video: &StreamInfo,
        assets: Option<&dyn AssetSource>,
    ) -> Result<Box<dyn HardwareVideoCodec>, String>;
}
