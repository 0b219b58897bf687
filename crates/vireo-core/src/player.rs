// crates/vireo-core/src/player.rs
//
// The playback capability the host drives. Construction (`init`) lives on
// the concrete player types because their collaborator sets differ — the
// software player takes sinks, the hardware player also takes a codec
// factory — but everything after init is uniform and dynamically
// dispatchable.

use std::sync::Arc;

use crate::events::EventSink;
use crate::params::MediaParam;
use crate::sinks::AssetSource;

/// Control surface of a running player.
///
/// Call order is `init → play → (pause/play/seek)* → stop → uninit`; `play`
/// doubles as resume. All controls return immediately — the work happens on
/// the player's own threads. `uninit` joins every worker before releasing
/// anything a worker could still touch.
pub trait Player: Send {
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    /// Normalized target position in [0, 1]. Consumed by the demux loop on
    /// its next tick; seeking while paused (including after end-of-stream)
    /// resumes playback.
    fn seek(&mut self, position: f32);
    fn get_param(&self, param: MediaParam) -> i64;
    /// Install the event receiver. Must happen before `play`.
    fn set_event_sink(&mut self, sink: Arc<dyn EventSink>);
    /// Hand over host asset access. Players that read packaged assets keep
    /// it for their lifetime; others ignore it.
    fn set_asset_source(&mut self, _source: Arc<dyn AssetSource>) {}
    fn uninit(&mut self);
}
