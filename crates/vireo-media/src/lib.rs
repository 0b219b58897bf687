// crates/vireo-media/src/lib.rs
//
// The vireo playback/capture engine: demux → packet queue → decode →
// render/encode, with audio-master A/V sync and a three-to-four worker
// concurrency model. Hosts drive it through the capabilities in vireo-core.

pub mod clock;
pub mod convert;
pub mod decoder;
pub mod hardware;
pub mod packet_queue;
pub mod recorder;
pub mod software;
pub mod sync;
mod helpers; // internal — not pub, not re-exported

pub use decoder::{Decoder, MediaKind};
pub use hardware::HardwarePlayer;
pub use recorder::Recorder;
pub use software::SoftwarePlayer;
pub use vireo_core::{
    AudioEncodeParams, MediaParam, Player, PlayerMessage, PlayerState, RecorderParams,
    VideoEncodeParams,
};
