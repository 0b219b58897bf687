// crates/vireo-core/src/lib.rs
//
// Types that cross the boundary between the vireo-media engine and its host.
// No FFmpeg, no threads — just plain data and the capability traits the host
// implements (sinks, hardware codec, assets) or consumes (Player, events).

pub mod events;
pub mod image;
pub mod params;
pub mod player;
pub mod sinks;
pub mod state;

pub use events::{EventSink, NullEventSink, PlayerMessage};
pub use image::{ImageFormat, NativeImage, PcmFrame};
pub use params::{
    AudioEncodeParams, ChannelLayout, MediaParam, MediaParameters, RecorderParams, SampleFormat,
    StreamInfo, VideoEncodeParams,
};
pub use player::Player;
pub use sinks::{
    AssetSource, AudioSink, HardwareCodecFactory, HardwareVideoCodec, HwOutputFrame, HwPoll,
    RenderKind, VideoSink,
};
pub use state::PlayerState;
