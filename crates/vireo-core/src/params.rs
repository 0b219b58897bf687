// crates/vireo-core/src/params.rs
//
// Parameter value types exchanged with the host: the get_param kinds, the
// read-only media view published once a decoder is ready, demux-time stream
// metadata, and the recorder's encode configuration.

use serde::{Deserialize, Serialize};

/// Keys for [`crate::Player::get_param`]. Discriminants are host-contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MediaParam {
    VideoWidth    = 1,
    VideoHeight   = 2,
    /// Duration in whole seconds.
    VideoDuration = 3,
}

/// Audio channel layouts the engine deals in at its boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelLayout {
    #[default]
    Mono,
    Stereo,
}

impl ChannelLayout {
    /// Layout for a decoded channel count; anything beyond two channels is
    /// downmixed to stereo at the sink boundary.
    pub fn from_channels(channels: u16) -> Self {
        if channels >= 2 {
            ChannelLayout::Stereo
        } else {
            ChannelLayout::Mono
        }
    }

    pub fn channels(self) -> u16 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

/// PCM sample formats accepted from the host (interleaved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    S16,
    F32,
}

impl SampleFormat {
    /// Bytes per sample, single channel.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// Read-only media facts, materialized after decoder init completes.
///
/// A video decoder fills the video fields, an audio decoder the audio
/// fields; the shared-demux player fills both at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaParameters {
    pub video_width:    u32,
    pub video_height:   u32,
    pub duration_ms:    i64,
    pub channel_layout: ChannelLayout,
    pub sample_rate:    u32,
    pub channels:       u16,
}

impl MediaParameters {
    /// Value for one [`MediaParam`] key, in the host's units.
    pub fn get(&self, param: MediaParam) -> i64 {
        match param {
            MediaParam::VideoWidth => i64::from(self.video_width),
            MediaParam::VideoHeight => i64::from(self.video_height),
            MediaParam::VideoDuration => self.duration_ms / 1000,
        }
    }
}

/// Plain per-stream metadata extracted at demux init.
///
/// This is the decoupling seam for the hardware path: the platform decoder
/// is configured from this value instead of borrowing a live codec context,
/// so the hardware worker owns only hardware state.
#[derive(Debug, Clone, Default)]
pub struct StreamInfo {
    pub index:       usize,
    /// Rational tick scale as (numerator, denominator); seconds = ticks × num/den.
    pub time_base:   (i32, i32),
    /// Nominal frame rate as (numerator, denominator). Zero for audio.
    pub frame_rate:  (i32, i32),
    pub width:       u32,
    pub height:      u32,
    pub sample_rate: u32,
    pub channels:    u16,
    pub duration_ms: i64,
    /// FFmpeg codec name (e.g. "h264"); the host maps it to its platform mime.
    pub codec:       String,
    /// Codec-specific config bytes (SPS/PPS etc.) for hardware configure.
    pub extradata:   Vec<u8>,
}

impl StreamInfo {
    /// Ticks → milliseconds for this stream. Invalid time bases yield 0.
    pub fn ticks_to_ms(&self, ticks: i64) -> f64 {
        let (num, den) = self.time_base;
        if num <= 0 || den <= 0 || ticks < 0 {
            return 0.0;
        }
        ticks as f64 * num as f64 / den as f64 * 1000.0
    }
}

/// Video half of a recorder job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VideoEncodeParams {
    pub width:    u32,
    pub height:   u32,
    /// Target bit rate in bits/s. 0 picks a default from the frame geometry.
    pub bit_rate: i64,
    pub fps:      u32,
}

/// Audio half of a recorder job; describes the PCM the host will push.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioEncodeParams {
    pub sample_rate:    u32,
    pub channel_layout: ChannelLayout,
    pub sample_format:  SampleFormat,
}

/// Complete description of a recording job. At least one side must be set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecorderParams {
    pub video: Option<VideoEncodeParams>,
    pub audio: Option<AudioEncodeParams>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_layout_from_decoded_count() {
        assert_eq!(ChannelLayout::from_channels(0), ChannelLayout::Mono);
        assert_eq!(ChannelLayout::from_channels(1), ChannelLayout::Mono);
        assert_eq!(ChannelLayout::from_channels(2), ChannelLayout::Stereo);
        // 5.1 and friends land on stereo at the sink boundary
        assert_eq!(ChannelLayout::from_channels(6), ChannelLayout::Stereo);
    }

    #[test]
    fn get_param_units() {
        let p = MediaParameters {
            video_width: 1920,
            video_height: 1080,
            duration_ms: 10_500,
            channel_layout: ChannelLayout::Stereo,
            sample_rate: 44_100,
            channels: 2,
        };
        assert_eq!(p.get(MediaParam::VideoWidth), 1920);
        assert_eq!(p.get(MediaParam::VideoHeight), 1080);
        // duration is reported in whole seconds
        assert_eq!(p.get(MediaParam::VideoDuration), 10);
    }

    #[test]
    fn ticks_to_ms_guards_bad_time_base() {
        let mut info = StreamInfo {
            time_base: (1, 1000),
            ..Default::default()
        };
        assert_eq!(info.ticks_to_ms(2500), 2500.0);
        info.time_base = (0, 1000);
        assert_eq!(info.ticks_to_ms(2500), 0.0);
        info.time_base = (1, 1000);
        assert_eq!(info.ticks_to_ms(-40), 0.0);
    }
}
