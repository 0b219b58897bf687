// crates/vireo-media/src/software.rs
//
// Software playback: one audio decoder and one video decoder, each owning
// its own demux of the same URL. Controls fan out to both; each decoder
// drives its own timing (the audio sink's inherent rate makes audio the
// master by construction), so no cross-decoder sync runs here.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::debug;

use vireo_core::{
    AudioSink, EventSink, MediaParam, MediaParameters, Player, VideoSink,
};

use crate::decoder::{Decoder, MediaKind};

pub struct SoftwarePlayer {
    video: Decoder,
    audio: Decoder,
}

impl SoftwarePlayer {
    /// Build both decoders and hand each its sink. Workers spawn on the
    /// first `play()`; media parameters become available once each decoder
    /// reports `DecoderReady`.
    pub fn init(
        url: &str,
        video_sink: Box<dyn VideoSink>,
        audio_sink: Box<dyn AudioSink>,
    ) -> Result<Self> {
        if url.is_empty() {
            return Err(anyhow!("empty media url"));
        }
        let video = Decoder::new(url, MediaKind::Video);
        let audio = Decoder::new(url, MediaKind::Audio);
        video.set_video_sink(video_sink);
        audio.set_audio_sink(audio_sink);
        debug!("[software] player created for {url}");
        Ok(SoftwarePlayer { video, audio })
    }

    pub fn duration_seconds(&self) -> f64 {
        self.video.duration_seconds()
    }

    /// Playback progress, read from the audio decoder's clock (the master);
    /// falls back to video for silent files.
    pub fn position_seconds(&self) -> f64 {
        let position = self.audio.position_seconds();
        if position > 0.0 {
            position
        } else {
            self.video.position_seconds()
        }
    }

    pub fn media_params(&self) -> Option<MediaParameters> {
        self.video.media_params()
    }
}

impl Player for SoftwarePlayer {
    fn play(&mut self) {
        self.video.start();
        self.audio.start();
    }

    fn pause(&mut self) {
        self.video.pause();
        self.audio.pause();
    }

    fn stop(&mut self) {
        self.video.stop();
        self.audio.stop();
    }

    fn seek(&mut self, position: f32) {
        self.video.seek(position);
        self.audio.seek(position);
    }

    fn get_param(&self, param: MediaParam) -> i64 {
        self.video
            .media_params()
            .map(|p| p.get(param))
            .unwrap_or(0)
    }

    fn set_event_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.video.set_event_sink(Arc::clone(&sink));
        self.audio.set_event_sink(sink);
    }

    fn uninit(&mut self) {
        // stop both before joining either, so neither worker waits out a
        // full pause poll while the other is being joined
        self.video.stop();
        self.audio.stop();
        self.video.uninit();
        self.audio.uninit();
    }
}

impl Drop for SoftwarePlayer {
    fn drop(&mut self) {
        self.uninit();
    }
}
