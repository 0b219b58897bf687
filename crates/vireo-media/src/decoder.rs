// crates/vireo-media/src/decoder.rs
//
// One decoding worker per stream: owns its demux, its codec, its output
// adapter and its clock. The host-facing handle only flips control state —
// every blocking wait lives on the worker thread, and every wait observes
// Stopped within one 10 ms poll interval.
//
// Worker state machine per loop tick:
//   pause-wait (clock base compensated) → stop check → pending-seek check →
//   fetch packet → submit + drain frames → sink.
// End-of-stream parks the worker in Paused so the host can seek backwards;
// only Stopped ends the thread.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::media::Type;
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::frame::video::Video as VideoFrame;
use tracing::{debug, error, warn};

use vireo_core::{
    AudioSink, ChannelLayout, EventSink, MediaParameters, NullEventSink, PlayerMessage,
    PlayerState, VideoSink,
};

use crate::clock::{now_ms, MediaClock};
use crate::convert::{AudioResampler, VideoAdapter};
use crate::helpers::seek::seek_to_micros;

/// Which stream of the container this decoder owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    fn label(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Pause poll interval; also the cancellation observation bound.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Pacing sleep slice, same bound.
const PACE_SLICE_MS: f64 = 10.0;

// ── Control block shared between handle and worker ────────────────────────────

struct Control {
    state:        PlayerState,
    pending_seek: Option<f64>,
}

struct DecoderShared {
    control:    Mutex<Control>,
    cond:       Condvar,
    clock:      MediaClock,
    params:     Mutex<Option<MediaParameters>>,
    events:     Mutex<Arc<dyn EventSink>>,
    video_sink: Mutex<Option<Box<dyn VideoSink>>>,
    audio_sink: Mutex<Option<Box<dyn AudioSink>>>,
}

impl DecoderShared {
    fn state(&self) -> PlayerState {
        self.control.lock().unwrap().state
    }

    fn set_state(&self, next: PlayerState) {
        let mut control = self.control.lock().unwrap();
        if control.state.can_transition(next) {
            control.state = next;
        }
        self.cond.notify_all();
    }

    fn seek_pending(&self) -> bool {
        self.control.lock().unwrap().pending_seek.is_some()
    }

    fn take_seek(&self) -> Option<f64> {
        self.control.lock().unwrap().pending_seek.take()
    }

    fn events(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.events.lock().unwrap())
    }
}

// ── Presentation pacing ───────────────────────────────────────────────────────

/// Self-pacing against the wall clock: the first frame pins a start base,
/// later frames sleep until `pts` worth of wall time has elapsed. Paused
/// time is added to the base so the schedule survives pauses intact.
#[derive(Default)]
struct Pacer {
    start_base: Option<f64>,
}

impl Pacer {
    fn wait<F: Fn() -> bool>(&mut self, pts_ms: f64, abort: F) {
        let now = now_ms();
        let base = *self.start_base.get_or_insert(now - pts_ms);
        let mut delay = pts_ms - (now - base);
        while delay > 0.0 && !abort() {
            let slice = delay.min(PACE_SLICE_MS);
            thread::sleep(Duration::from_secs_f64(slice / 1000.0));
            delay -= slice;
        }
    }

    fn shift(&mut self, delta_ms: f64) {
        if let Some(base) = &mut self.start_base {
            *base += delta_ms;
        }
    }

    fn reset(&mut self) {
        self.start_base = None;
    }
}

// ── Decoder handle ────────────────────────────────────────────────────────────

pub struct Decoder {
    kind:   MediaKind,
    url:    String,
    shared: Arc<DecoderShared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Decoder {
    pub fn new(url: &str, kind: MediaKind) -> Self {
        Decoder {
            kind,
            url: url.to_string(),
            shared: Arc::new(DecoderShared {
                control: Mutex::new(Control {
                    state: PlayerState::Unknown,
                    pending_seek: None,
                }),
                cond: Condvar::new(),
                clock: MediaClock::new(),
                params: Mutex::new(None),
                events: Mutex::new(Arc::new(NullEventSink)),
                video_sink: Mutex::new(None),
                audio_sink: Mutex::new(None),
            }),
            worker: None,
        }
    }

    pub fn set_video_sink(&self, sink: Box<dyn VideoSink>) {
        *self.shared.video_sink.lock().unwrap() = Some(sink);
    }

    pub fn set_audio_sink(&self, sink: Box<dyn AudioSink>) {
        *self.shared.audio_sink.lock().unwrap() = Some(sink);
    }

    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.shared.events.lock().unwrap() = sink;
    }

    /// First call spawns the worker; later calls resume from pause.
    pub fn start(&mut self) {
        let mut control = self.shared.control.lock().unwrap();
        match control.state {
            PlayerState::Unknown => {
                control.state = PlayerState::Playing;
                drop(control);
                let shared = Arc::clone(&self.shared);
                let url = self.url.clone();
                let kind = self.kind;
                self.worker = Some(thread::spawn(move || run_worker(shared, url, kind)));
            }
            PlayerState::Paused => {
                control.state = PlayerState::Playing;
                self.shared.cond.notify_all();
            }
            PlayerState::Playing | PlayerState::Stopped => {}
        }
    }

    pub fn pause(&self) {
        let mut control = self.shared.control.lock().unwrap();
        if control.state == PlayerState::Playing {
            control.state = PlayerState::Paused;
        }
    }

    pub fn resume(&self) {
        let mut control = self.shared.control.lock().unwrap();
        if control.state == PlayerState::Paused {
            control.state = PlayerState::Playing;
            self.shared.cond.notify_all();
        }
    }

    pub fn stop(&self) {
        self.shared.set_state(PlayerState::Stopped);
    }

    /// Store a normalized seek target in [0, 1]; consumed by the worker on
    /// its next tick. Seeking while paused (including parked at
    /// end-of-stream) resumes playback.
    pub fn seek(&self, position: f32) {
        let mut control = self.shared.control.lock().unwrap();
        if control.state == PlayerState::Stopped {
            return;
        }
        control.pending_seek = Some(f64::from(position.clamp(0.0, 1.0)));
        if control.state == PlayerState::Paused {
            control.state = PlayerState::Playing;
        }
        self.shared.cond.notify_all();
    }

    pub fn media_params(&self) -> Option<MediaParameters> {
        *self.shared.params.lock().unwrap()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.media_params()
            .map(|p| p.duration_ms as f64 / 1000.0)
            .unwrap_or(0.0)
    }

    /// Current playback position from this decoder's clock.
    pub fn position_seconds(&self) -> f64 {
        self.shared.clock.get().max(0.0) / 1000.0
    }

    /// Stop and join the worker. Safe to call more than once.
    pub fn uninit(&mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("[decoder] {} worker panicked", self.kind.label());
            }
        }
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.uninit();
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

enum StreamCodec {
    Video(ffmpeg::decoder::Video),
    Audio(ffmpeg::decoder::Audio),
}

impl StreamCodec {
    fn flush(&mut self) {
        match self {
            StreamCodec::Video(dec) => dec.flush(),
            StreamCodec::Audio(dec) => dec.flush(),
        }
    }
}

struct OpenedStream {
    ictx:         ffmpeg::format::context::Input,
    stream_index: usize,
    time_base:    f64,
    duration_ms:  i64,
    codec:        StreamCodec,
}

fn open_stream(url: &str, kind: MediaKind) -> Result<OpenedStream> {
    ffmpeg::init().context("initialize ffmpeg")?;
    let ictx = ffmpeg::format::input(&url).with_context(|| format!("open '{url}'"))?;

    let media_type = match kind {
        MediaKind::Audio => Type::Audio,
        MediaKind::Video => Type::Video,
    };
    let stream = ictx
        .streams()
        .best(media_type)
        .ok_or_else(|| anyhow!("no {} stream in '{url}'", kind.label()))?;
    let stream_index = stream.index();
    let time_base = f64::from(stream.time_base());

    // Container duration in µs; fall back to the stream's own duration.
    let duration_ms = if ictx.duration() > 0 {
        ictx.duration() / 1000
    } else {
        (stream.duration().max(0) as f64 * time_base * 1000.0) as i64
    };

    let dec_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .context("build codec context from stream parameters")?;
    let codec = match kind {
        MediaKind::Video => {
            StreamCodec::Video(dec_ctx.decoder().video().context("open video decoder")?)
        }
        MediaKind::Audio => {
            StreamCodec::Audio(dec_ctx.decoder().audio().context("open audio decoder")?)
        }
    };

    Ok(OpenedStream {
        ictx,
        stream_index,
        time_base,
        duration_ms,
        codec,
    })
}

/// Output side of the worker: sink plus format adapter per kind.
enum Lane {
    Video {
        adapter: Option<VideoAdapter>,
        sink:    Option<Box<dyn VideoSink>>,
    },
    Audio {
        resampler: Option<AudioResampler>,
        sink:      Option<Box<dyn AudioSink>>,
    },
}

impl Lane {
    fn build(kind: MediaKind, opened: &OpenedStream, shared: &DecoderShared) -> Lane {
        match (kind, &opened.codec) {
            (MediaKind::Video, StreamCodec::Video(dec)) => {
                let mut sink = shared.video_sink.lock().unwrap().take();
                let adapter = sink.as_mut().and_then(|sink| {
                    let (dst_w, dst_h) = sink.init(dec.width(), dec.height());
                    match VideoAdapter::new(
                        sink.kind(),
                        dec.format(),
                        dec.width(),
                        dec.height(),
                        dst_w,
                        dst_h,
                    ) {
                        Ok(adapter) => Some(adapter),
                        Err(e) => {
                            error!("[decoder] video adapter: {e:#}");
                            None
                        }
                    }
                });
                if sink.is_none() {
                    warn!("[decoder] no video sink set; frames will be decoded and dropped");
                }
                Lane::Video { adapter, sink }
            }
            _ => {
                let mut sink = shared.audio_sink.lock().unwrap().take();
                if let Some(sink) = sink.as_mut() {
                    sink.init();
                } else {
                    warn!("[decoder] no audio sink set; frames will be decoded and dropped");
                }
                // resampler is built lazily from the first decoded frame,
                // which carries the authoritative input layout
                Lane::Audio {
                    resampler: None,
                    sink,
                }
            }
        }
    }

    fn on_seek(&mut self) {
        if let Lane::Audio {
            sink: Some(sink), ..
        } = self
        {
            sink.clear_cache();
        }
    }

    fn uninit(&mut self) {
        match self {
            Lane::Video { sink, .. } => {
                if let Some(sink) = sink {
                    sink.uninit();
                }
            }
            Lane::Audio { sink, .. } => {
                if let Some(sink) = sink {
                    sink.uninit();
                }
            }
        }
    }
}

fn publish_params(shared: &DecoderShared, opened: &OpenedStream) {
    let mut params = MediaParameters {
        duration_ms: opened.duration_ms,
        ..Default::default()
    };
    match &opened.codec {
        StreamCodec::Video(dec) => {
            params.video_width = dec.width();
            params.video_height = dec.height();
        }
        StreamCodec::Audio(dec) => {
            params.sample_rate = dec.rate();
            params.channels = dec.ch_layout().channels() as u16;
            params.channel_layout = ChannelLayout::from_channels(params.channels);
        }
    }
    *shared.params.lock().unwrap() = Some(params);
}

/// Ticks → milliseconds. `None` marks an unusable pts (missing, negative,
/// or a degenerate time base): presentation treats it as 0 and the clock is
/// left alone so it never regresses.
fn pts_to_ms(pts: Option<i64>, time_base: f64) -> Option<f64> {
    match pts {
        Some(ticks) if ticks >= 0 && time_base > 0.0 => Some(ticks as f64 * time_base * 1000.0),
        _ => None,
    }
}

/// Pause gate. Returns false once the worker must exit. Each paused poll
/// shifts the clock base and the pacing base by the waited interval so
/// neither drifts across the pause.
fn idle_gate(shared: &DecoderShared, pacer: &mut Pacer) -> bool {
    loop {
        let control = shared.control.lock().unwrap();
        match control.state {
            PlayerState::Stopped => return false,
            PlayerState::Paused => {
                let before = now_ms();
                let (guard, _) = shared.cond.wait_timeout(control, POLL_INTERVAL).unwrap();
                drop(guard);
                let waited = now_ms() - before;
                shared.clock.advance_base(waited);
                pacer.shift(waited);
            }
            _ => return true,
        }
    }
}

enum Fetch {
    Packet(ffmpeg::Packet),
    Skip,
    Eof,
}

fn run_worker(shared: Arc<DecoderShared>, url: String, kind: MediaKind) {
    let events = shared.events();

    let mut opened = match open_stream(&url, kind) {
        Ok(opened) => opened,
        Err(e) => {
            error!("[decoder] {} init failed: {e:#}", kind.label());
            events.emit(PlayerMessage::DecoderInitError, 0.0);
            return;
        }
    };
    publish_params(&shared, &opened);
    events.emit(PlayerMessage::DecoderReady, 0.0);
    debug!("[decoder] {} ready: {url}", kind.label());

    let mut lane = Lane::build(kind, &opened, &shared);
    let mut pacer = Pacer::default();

    loop {
        if !idle_gate(&shared, &mut pacer) {
            break;
        }

        if let Some(position) = shared.take_seek() {
            let target_us = (position * opened.duration_ms as f64 * 1000.0) as i64;
            if seek_to_micros(&mut opened.ictx, target_us, kind.label()) {
                opened.codec.flush();
                shared.clock.reset(now_ms());
                pacer.reset();
                lane.on_seek();
                debug!("[decoder] {} seek → {target_us}µs", kind.label());
            }
        }

        let fetched = match opened.ictx.packets().next() {
            None => Fetch::Eof,
            Some(Err(e)) => {
                warn!("[decoder] {} read error: {e}", kind.label());
                Fetch::Eof
            }
            Some(Ok((stream, packet))) => {
                if stream.index() == opened.stream_index {
                    Fetch::Packet(packet)
                } else {
                    Fetch::Skip
                }
            }
        };

        match fetched {
            Fetch::Eof => {
                // park in Paused, not Stopped, so the host may seek back
                debug!("[decoder] {} end of stream", kind.label());
                let mut control = shared.control.lock().unwrap();
                if control.state == PlayerState::Playing {
                    control.state = PlayerState::Paused;
                }
            }
            Fetch::Skip => {}
            Fetch::Packet(packet) => {
                decode_packet(&shared, &mut opened, &mut lane, &packet, &mut pacer, &events);
            }
        }
    }

    lane.uninit();
    events.emit(PlayerMessage::DecoderDone, 0.0);
    debug!("[decoder] {} worker done", kind.label());
}

fn decode_packet(
    shared: &DecoderShared,
    opened: &mut OpenedStream,
    lane: &mut Lane,
    packet: &ffmpeg::Packet,
    pacer: &mut Pacer,
    events: &Arc<dyn EventSink>,
) {
    let time_base = opened.time_base;
    match (&mut opened.codec, lane) {
        (StreamCodec::Video(dec), Lane::Video { adapter, sink }) => {
            if let Err(e) = dec.send_packet(packet) {
                warn!("[decoder] video send_packet: {e}");
                return;
            }
            let mut frame = VideoFrame::empty();
            while dec.receive_frame(&mut frame).is_ok() {
                // side-data-only output: nothing to present, clock untouched
                if frame.width() == 0 || frame.height() == 0 {
                    continue;
                }
                let pts_ms = pts_to_ms(frame.pts(), time_base);
                if let Some(pts_ms) = pts_ms {
                    shared.clock.set(pts_ms, now_ms());
                }
                let effective = pts_ms.unwrap_or(0.0);
                pacer.wait(effective, || {
                    shared.state() != PlayerState::Playing || shared.seek_pending()
                });
                if let (Some(adapter), Some(sink)) = (adapter.as_mut(), sink.as_mut()) {
                    match adapter.convert(&frame) {
                        Ok(image) => {
                            sink.render(&image);
                            events.emit(PlayerMessage::RequestRender, 0.0);
                        }
                        Err(e) => warn!("[decoder] video convert: {e:#}"),
                    }
                }
                if !shared.seek_pending() {
                    events.emit(PlayerMessage::DecodingTime, effective as f32);
                }
            }
        }
        (StreamCodec::Audio(dec), Lane::Audio { resampler, sink }) => {
            if let Err(e) = dec.send_packet(packet) {
                warn!("[decoder] audio send_packet: {e}");
                return;
            }
            let mut frame = AudioFrame::empty();
            while dec.receive_frame(&mut frame).is_ok() {
                if frame.samples() == 0 {
                    continue;
                }
                let pts_ms = pts_to_ms(frame.pts(), time_base);
                if let Some(pts_ms) = pts_ms {
                    shared.clock.set(pts_ms, now_ms());
                }
                if let Some(sink) = sink.as_mut() {
                    if resampler.is_none() {
                        match AudioResampler::new(frame.format(), frame.ch_layout(), frame.rate())
                        {
                            Ok(r) => *resampler = Some(r),
                            Err(e) => {
                                warn!("[decoder] audio resampler: {e:#}");
                                continue;
                            }
                        }
                    }
                    if let Some(resampler) = resampler.as_mut() {
                        match resampler.resample(&frame) {
                            // render may block on the device buffer — that
                            // backpressure is the audio path's pacing
                            Ok(pcm) if !pcm.is_empty() => sink.render(&pcm),
                            Ok(_) => {}
                            Err(e) => warn!("[decoder] audio resample: {e:#}"),
                        }
                    }
                }
                if !shared.seek_pending() {
                    events.emit(PlayerMessage::DecodingTime, pts_ms.unwrap_or(0.0) as f32);
                }
            }
        }
        // kind and lane are built together; the pairs cannot disagree
        _ => unreachable!("decoder lane mismatch"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_to_ms_handles_invalid_inputs() {
        assert_eq!(pts_to_ms(Some(2500), 1.0 / 1000.0), Some(2500.0));
        assert_eq!(pts_to_ms(Some(-1), 1.0 / 1000.0), None);
        assert_eq!(pts_to_ms(None, 1.0 / 1000.0), None);
        assert_eq!(pts_to_ms(Some(100), 0.0), None);
    }

    #[test]
    fn pacer_shift_preserves_schedule() {
        let mut pacer = Pacer::default();
        // first wait pins the base without sleeping
        pacer.wait(0.0, || true);
        let base = pacer.start_base.unwrap();
        pacer.shift(250.0);
        assert_eq!(pacer.start_base.unwrap(), base + 250.0);
        pacer.reset();
        assert!(pacer.start_base.is_none());
    }

    #[test]
    fn seek_while_stopped_is_ignored() {
        let decoder = Decoder::new("nonexistent.mp4", MediaKind::Video);
        decoder.stop();
        decoder.seek(0.5);
        assert!(!decoder.shared.seek_pending());
    }

    #[test]
    fn seek_resumes_from_pause() {
        let decoder = Decoder::new("nonexistent.mp4", MediaKind::Video);
        {
            let mut control = decoder.shared.control.lock().unwrap();
            control.state = PlayerState::Paused;
        }
        decoder.seek(0.25);
        assert_eq!(decoder.shared.state(), PlayerState::Playing);
        assert_eq!(decoder.shared.take_seek(), Some(0.25));
    }
}
