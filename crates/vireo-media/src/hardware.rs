// crates/vireo-media/src/hardware.rs
//
// Hardware-assisted playback: one shared demux feeding two packet queues,
// a video worker that drives a platform hardware decoder (annex-B framed
// input, surface-released output), and a software audio worker. Explicit
// A/V sync aligns video to the audio clock.
//
// Lock order: the demux seek path takes the video lane lock before the
// audio lane lock — it is the only path that ever holds two lane locks.
// Workers take exactly their own lane lock; queue and clock internals are
// leaf locks acquired under a lane lock only, never the other way around.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::media::Type;
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::Rational;
use tracing::{debug, error, warn};

use vireo_core::{
    AssetSource, AudioSink, ChannelLayout, EventSink, HardwareCodecFactory, HardwareVideoCodec,
    HwPoll, MediaParam, MediaParameters, NullEventSink, Player, PlayerMessage, PlayerState,
    StreamInfo,
};

use crate::clock::{now_ms, MediaClock};
use crate::convert::AudioResampler;
use crate::helpers::annexb::AnnexBFilter;
use crate::helpers::seek::seek_to_micros;
use crate::packet_queue::{PacketQueue, Popped};
use crate::sync::AvSynchronizer;

/// Demux backpressure threshold on buffered video (seconds).
const MAX_BUFFERED_SECONDS: f64 = 0.5;
/// Poll interval for pause waits, queue pops and backpressure sleeps; also
/// the cancellation observation bound.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long one hardware output poll may wait.
const DEQUEUE_OUTPUT_TIMEOUT: Duration = Duration::from_millis(1);

// ── Shared state ──────────────────────────────────────────────────────────────

struct Control {
    state:        PlayerState,
    pending_seek: Option<f64>,
}

struct HwShared {
    control:     Mutex<Control>,
    cond:        Condvar,
    video_queue: PacketQueue,
    audio_queue: PacketQueue,
    video_clock: Arc<MediaClock>,
    audio_clock: Arc<MediaClock>,
    events:      Mutex<Arc<dyn EventSink>>,
    params:      Mutex<Option<MediaParameters>>,
}

impl HwShared {
    fn state(&self) -> PlayerState {
        self.control.lock().unwrap().state
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

    fn park_at_eof(&self) {
        let mut control = self.control.lock().unwrap();
        if control.state == PlayerState::Playing {
            control.state = PlayerState::Paused;
        }
    }

    /// Pause gate shared by all three workers. Returns false on Stopped.
    fn pause_gate(&self) -> bool {
        loop {
            let control = self.control.lock().unwrap();
            match control.state {
                PlayerState::Stopped => return false,
                PlayerState::Paused => {
                    let (guard, _) = self.cond.wait_timeout(control, POLL_INTERVAL).unwrap();
                    drop(guard);
                }
                _ => return true,
            }
        }
    }
}

/// Collaborators handed to the demux thread on first play.
struct Boot {
    factory:    Box<dyn HardwareCodecFactory>,
    audio_sink: Box<dyn AudioSink>,
    assets:     Option<Arc<dyn AssetSource>>,
}

/// Hardware decode state guarded by the video lane lock.
struct VideoLane {
    codec: Box<dyn HardwareVideoCodec>,
    bsf:   AnnexBFilter,
}

/// Software audio decode state guarded by the audio lane lock.
struct AudioLane {
    dec:       ffmpeg::decoder::Audio,
    resampler: Option<AudioResampler>,
}

// ── Player handle ─────────────────────────────────────────────────────────────

pub struct HardwarePlayer {
    url:    String,
    shared: Arc<HwShared>,
    boot:   Option<Boot>,
    demux:  Option<thread::JoinHandle<()>>,
}

impl HardwarePlayer {
    /// Stash the collaborators; all media work happens on the demux thread
    /// spawned by the first `play()`.
    pub fn init(
        url: &str,
        factory: Box<dyn HardwareCodecFactory>,
        audio_sink: Box<dyn AudioSink>,
    ) -> Result<Self> {
        if url.is_empty() {
            return Err(anyhow!("empty media url"));
        }
        Ok(HardwarePlayer {
            url: url.to_string(),
            shared: Arc::new(HwShared {
                control: Mutex::new(Control {
                    state: PlayerState::Unknown,
                    pending_seek: None,
                }),
                cond: Condvar::new(),
                video_queue: PacketQueue::new(),
                audio_queue: PacketQueue::new(),
                video_clock: Arc::new(MediaClock::new()),
                audio_clock: Arc::new(MediaClock::new()),
                events: Mutex::new(Arc::new(NullEventSink)),
                params: Mutex::new(None),
            }),
            boot: Some(Boot {
                factory,
                audio_sink,
                assets: None,
            }),
            demux: None,
        })
    }

    pub fn position_seconds(&self) -> f64 {
        self.shared.audio_clock.get().max(0.0) / 1000.0
    }
}

impl Player for HardwarePlayer {
    fn play(&mut self) {
        if self.demux.is_none() {
            let Some(boot) = self.boot.take() else {
                return; // already stopped and torn down
            };
            let shared = Arc::clone(&self.shared);
            let url = self.url.clone();
            self.demux = Some(thread::spawn(move || demux_thread(shared, url, boot)));
        } else {
            let mut control = self.shared.control.lock().unwrap();
            if control.state == PlayerState::Paused {
                control.state = PlayerState::Playing;
                self.shared.cond.notify_all();
            }
        }
    }

    fn pause(&mut self) {
        let mut control = self.shared.control.lock().unwrap();
        if control.state == PlayerState::Playing {
            control.state = PlayerState::Paused;
        }
    }

    fn stop(&mut self) {
        {
            let mut control = self.shared.control.lock().unwrap();
            control.state = PlayerState::Stopped;
        }
        self.shared.cond.notify_all();
        // wake any worker blocked on an empty queue
        self.shared.video_queue.stop();
        self.shared.audio_queue.stop();
    }

    fn seek(&mut self, position: f32) {
        let mut control = self.shared.control.lock().unwrap();
        if control.state == PlayerState::Stopped {
            return;
        }
        control.pending_seek = Some(f64::from(position.clamp(0.0, 1.0)));
        // seeking resumes playback, including from the end-of-stream park
        control.state = PlayerState::Playing;
        self.shared.cond.notify_all();
    }

    fn get_param(&self, param: MediaParam) -> i64 {
        (*self.shared.params.lock().unwrap())
            .map(|p| p.get(param))
            .unwrap_or(0)
    }

    fn set_event_sink(&mut self, sink: Arc<dyn EventSink>) {
        *self.shared.events.lock().unwrap() = sink;
    }

    fn set_asset_source(&mut self, source: Arc<dyn AssetSource>) {
        if let Some(boot) = self.boot.as_mut() {
            boot.assets = Some(source);
        }
    }

    fn uninit(&mut self) {
        self.stop();
        if let Some(demux) = self.demux.take() {
            if demux.join().is_err() {
                error!("[hwplayer] demux thread panicked");
            }
        }
    }
}

impl Drop for HardwarePlayer {
    fn drop(&mut self) {
        self.uninit();
    }
}

// ── Demux init ────────────────────────────────────────────────────────────────

fn stream_info(stream: &ffmpeg::Stream, duration_ms: i64) -> StreamInfo {
    let tb = stream.time_base();
    let rate = stream.rate();
    let params = stream.parameters();
    let (width, height, extradata) = unsafe {
        let p = params.as_ptr();
        let extradata = if (*p).extradata.is_null() || (*p).extradata_size <= 0 {
            Vec::new()
        } else {
            std::slice::from_raw_parts((*p).extradata, (*p).extradata_size as usize).to_vec()
        };
        ((*p).width.max(0) as u32, (*p).height.max(0) as u32, extradata)
    };
    StreamInfo {
        index: stream.index(),
        time_base: (tb.numerator(), tb.denominator()),
        frame_rate: (rate.numerator(), rate.denominator()),
        width,
        height,
        sample_rate: 0,
        channels: 0,
        duration_ms,
        codec: format!("{:?}", params.id()).to_ascii_lowercase(),
        extradata,
    }
}

struct DemuxInit {
    ictx:       ffmpeg::format::context::Input,
    video:      StreamInfo,
    audio:      StreamInfo,
    video_lane: VideoLane,
    audio_lane: AudioLane,
}

fn init_demux(url: &str, boot: &mut Boot) -> Result<DemuxInit> {
    ffmpeg::init().context("initialize ffmpeg")?;
    let ictx = ffmpeg::format::input(&url).with_context(|| format!("open '{url}'"))?;
    let duration_ms = ictx.duration().max(0) / 1000;

    let video_stream = ictx
        .streams()
        .best(Type::Video)
        .ok_or_else(|| anyhow!("no video stream in '{url}'"))?;
    let audio_stream = ictx
        .streams()
        .best(Type::Audio)
        .ok_or_else(|| anyhow!("no audio stream in '{url}'"))?;

    let video = stream_info(&video_stream, duration_ms);
    let mut audio = stream_info(&audio_stream, duration_ms);

    // length-prefixed NAL units → annex-B framing for the platform decoder
    let bsf = AnnexBFilter::new(&video_stream.parameters(), video_stream.time_base())?;

    let audio_ctx =
        ffmpeg::codec::context::Context::from_parameters(audio_stream.parameters())
            .context("build audio codec context")?;
    let dec = audio_ctx.decoder().audio().context("open audio decoder")?;
    audio.sample_rate = dec.rate();
    audio.channels = dec.ch_layout().channels() as u16;

    let codec = boot
        .factory
        .create(&video, boot.assets.as_deref())
        .map_err(|e| anyhow!("create hardware video codec: {e}"))?;

    Ok(DemuxInit {
        ictx,
        video,
        audio,
        video_lane: VideoLane { codec, bsf },
        audio_lane: AudioLane {
            dec,
            resampler: None,
        },
    })
}

// ── Demux worker ──────────────────────────────────────────────────────────────

fn demux_thread(shared: Arc<HwShared>, url: String, mut boot: Boot) {
    let events = shared.events();

    let init = match init_demux(&url, &mut boot) {
        Ok(init) => init,
        Err(e) => {
            error!("[hwplayer] init failed: {e:#}");
            events.emit(PlayerMessage::DecoderInitError, 0.0);
            return;
        }
    };
    let DemuxInit {
        mut ictx,
        video,
        audio,
        video_lane,
        audio_lane,
    } = init;

    *shared.params.lock().unwrap() = Some(MediaParameters {
        video_width: video.width,
        video_height: video.height,
        duration_ms: video.duration_ms,
        channel_layout: ChannelLayout::from_channels(audio.channels),
        sample_rate: audio.sample_rate,
        channels: audio.channels,
    });
    events.emit(PlayerMessage::DecoderReady, 0.0);
    debug!("[hwplayer] ready: {url}");

    shared.video_queue.start();
    shared.audio_queue.start();

    let video_lane = Arc::new(Mutex::new(video_lane));
    let audio_lane = Arc::new(Mutex::new(audio_lane));

    let video_worker = {
        let shared = Arc::clone(&shared);
        let lane = Arc::clone(&video_lane);
        let info = video.clone();
        thread::spawn(move || video_decode_worker(shared, lane, info))
    };
    let audio_worker = {
        let shared = Arc::clone(&shared);
        let lane = Arc::clone(&audio_lane);
        let info = audio.clone();
        let sink = boot.audio_sink;
        thread::spawn(move || audio_decode_worker(shared, lane, info, sink))
    };

    mux_loop(&shared, &mut ictx, &video, &audio, &video_lane, &audio_lane);

    // teardown: wake the workers out of any queue wait, join them, then
    // report completion exactly once
    shared.video_queue.stop();
    shared.audio_queue.stop();
    if video_worker.join().is_err() {
        error!("[hwplayer] video worker panicked");
    }
    if audio_worker.join().is_err() {
        error!("[hwplayer] audio worker panicked");
    }
    events.emit(PlayerMessage::DecoderDone, 0.0);
    debug!("[hwplayer] demux done");
}

fn mux_loop(
    shared: &HwShared,
    ictx: &mut ffmpeg::format::context::Input,
    video: &StreamInfo,
    audio: &StreamInfo,
    video_lane: &Mutex<VideoLane>,
    audio_lane: &Mutex<AudioLane>,
) {
    {
        // a stop() racing the first play() must stay observed
        let mut control = shared.control.lock().unwrap();
        if control.state.can_transition(PlayerState::Playing) {
            control.state = PlayerState::Playing;
        }
    }
    let video_tb = Rational::new(video.time_base.0, video.time_base.1);

    loop {
        if !shared.pause_gate() {
            break;
        }

        if let Some(position) = shared.take_seek() {
            let target_us = (position * video.duration_ms as f64 * 1000.0) as i64;
            if seek_to_micros(ictx, target_us, "demux") {
                // fixed order: video lane first, then audio lane
                {
                    let mut lane = video_lane.lock().unwrap();
                    if let Err(e) = lane.codec.flush() {
                        warn!("[hwplayer] hardware codec flush: {e}");
                    }
                    lane.bsf.flush();
                    shared.video_queue.flush();
                    shared.video_clock.reset(now_ms());
                }
                {
                    let mut lane = audio_lane.lock().unwrap();
                    lane.dec.flush();
                    shared.audio_queue.flush();
                    shared.audio_clock.reset(now_ms());
                }
                debug!("[hwplayer] seek → {target_us}µs");
            }
        }

        let routed = match ictx.packets().next() {
            None => None,
            Some(Err(e)) => {
                warn!("[hwplayer] read error: {e}");
                None
            }
            Some(Ok((stream, packet))) => Some((stream.index(), packet)),
        };

        match routed {
            None => shared.park_at_eof(),
            Some((index, packet)) => {
                // keep at most MAX_BUFFERED_SECONDS of compressed video queued
                while shared.video_queue.buffered_seconds(video_tb) > MAX_BUFFERED_SECONDS
                    && shared.state() == PlayerState::Playing
                    && !shared.seek_pending()
                {
                    thread::sleep(POLL_INTERVAL);
                }
                if index == video.index {
                    let _ = shared.video_queue.push(packet);
                } else if index == audio.index {
                    let _ = shared.audio_queue.push(packet);
                }
                // packets of other streams are dropped
            }
        }
    }
}

// ── Video decode worker ───────────────────────────────────────────────────────

fn video_decode_worker(shared: Arc<HwShared>, lane: Arc<Mutex<VideoLane>>, info: StreamInfo) {
    let sync = AvSynchronizer::new(
        Arc::clone(&shared.video_clock),
        Arc::clone(&shared.audio_clock),
        info.frame_rate,
    );

    loop {
        if !shared.pause_gate() {
            break;
        }

        let mut packet = match shared.video_queue.pop_timeout(POLL_INTERVAL) {
            Popped::Stopped => break,
            Popped::Empty => continue,
            Popped::Packet(packet) => packet,
        };

        let mut lane = lane.lock().unwrap();

        match lane.bsf.filter(&mut packet) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!("[hwplayer] annex-b filter: {e:#}");
                continue;
            }
        }

        let pts = packet.pts().unwrap_or(-1);
        let key = packet.is_key();
        match packet.data() {
            Some(data) if !data.is_empty() => {
                match lane.codec.queue_input(data, pts.max(0), key) {
                    Ok(true) => {}
                    Ok(false) => debug!("[hwplayer] no input buffer, dropping packet"),
                    Err(e) => warn!("[hwplayer] queue_input: {e}"),
                }
            }
            _ => continue,
        }

        match lane.codec.dequeue_output(DEQUEUE_OUTPUT_TIMEOUT) {
            Ok(HwPoll::Frame(frame)) => {
                if frame.has_payload {
                    if frame.pts >= 0 {
                        shared
                            .video_clock
                            .set(info.ticks_to_ms(frame.pts), now_ms());
                    }
                    sync.wait_for_frame(|| {
                        shared.state() == PlayerState::Stopped || shared.seek_pending()
                    });
                    if let Err(e) = lane.codec.release_output(&frame, true) {
                        warn!("[hwplayer] release_output: {e}");
                    }
                } else {
                    // side-data-only output: nothing to present, clock untouched
                    if let Err(e) = lane.codec.release_output(&frame, false) {
                        warn!("[hwplayer] release_output: {e}");
                    }
                }
            }
            Ok(HwPoll::TryAgain) => {}
            Ok(HwPoll::OutputFormatChanged) => debug!("[hwplayer] output format changed"),
            Ok(HwPoll::OutputBuffersChanged) => debug!("[hwplayer] output buffers changed"),
            Err(e) => warn!("[hwplayer] dequeue_output: {e}"),
        }
    }

    debug!("[hwplayer] video worker done");
}

// ── Audio decode worker ───────────────────────────────────────────────────────

fn audio_decode_worker(
    shared: Arc<HwShared>,
    lane: Arc<Mutex<AudioLane>>,
    info: StreamInfo,
    mut sink: Box<dyn AudioSink>,
) {
    let events = shared.events();
    sink.init();

    loop {
        if !shared.pause_gate() {
            break;
        }

        let packet = match shared.audio_queue.pop_timeout(POLL_INTERVAL) {
            Popped::Stopped => break,
            Popped::Empty => continue,
            Popped::Packet(packet) => packet,
        };

        // decode + resample under the lane lock, render outside it
        let decoded = decode_audio_packet(&mut lane.lock().unwrap(), &packet, &info);

        for (pts_ms, pcm) in decoded {
            if let Some(pts_ms) = pts_ms {
                shared.audio_clock.set(pts_ms, now_ms());
            }
            sink.render(&pcm);
            if !shared.seek_pending() {
                events.emit(PlayerMessage::DecodingTime, pts_ms.unwrap_or(0.0) as f32);
            }
        }
    }

    sink.uninit();
    debug!("[hwplayer] audio worker done");
}

/// Drain every frame the codec yields for one packet into (pts, pcm) pairs.
/// A `None` pts marks a frame whose timestamp was unusable — it is still
/// rendered but does not move the clock.
fn decode_audio_packet(
    lane: &mut AudioLane,
    packet: &ffmpeg::Packet,
    info: &StreamInfo,
) -> Vec<(Option<f64>, Vec<u8>)> {
    let mut out = Vec::new();

    if let Err(e) = lane.dec.send_packet(packet) {
        warn!("[hwplayer] audio send_packet: {e}");
        return out;
    }

    let mut frame = AudioFrame::empty();
    while lane.dec.receive_frame(&mut frame).is_ok() {
        if frame.samples() == 0 {
            continue;
        }
        let pts_ms = match frame.pts() {
            Some(ticks) if ticks >= 0 => Some(info.ticks_to_ms(ticks)),
            _ => None,
        };
        if lane.resampler.is_none() {
            match AudioResampler::new(frame.format(), frame.ch_layout(), frame.rate()) {
                Ok(resampler) => lane.resampler = Some(resampler),
                Err(e) => {
                    warn!("[hwplayer] audio resampler: {e:#}");
                    continue;
                }
            }
        }
        if let Some(resampler) = lane.resampler.as_mut() {
            match resampler.resample(&frame) {
                Ok(pcm) if !pcm.is_empty() => out.push((pts_ms, pcm)),
                Ok(_) => {}
                Err(e) => warn!("[hwplayer] audio resample: {e:#}"),
            }
        }
    }

    out
}
