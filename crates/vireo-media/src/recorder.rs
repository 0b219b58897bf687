// crates/vireo-media/src/recorder.rs
//
// Camera + microphone capture → H.264/AAC container.
//
// Producer threads hand frames over bounded channels; one encode worker
// consumes both, electing the stream whose next output timestamp is
// earlier (av_compare_ts-style) so the muxer's interleave buffer stays
// bounded, then writes interleaved packets.
//
// PTS strategy:
//   Video: monotonically increasing frame counter in 1/fps.
//   Audio: monotonically increasing sample counter in 1/sample_rate.
//
// Audio FIFO:
//   AAC wants exactly `encoder.frame_size()` samples per input frame, while
//   microphone chunks arrive at arbitrary sizes. All resampled PCM drains
//   into a planar FLTP ring; full frames pop off the front, and the tail is
//   zero-padded once at the final flush.
//
// stop() is idempotent: it drains both queues, flushes both encoders,
// writes the trailer and joins the worker before returning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::{self, Id as CodecId};
use ffmpeg::encoder;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{output as open_output, Pixel, Sample};
use ffmpeg::software::resampling;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags as ScaleFlags};
use ffmpeg::util::channel_layout::{ChannelLayout, ChannelLayoutMask};
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::util::rational::Rational;
use ffmpeg::Packet;
use tracing::{debug, error};
use uuid::Uuid;

use vireo_core::{
    AudioEncodeParams, ImageFormat, NativeImage, PcmFrame, RecorderParams, SampleFormat,
    VideoEncodeParams,
};

/// Bounded frame queues: sized for ~1 s of video and a few hundred ms of
/// audio chunks; a full queue backpressures the producer.
const VIDEO_QUEUE_CAPACITY: usize = 32;
const AUDIO_QUEUE_CAPACITY: usize = 64;
/// Worker park interval while both queues are momentarily empty.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// AAC output bit rate for all recordings.
const AUDIO_BIT_RATE: usize = 128_000;

/// Fallback video bit rate from frame geometry when the host passes 0.
pub fn default_video_bit_rate(width: u32, height: u32, fps: u32) -> i64 {
    i64::from(width) * i64::from(height) * i64::from(fps) / 5
}

// ── Recorder handle ───────────────────────────────────────────────────────────

pub struct Recorder {
    job_id:   Uuid,
    video_tx: Option<Sender<NativeImage>>,
    audio_tx: Option<Sender<PcmFrame>>,
    stop:     Arc<AtomicBool>,
    worker:   Option<std::thread::JoinHandle<Result<(), String>>>,
}

impl Recorder {
    /// Open the output container, set up both encoders and start the encode
    /// worker. Returns once the header is written (or setup failed).
    pub fn start(url: &str, params: RecorderParams) -> Result<Recorder> {
        if params.video.is_none() && params.audio.is_none() {
            return Err(anyhow!("recorder needs at least one stream"));
        }

        let job_id = Uuid::new_v4();
        let (video_tx, video_rx) = bounded::<NativeImage>(VIDEO_QUEUE_CAPACITY);
        let (audio_tx, audio_rx) = bounded::<PcmFrame>(AUDIO_QUEUE_CAPACITY);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let url = url.to_string();
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                run_encoder(&url, &params, video_rx, audio_rx, stop, ready_tx)
            })
        };

        // FFmpeg contexts stay confined to the worker thread; it reports
        // setup success or failure before any frame is accepted.
        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(anyhow!("recorder setup: {e}"));
            }
            Err(_) => {
                let _ = worker.join();
                return Err(anyhow!("recorder worker died during setup"));
            }
        }

        debug!("[recorder] job {job_id} recording to {url}");
        Ok(Recorder {
            job_id,
            video_tx: params.video.is_some().then_some(video_tx),
            audio_tx: params.audio.is_some().then_some(audio_tx),
            stop,
            worker: Some(worker),
        })
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Queue one rendered camera frame for encoding. Blocks briefly when
    /// the encoder is a full queue behind.
    pub fn push_video(&self, image: NativeImage) -> Result<()> {
        if self.stop.load(Ordering::Relaxed) {
            return Err(anyhow!("recorder is stopping"));
        }
        let tx = self
            .video_tx
            .as_ref()
            .ok_or_else(|| anyhow!("recording has no video stream"))?;
        tx.send(image).map_err(|_| anyhow!("encode worker gone"))
    }

    /// Queue one microphone PCM chunk for encoding.
    pub fn push_audio(&self, frame: PcmFrame) -> Result<()> {
        if self.stop.load(Ordering::Relaxed) {
            return Err(anyhow!("recorder is stopping"));
        }
        let tx = self
            .audio_tx
            .as_ref()
            .ok_or_else(|| anyhow!("recording has no audio stream"))?;
        tx.send(frame).map_err(|_| anyhow!("encode worker gone"))
    }

    /// Drain both queues, flush the encoders, write the trailer and join
    /// the worker. Idempotent — later calls return Ok immediately.
    pub fn stop(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        // dropping the senders lets the worker observe a drained queue
        self.video_tx = None;
        self.audio_tx = None;
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker.join() {
            Ok(Ok(())) => {
                debug!("[recorder] job {} finished", self.job_id);
                Ok(())
            }
            Ok(Err(e)) => Err(anyhow!("recording failed: {e}")),
            Err(_) => Err(anyhow!("encode worker panicked")),
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("[recorder] stop on drop: {e:#}");
        }
    }
}

// ── Audio FIFO ────────────────────────────────────────────────────────────────

/// Planar FLTP stereo sample buffer bridging arbitrary-sized microphone
/// chunks and the encoder's fixed frame size.
struct SampleFifo {
    left:  Vec<f32>,
    right: Vec<f32>,
}

impl SampleFifo {
    fn new() -> Self {
        SampleFifo {
            left: Vec::new(),
            right: Vec::new(),
        }
    }

    /// Samples currently buffered, per channel.
    fn len(&self) -> usize {
        self.left.len()
    }

    fn push_samples(&mut self, left: &[f32], right: &[f32]) {
        debug_assert_eq!(left.len(), right.len());
        self.left.extend_from_slice(left);
        self.right.extend_from_slice(right);
    }

    /// Append one resampled FLTP frame. Mono input duplicates plane 0.
    fn push_frame(&mut self, frame: &AudioFrame) {
        let n = frame.samples();
        if n == 0 {
            return;
        }
        unsafe {
            let left = std::slice::from_raw_parts(frame.data(0).as_ptr() as *const f32, n);
            let right = if frame.ch_layout().channels() >= 2 {
                std::slice::from_raw_parts(frame.data(1).as_ptr() as *const f32, n)
            } else {
                left
            };
            self.left.extend_from_slice(left);
            self.right.extend_from_slice(right);
        }
    }

    /// Remove up to `n` samples per channel from the front, zero-padding
    /// the tail (used only for the final flush frame).
    fn take(&mut self, n: usize) -> (Vec<f32>, Vec<f32>) {
        let available = self.left.len().min(n);
        let mut left = vec![0.0f32; n];
        let mut right = vec![0.0f32; n];
        left[..available].copy_from_slice(&self.left[..available]);
        right[..available].copy_from_slice(&self.right[..available]);
        self.left.drain(..available);
        self.right.drain(..available);
        (left, right)
    }

    /// Pop one encoder-sized frame with its PTS set to `sample_idx` in the
    /// 1/sample_rate time base.
    fn pop_frame(&mut self, n: usize, sample_idx: i64, rate: u32) -> AudioFrame {
        let (left, right) = self.take(n);
        let mut frame = AudioFrame::new(
            Sample::F32(SampleType::Planar),
            n,
            ChannelLayoutMask::STEREO,
        );
        frame.set_rate(rate);
        frame.set_pts(Some(sample_idx));
        unsafe {
            let dst = std::slice::from_raw_parts_mut(frame.data_mut(0).as_mut_ptr() as *mut f32, n);
            dst.copy_from_slice(&left);
            let dst = std::slice::from_raw_parts_mut(frame.data_mut(1).as_mut_ptr() as *mut f32, n);
            dst.copy_from_slice(&right);
        }
        frame
    }
}

// ── Interleave election ───────────────────────────────────────────────────────

/// True when the audio stream's next output timestamp is at or before the
/// video stream's — i.e. audio should be encoded next to keep interleaved
/// DTS order without unbounded muxer buffering.
fn audio_is_due(video_next: i64, video_tb: Rational, audio_next: i64, audio_tb: Rational) -> bool {
    let video_secs = video_next as f64 * f64::from(video_tb);
    let audio_secs = audio_next as f64 * f64::from(audio_tb);
    audio_secs <= video_secs
}

// ── Encoder states ────────────────────────────────────────────────────────────

struct VideoState {
    encoder:      encoder::video::Video,
    params:       VideoEncodeParams,
    scaler:       Option<SwsContext>,
    scaler_src:   (Pixel, u32, u32),
    /// Next output frame index (PTS in 1/fps).
    next_pts:     i64,
    frame_tb:     Rational,
    ost_tb:       Rational,
    stream_index: usize,
}

struct AudioState {
    encoder:      encoder::Audio,
    params:       AudioEncodeParams,
    resampler:    Option<resampling::Context>,
    fifo:         SampleFifo,
    frame_size:   usize,
    /// Next output sample index (PTS in 1/sample_rate).
    next_pts:     i64,
    audio_tb:     Rational,
    ost_tb:       Rational,
    stream_index: usize,
}

fn drain_encoder_packets(
    encoder_recv: &mut dyn FnMut(&mut Packet) -> bool,
    octx: &mut ffmpeg::format::context::Output,
    stream_index: usize,
    from_tb: Rational,
    to_tb: Rational,
) -> Result<(), String> {
    let mut packet = Packet::empty();
    while encoder_recv(&mut packet) {
        packet.set_stream(stream_index);
        packet.rescale_ts(from_tb, to_tb);
        packet
            .write_interleaved(octx)
            .map_err(|e| format!("write packet: {e}"))?;
    }
    Ok(())
}

impl VideoState {
    fn encode_image(
        &mut self,
        octx: &mut ffmpeg::format::context::Output,
        image: &NativeImage,
    ) -> Result<(), String> {
        let src = frame_from_image(image)?;

        if self.scaler.is_none() || self.scaler_src != (src.format(), image.width, image.height) {
            self.scaler = Some(
                SwsContext::get(
                    src.format(),
                    image.width,
                    image.height,
                    Pixel::YUV420P,
                    self.params.width,
                    self.params.height,
                    ScaleFlags::BILINEAR,
                )
                .map_err(|e| format!("create recording scaler: {e}"))?,
            );
            self.scaler_src = (src.format(), image.width, image.height);
        }

        let mut yuv = VideoFrame::empty();
        self.scaler
            .as_mut()
            .unwrap()
            .run(&src, &mut yuv)
            .map_err(|e| format!("scale recording frame: {e}"))?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&yuv)
            .map_err(|e| format!("send video frame to encoder: {e}"))?;
        self.write_pending(octx)
    }

    fn write_pending(&mut self, octx: &mut ffmpeg::format::context::Output) -> Result<(), String> {
        let encoder = &mut self.encoder;
        drain_encoder_packets(
            &mut |packet| encoder.receive_packet(packet).is_ok(),
            octx,
            self.stream_index,
            self.frame_tb,
            self.ost_tb,
        )
    }

    fn flush(&mut self, octx: &mut ffmpeg::format::context::Output) -> Result<(), String> {
        self.encoder
            .send_eof()
            .map_err(|e| format!("send EOF to video encoder: {e}"))?;
        self.write_pending(octx)
    }
}

impl AudioState {
    fn ingest_pcm(
        &mut self,
        octx: &mut ffmpeg::format::context::Output,
        pcm: &PcmFrame,
    ) -> Result<(), String> {
        if pcm.samples == 0 {
            return Ok(());
        }
        let src = pcm_to_frame(pcm, &self.params)?;

        let resampler = match self.resampler.as_mut() {
            Some(r) => r,
            None => {
                let src_layout = match self.params.channel_layout.channels() {
                    1 => ChannelLayout::MONO,
                    _ => ChannelLayout::STEREO,
                };
                let r = resampling::Context::get2(
                    src.format(),
                    src_layout,
                    self.params.sample_rate,
                    Sample::F32(SampleType::Planar),
                    ChannelLayout::STEREO,
                    self.params.sample_rate,
                )
                .map_err(|e| format!("create recording resampler: {e}"))?;
                self.resampler.insert(r)
            }
        };

        let mut resampled = AudioFrame::empty();
        resampler
            .run(&src, &mut resampled)
            .map_err(|e| format!("resample microphone frame: {e}"))?;
        if resampled.samples() > 0 {
            self.fifo.push_frame(&resampled);
        }
        self.drain_fifo(octx, false)
    }

    /// Encode full frames out of the FIFO; with `flush` the zero-padded
    /// tail goes too so no PCM is lost.
    fn drain_fifo(
        &mut self,
        octx: &mut ffmpeg::format::context::Output,
        flush: bool,
    ) -> Result<(), String> {
        while self.fifo.len() >= self.frame_size || (flush && self.fifo.len() > 0) {
            let frame = self
                .fifo
                .pop_frame(self.frame_size, self.next_pts, self.params.sample_rate);
            self.next_pts += self.frame_size as i64;
            self.encoder
                .send_frame(&frame)
                .map_err(|e| format!("send audio frame to encoder: {e}"))?;
            self.write_pending(octx)?;
        }
        Ok(())
    }

    fn write_pending(&mut self, octx: &mut ffmpeg::format::context::Output) -> Result<(), String> {
        let encoder = &mut self.encoder;
        drain_encoder_packets(
            &mut |packet| encoder.receive_packet(packet).is_ok(),
            octx,
            self.stream_index,
            self.audio_tb,
            self.ost_tb,
        )
    }

    fn flush(&mut self, octx: &mut ffmpeg::format::context::Output) -> Result<(), String> {
        self.drain_fifo(octx, true)?;
        self.encoder
            .send_eof()
            .map_err(|e| format!("send EOF to audio encoder: {e}"))?;
        self.write_pending(octx)
    }
}

// ── Frame construction from host data ─────────────────────────────────────────

fn pixel_for(format: ImageFormat) -> Pixel {
    match format {
        ImageFormat::Rgba => Pixel::RGBA,
        ImageFormat::Nv21 => Pixel::NV21,
        ImageFormat::Nv12 => Pixel::NV12,
        ImageFormat::I420 => Pixel::YUV420P,
    }
}

/// Rows and visible row bytes of plane `i` for a w×h image.
fn plane_geometry(format: ImageFormat, i: usize, w: usize, h: usize) -> (usize, usize) {
    match (format, i) {
        (ImageFormat::Rgba, 0) => (h, w * 4),
        (_, 0) => (h, w),
        (ImageFormat::I420, _) => (h.div_ceil(2), w.div_ceil(2)),
        // NV12/NV21 chroma: half the rows, interleaved pairs at full width
        _ => (h.div_ceil(2), w),
    }
}

/// Copy a NativeImage into a freshly allocated frame, re-striding each
/// plane from the image's line sizes to the frame's.
fn frame_from_image(image: &NativeImage) -> Result<VideoFrame, String> {
    if !image.planes_consistent() {
        return Err(format!(
            "inconsistent {:?} image: plane/line-size mismatch",
            image.format
        ));
    }
    let mut frame = VideoFrame::new(pixel_for(image.format), image.width, image.height);
    let (w, h) = (image.width as usize, image.height as usize);

    for i in 0..image.format.plane_count() {
        let (rows, row_bytes) = plane_geometry(image.format, i, w, h);
        let src_stride = image.line_size[i];
        let dst_stride = frame.stride(i);
        let src = &image.planes[i];
        let dst = frame.data_mut(i);
        for row in 0..rows {
            let s = row * src_stride;
            let d = row * dst_stride;
            if s + row_bytes > src.len() || d + row_bytes > dst.len() {
                return Err(format!("short {:?} plane {i}", image.format));
            }
            dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
        }
    }
    Ok(frame)
}

/// Wrap one interleaved PCM chunk in a frame of the host-declared layout.
fn pcm_to_frame(pcm: &PcmFrame, params: &AudioEncodeParams) -> Result<AudioFrame, String> {
    let sample = match params.sample_format {
        SampleFormat::S16 => Sample::I16(SampleType::Packed),
        SampleFormat::F32 => Sample::F32(SampleType::Packed),
    };
    let mask = match params.channel_layout.channels() {
        1 => ChannelLayoutMask::MONO,
        _ => ChannelLayoutMask::STEREO,
    };
    let bytes = pcm.samples
        * params.channel_layout.channels() as usize
        * params.sample_format.bytes_per_sample();
    if pcm.data.len() < bytes {
        return Err(format!(
            "short pcm chunk: {} bytes for {} samples",
            pcm.data.len(),
            pcm.samples
        ));
    }

    let mut frame = AudioFrame::new(sample, pcm.samples, mask);
    frame.set_rate(params.sample_rate);
    frame.data_mut(0)[..bytes].copy_from_slice(&pcm.data[..bytes]);
    Ok(frame)
}

// ── Worker ────────────────────────────────────────────────────────────────────

fn setup_streams(
    url: &str,
    params: &RecorderParams,
) -> Result<
    (
        ffmpeg::format::context::Output,
        Option<VideoState>,
        Option<AudioState>,
    ),
    String,
> {
    ffmpeg::init().map_err(|e| format!("initialize ffmpeg: {e}"))?;
    let mut octx =
        open_output(&url).map_err(|e| format!("could not open output '{url}': {e}"))?;

    let mut next_index = 0usize;

    // ── Video stream ──────────────────────────────────────────────────────
    let mut video = None;
    if let Some(vp) = params.video {
        let h264 = encoder::find(CodecId::H264)
            .ok_or_else(|| "H.264 encoder not found — is libx264 available?".to_string())?;
        let frame_tb = Rational::new(1, vp.fps.max(1) as i32);

        let mut ost = octx
            .add_stream(h264)
            .map_err(|e| format!("add video stream: {e}"))?;
        ost.set_time_base(frame_tb);
        let stream_index = next_index;
        next_index += 1;

        let enc_ctx = codec::context::Context::new_with_codec(h264);
        let mut enc = enc_ctx
            .encoder()
            .video()
            .map_err(|e| format!("create video encoder context: {e}"))?;
        enc.set_width(vp.width);
        enc.set_height(vp.height);
        enc.set_format(Pixel::YUV420P);
        enc.set_time_base(frame_tb);
        enc.set_frame_rate(Some(Rational::new(vp.fps.max(1) as i32, 1)));
        let bit_rate = if vp.bit_rate > 0 {
            vp.bit_rate
        } else {
            default_video_bit_rate(vp.width, vp.height, vp.fps)
        };
        enc.set_bit_rate(bit_rate as usize);

        let mut opts = ffmpeg::Dictionary::new();
        opts.set("preset", "fast");
        let encoder = enc
            .open_as_with(h264, opts)
            .map_err(|e| format!("open H.264 encoder: {e}"))?;

        // Copy encoder params into the stream's codecpar so the muxer sees
        // resolution, format and codec-private data. No safe setter exists
        // for this direction, so go through the FFI like the BSF path.
        unsafe {
            let ret = ffmpeg::ffi::avcodec_parameters_from_context(
                (**(*octx.as_mut_ptr()).streams.add(stream_index)).codecpar,
                encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
            );
            if ret < 0 {
                return Err(format!("avcodec_parameters_from_context (video) failed: {ret}"));
            }
        }

        video = Some(VideoState {
            encoder,
            params: vp,
            scaler: None,
            scaler_src: (Pixel::None, 0, 0),
            next_pts: 0,
            frame_tb,
            ost_tb: frame_tb, // refreshed after write_header
            stream_index,
        });
    }

    // ── Audio stream ──────────────────────────────────────────────────────
    let mut audio = None;
    if let Some(ap) = params.audio {
        let aac =
            encoder::find(CodecId::AAC).ok_or_else(|| "AAC encoder not found".to_string())?;
        let audio_tb = Rational::new(1, ap.sample_rate.max(1) as i32);

        let mut ost = octx
            .add_stream(aac)
            .map_err(|e| format!("add audio stream: {e}"))?;
        ost.set_time_base(audio_tb);
        let stream_index = next_index;

        let enc_ctx = codec::context::Context::new_with_codec(aac);
        let mut enc = enc_ctx
            .encoder()
            .audio()
            .map_err(|e| format!("create audio encoder context: {e}"))?;
        enc.set_rate(ap.sample_rate as i32);
        enc.set_ch_layout(ChannelLayout::STEREO);
        enc.set_format(Sample::F32(SampleType::Planar));
        enc.set_bit_rate(AUDIO_BIT_RATE);

        let encoder = enc
            .open_as_with(aac, ffmpeg::Dictionary::new())
            .map_err(|e| format!("open AAC encoder: {e}"))?;
        let frame_size = (encoder.frame_size() as usize).max(1024);

        unsafe {
            let ret = ffmpeg::ffi::avcodec_parameters_from_context(
                (**(*octx.as_mut_ptr()).streams.add(stream_index)).codecpar,
                encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
            );
            if ret < 0 {
                return Err(format!("avcodec_parameters_from_context (audio) failed: {ret}"));
            }
        }

        audio = Some(AudioState {
            encoder,
            params: ap,
            resampler: None,
            fifo: SampleFifo::new(),
            frame_size,
            next_pts: 0,
            audio_tb,
            ost_tb: audio_tb, // refreshed after write_header
            stream_index,
        });
    }

    octx.write_header()
        .map_err(|e| format!("write output header: {e}"))?;

    // the muxer may have adjusted stream time bases while writing the header
    if let Some(v) = video.as_mut() {
        v.ost_tb = octx.stream(v.stream_index).unwrap().time_base();
    }
    if let Some(a) = audio.as_mut() {
        a.ost_tb = octx.stream(a.stream_index).unwrap().time_base();
    }

    Ok((octx, video, audio))
}

fn run_encoder(
    url: &str,
    params: &RecorderParams,
    video_rx: Receiver<NativeImage>,
    audio_rx: Receiver<PcmFrame>,
    stop: Arc<AtomicBool>,
    ready_tx: Sender<Result<(), String>>,
) -> Result<(), String> {
    let (mut octx, mut video, mut audio) = match setup_streams(url, params) {
        Ok(setup) => {
            let _ = ready_tx.send(Ok(()));
            setup
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e.clone()));
            return Err(e);
        }
    };

    let mut video_open = video.is_some();
    let mut audio_open = audio.is_some();

    loop {
        let audio_turn = match (&video, &audio) {
            (Some(v), Some(a)) => audio_is_due(v.next_pts, v.frame_tb, a.next_pts, a.audio_tb),
            (None, Some(_)) => true,
            _ => false,
        };

        // try the elected stream first, then the other, so one empty queue
        // never stalls the stream that has data waiting
        let mut wrote = false;
        for pick_audio in [audio_turn, !audio_turn] {
            if pick_audio && audio_open {
                match audio_rx.try_recv() {
                    Ok(pcm) => {
                        audio.as_mut().unwrap().ingest_pcm(&mut octx, &pcm)?;
                        wrote = true;
                    }
                    Err(TryRecvError::Disconnected) => audio_open = false,
                    Err(TryRecvError::Empty) => {}
                }
            } else if !pick_audio && video_open {
                match video_rx.try_recv() {
                    Ok(image) => {
                        video.as_mut().unwrap().encode_image(&mut octx, &image)?;
                        wrote = true;
                    }
                    Err(TryRecvError::Disconnected) => video_open = false,
                    Err(TryRecvError::Empty) => {}
                }
            }
            if wrote {
                break;
            }
        }
        if wrote {
            continue;
        }

        // both queues empty: leave once the producers are done (stop sets
        // the flag before dropping the senders), otherwise park one poll
        let stopping = stop.load(Ordering::Relaxed) || (!video_open && !audio_open);
        if stopping && video_rx.is_empty() && audio_rx.is_empty() {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    // ── Flush + trailer ───────────────────────────────────────────────────
    if let Some(v) = video.as_mut() {
        v.flush(&mut octx)?;
    }
    if let Some(a) = audio.as_mut() {
        a.flush(&mut octx)?;
    }
    octx.write_trailer()
        .map_err(|e| format!("write trailer: {e}"))?;
    debug!("[recorder] trailer written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bit_rate_scales_with_geometry() {
        assert_eq!(default_video_bit_rate(1280, 720, 25), 4_608_000);
        assert!(default_video_bit_rate(1920, 1080, 30) > default_video_bit_rate(640, 480, 30));
    }

    #[test]
    fn stream_election_alternates_realistically() {
        let video_tb = Rational::new(1, 25);
        let audio_tb = Rational::new(1, 44_100);
        // at the start both are at zero — audio goes first
        assert!(audio_is_due(0, video_tb, 0, audio_tb));
        // one AAC frame in (1024 samples ≈ 23 ms), video frame 0 still due
        assert!(!audio_is_due(0, video_tb, 1024, audio_tb));
        // after the first video frame (40 ms), audio at 23 ms is due again
        assert!(audio_is_due(1, video_tb, 1024, audio_tb));
    }

    #[test]
    fn fifo_assembles_fixed_frames_from_ragged_chunks() {
        let mut fifo = SampleFifo::new();
        for chunk in [100usize, 700, 500] {
            let samples = vec![1.0f32; chunk];
            fifo.push_samples(&samples, &samples);
        }
        assert_eq!(fifo.len(), 1300);
        let (left, right) = fifo.take(1024);
        assert_eq!(left.len(), 1024);
        assert!(left.iter().all(|&s| s == 1.0));
        assert!(right.iter().all(|&s| s == 1.0));
        assert_eq!(fifo.len(), 276);
    }

    #[test]
    fn fifo_zero_pads_the_tail() {
        let mut fifo = SampleFifo::new();
        let samples = vec![0.5f32; 10];
        fifo.push_samples(&samples, &samples);
        let (left, _right) = fifo.take(16);
        assert!(left[..10].iter().all(|&s| s == 0.5));
        assert!(left[10..].iter().all(|&s| s == 0.0));
        assert_eq!(fifo.len(), 0);
    }

    #[test]
    fn plane_geometry_per_format() {
        // 6×4 image
        assert_eq!(plane_geometry(ImageFormat::Rgba, 0, 6, 4), (4, 24));
        assert_eq!(plane_geometry(ImageFormat::I420, 0, 6, 4), (4, 6));
        assert_eq!(plane_geometry(ImageFormat::I420, 1, 6, 4), (2, 3));
        assert_eq!(plane_geometry(ImageFormat::Nv12, 1, 6, 4), (2, 6));
    }

    #[test]
    fn start_requires_at_least_one_stream() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("empty.mp4");
        let result = Recorder::start(
            out.to_str().unwrap(),
            RecorderParams {
                video: None,
                audio: None,
            },
        );
        assert!(result.is_err());
        assert!(!out.exists());
    }

    #[test]
    #[ignore = "needs libx264 and AAC encoders in the linked ffmpeg"]
    fn records_synthetic_frames_to_mp4() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("capture.mp4");
        let params = RecorderParams {
            video: Some(VideoEncodeParams {
                width: 64,
                height: 48,
                bit_rate: 0,
                fps: 25,
            }),
            audio: Some(AudioEncodeParams {
                sample_rate: 44_100,
                channel_layout: vireo_core::ChannelLayout::Stereo,
                sample_format: SampleFormat::S16,
            }),
        };
        let mut recorder = Recorder::start(out.to_str().unwrap(), params).unwrap();

        // one second of grey frames and silence
        for _ in 0..25 {
            let image = NativeImage::rgba(64, 48, vec![0x80; 64 * 48 * 4]);
            recorder.push_video(image).unwrap();
            let pcm = PcmFrame {
                data: vec![0u8; 1764 * 4],
                samples: 1764,
            };
            recorder.push_audio(pcm).unwrap();
        }
        recorder.stop().unwrap();

        assert!(out.exists());
        let ictx = ffmpeg::format::input(&out).unwrap();
        let duration_secs = ictx.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE);
        assert!((duration_secs - 1.0).abs() < 0.2, "duration {duration_secs}");
    }

    #[test]
    fn short_pcm_chunks_are_rejected() {
        let params = AudioEncodeParams {
            sample_rate: 44_100,
            channel_layout: vireo_core::ChannelLayout::Stereo,
            sample_format: SampleFormat::S16,
        };
        let pcm = PcmFrame {
            data: vec![0u8; 10],
            samples: 100,
        };
        assert!(pcm_to_frame(&pcm, &params).is_err());
    }
}
