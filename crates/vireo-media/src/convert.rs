// crates/vireo-media/src/convert.rs
//
// Format adaptation between decoded frames and sink contracts:
//   audio — any decoded layout → 44.1 kHz stereo s16 interleaved bytes
//   video — decoded frame → packed RGBA NativeImage (direct-surface sinks)
//           or zero-conversion planar NativeImage (accelerated sinks)

use anyhow::{anyhow, Context as _, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{Pixel, Sample};
use ffmpeg::software::resampling;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::frame::video::Video as VideoFrame;

use vireo_core::{ImageFormat, NativeImage, RenderKind};

/// The audio sink contract: 44.1 kHz, stereo, s16 interleaved.
pub const AUDIO_DST_SAMPLE_RATE: u32 = 44_100;
pub const AUDIO_DST_CHANNELS: usize = 2;
const BYTES_PER_SAMPLE: usize = 2;

/// Resamples decoded audio frames into the sink's fixed PCM layout.
pub struct AudioResampler {
    ctx: resampling::Context,
}

impl AudioResampler {
    /// Input layout comes from the opened decoder (or the first frame).
    pub fn new(format: Sample, layout: ChannelLayout, rate: u32) -> Result<Self> {
        let ctx = resampling::Context::get2(
            format,
            layout,
            rate,
            Sample::I16(SampleType::Packed),
            ChannelLayout::STEREO,
            AUDIO_DST_SAMPLE_RATE,
        )
        .context("create audio resampler")?;
        Ok(AudioResampler { ctx })
    }

    /// One decoded frame → interleaved s16 bytes, trimmed to the exact
    /// sample count (the frame's buffer may carry alignment padding).
    pub fn resample(&mut self, frame: &AudioFrame) -> Result<Vec<u8>> {
        let mut out = AudioFrame::empty();
        self.ctx
            .run(frame, &mut out)
            .map_err(|e| anyhow!("resample audio frame: {e}"))?;
        let bytes = out.samples() * AUDIO_DST_CHANNELS * BYTES_PER_SAMPLE;
        if bytes == 0 {
            return Ok(Vec::new());
        }
        Ok(out.data(0)[..bytes].to_vec())
    }
}

/// Per-sink video adaptation chosen from [`RenderKind`] at decoder init.
pub enum VideoAdapter {
    /// Scale + convert to packed RGBA at the sink's requested geometry.
    Rgba {
        scaler: SwsContext,
        dst_w:  u32,
        dst_h:  u32,
    },
    /// Hand planes through untouched; the sink uploads YUV itself.
    Planar,
}

impl VideoAdapter {
    pub fn new(
        kind: RenderKind,
        src_format: Pixel,
        src_w: u32,
        src_h: u32,
        dst_w: u32,
        dst_h: u32,
    ) -> Result<Self> {
        match kind {
            RenderKind::DirectSurface => {
                let scaler = SwsContext::get(
                    src_format,
                    src_w,
                    src_h,
                    Pixel::RGBA,
                    dst_w,
                    dst_h,
                    Flags::FAST_BILINEAR,
                )
                .context("create video scaler")?;
                Ok(VideoAdapter::Rgba {
                    scaler,
                    dst_w,
                    dst_h,
                })
            }
            RenderKind::Accelerated => Ok(VideoAdapter::Planar),
        }
    }

    pub fn convert(&mut self, frame: &VideoFrame) -> Result<NativeImage> {
        match self {
            VideoAdapter::Rgba {
                scaler,
                dst_w,
                dst_h,
            } => {
                let mut rgba = VideoFrame::empty();
                scaler
                    .run(frame, &mut rgba)
                    .map_err(|e| anyhow!("scale video frame: {e}"))?;
                Ok(packed_rgba(&rgba, *dst_w, *dst_h))
            }
            VideoAdapter::Planar => planar_image(frame),
        }
    }
}

/// Destripe a scaled RGBA frame: copy visible pixels only, not the stride
/// padding, so the image's line size is exactly width × 4.
fn packed_rgba(rgba: &VideoFrame, w: u32, h: u32) -> NativeImage {
    let stride = rgba.stride(0);
    let raw = rgba.data(0);
    let row_bytes = w as usize * 4;
    let data: Vec<u8> = (0..h as usize)
        .flat_map(|row| &raw[row * stride..row * stride + row_bytes])
        .copied()
        .collect();
    NativeImage::rgba(w, h, data)
}

/// Wrap a decoded frame's planes without conversion.
fn planar_image(frame: &VideoFrame) -> Result<NativeImage> {
    let w = frame.width();
    let h = frame.height();
    let mut image = NativeImage {
        format: ImageFormat::I420,
        width: w,
        height: h,
        planes: [Vec::new(), Vec::new(), Vec::new()],
        line_size: [0, 0, 0],
    };

    match frame.format() {
        Pixel::YUV420P | Pixel::YUVJ420P => {
            // Some hardware stacks emit two-plane NV12 under a planar tag:
            // no third plane and chroma stride equal to luma stride.
            let semi_planar = unsafe {
                let av = frame.as_ptr();
                !(*av).data[1].is_null()
                    && (*av).data[2].is_null()
                    && (*av).linesize[0] == (*av).linesize[1]
                    && (*av).linesize[2] == 0
            };
            if semi_planar {
                image.format = ImageFormat::Nv12;
                copy_planes(frame, &mut image, 2);
            } else {
                image.format = ImageFormat::I420;
                copy_planes(frame, &mut image, 3);
            }
        }
        Pixel::NV12 => {
            image.format = ImageFormat::Nv12;
            copy_planes(frame, &mut image, 2);
        }
        Pixel::NV21 => {
            image.format = ImageFormat::Nv21;
            copy_planes(frame, &mut image, 2);
        }
        Pixel::RGBA => {
            image.format = ImageFormat::Rgba;
            copy_planes(frame, &mut image, 1);
        }
        other => return Err(anyhow!("unsupported planar pixel format {other:?}")),
    }

    Ok(image)
}

fn copy_planes(frame: &VideoFrame, image: &mut NativeImage, count: usize) {
    for i in 0..count {
        image.planes[i] = frame.data(i).to_vec();
        image.line_size[i] = frame.stride(i);
    }
}
