// crates/vireo-media/src/helpers/annexb.rs
//
// h264_mp4toannexb bitstream filter: MP4-style length-prefixed NAL units →
// annex-B start codes, which is what surface-bound hardware decoders eat.
// No safe wrapper exists for the AVBSF API in this version of the bindings,
// so this drops to `ffmpeg::ffi` directly, same as the encoder's
// parameters_from_context path.

use std::ffi::CStr;
use std::ptr;

use anyhow::{anyhow, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec;
use ffmpeg::ffi;
use ffmpeg::packet::Mut as PacketMut;
use ffmpeg::Rational;

pub struct AnnexBFilter {
    ctx: *mut ffi::AVBSFContext,
}

// The context is only ever touched by the worker that owns the filter.
unsafe impl Send for AnnexBFilter {}

impl AnnexBFilter {
    /// Build the filter from the video stream's codec parameters.
    pub fn new(params: &codec::Parameters, time_base: Rational) -> Result<Self> {
        let name = CStr::from_bytes_with_nul(b"h264_mp4toannexb\0").unwrap();
        unsafe {
            let filter = ffi::av_bsf_get_by_name(name.as_ptr());
            if filter.is_null() {
                return Err(anyhow!("h264_mp4toannexb bitstream filter not available"));
            }

            let mut ctx: *mut ffi::AVBSFContext = ptr::null_mut();
            let ret = ffi::av_bsf_alloc(filter, &mut ctx);
            if ret < 0 {
                return Err(anyhow!("av_bsf_alloc failed: {}", ffmpeg::Error::from(ret)));
            }

            let ret = ffi::avcodec_parameters_copy((*ctx).par_in, params.as_ptr());
            if ret < 0 {
                ffi::av_bsf_free(&mut ctx);
                return Err(anyhow!(
                    "copying codec parameters into bitstream filter failed: {}",
                    ffmpeg::Error::from(ret)
                ));
            }
            (*ctx).time_base_in = ffi::AVRational {
                num: time_base.numerator(),
                den: time_base.denominator(),
            };

            let ret = ffi::av_bsf_init(ctx);
            if ret < 0 {
                ffi::av_bsf_free(&mut ctx);
                return Err(anyhow!("av_bsf_init failed: {}", ffmpeg::Error::from(ret)));
            }

            Ok(AnnexBFilter { ctx })
        }
    }

    /// Run one packet through the filter in place.
    ///
    /// h264_mp4toannexb is 1:1, so a submitted packet either comes back
    /// rewritten (`Ok(true)`) or the filter is momentarily empty
    /// (`Ok(false)`, packet consumed — skip it).
    pub fn filter(&mut self, packet: &mut ffmpeg::Packet) -> Result<bool> {
        unsafe {
            let ret = ffi::av_bsf_send_packet(self.ctx, packet.as_mut_ptr());
            if ret < 0 {
                return Err(anyhow!(
                    "av_bsf_send_packet failed: {}",
                    ffmpeg::Error::from(ret)
                ));
            }
            let ret = ffi::av_bsf_receive_packet(self.ctx, packet.as_mut_ptr());
            if ret < 0 {
                return match ffmpeg::Error::from(ret) {
                    ffmpeg::Error::Other { errno: ffi::EAGAIN } | ffmpeg::Error::Eof => Ok(false),
                    e => Err(anyhow!("av_bsf_receive_packet failed: {e}")),
                };
            }
            Ok(true)
        }
    }

    /// Reset internal state (seek).
    pub fn flush(&mut self) {
        unsafe { ffi::av_bsf_flush(self.ctx) }
    }
}

impl Drop for AnnexBFilter {
    fn drop(&mut self) {
        unsafe { ffi::av_bsf_free(&mut self.ctx) }
    }
}
