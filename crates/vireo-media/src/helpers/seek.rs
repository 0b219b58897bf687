// crates/vireo-media/src/helpers/seek.rs
//
// Container seek wrapper with consistent soft-fail behaviour. All engine
// seeks route through here so the guard + log pattern lives in one place;
// hard-error vs soft-fail stays a policy decision at the call site.

use ffmpeg_the_third as ffmpeg;
use tracing::warn;

/// Seek `ictx` to `target_us` microseconds from the start of the file
/// (container time base, backward-biased so we land on the keyframe at or
/// before the target — the decoder burns through the pre-roll).
///
/// A zero target is a real seek, not a no-op: the context lives for the
/// whole playback session and may be parked at end-of-stream, and only an
/// explicit seek rewinds it there.
///
/// Returns `false` when the container refused the seek; the caller keeps
/// decoding from its current position.
pub fn seek_to_micros(
    ictx: &mut ffmpeg::format::context::Input,
    target_us: i64,
    label: &str,
) -> bool {
    let target_us = target_us.max(0);

    match ictx.seek(target_us, ..=target_us) {
        Ok(()) => true,
        Err(e) => {
            warn!(
                "[seek] soft-fail in {label} at {:.3}s: {e} — continuing from current position",
                target_us as f64 / 1_000_000.0
            );
            false
        }
    }
}
