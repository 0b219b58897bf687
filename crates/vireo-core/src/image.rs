// crates/vireo-core/src/image.rs
//
// The frame hand-off contract: decoded video travels to sinks, and camera /
// filter output travels to the recorder, as a NativeImage — owned plane
// buffers plus per-plane line sizes. Microphone audio travels as PcmFrame.
//
// Plane semantics are fixed per format:
//   Rgba:        1 plane, line_size[0] ≥ width*4
//   Nv21 / Nv12: 2 planes (Y, interleaved VU/UV), line sizes per plane
//   I420:        3 planes (Y, U, V), line sizes per plane

/// Pixel layouts exchanged at the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Rgba,
    Nv21,
    Nv12,
    I420,
}

impl ImageFormat {
    /// Number of meaningful planes for this layout.
    pub fn plane_count(self) -> usize {
        match self {
            ImageFormat::Rgba => 1,
            ImageFormat::Nv21 | ImageFormat::Nv12 => 2,
            ImageFormat::I420 => 3,
        }
    }
}

/// One raw video frame with owned plane storage.
///
/// Unused planes stay empty with a zero line size. Ownership transfers with
/// the value: the producer (decoder, camera, filter graph) builds it, the
/// consumer (sink or recorder) keeps it alive until rendered or encoded.
#[derive(Debug, Clone)]
pub struct NativeImage {
    pub format:    ImageFormat,
    pub width:     u32,
    pub height:    u32,
    pub planes:    [Vec<u8>; 3],
    pub line_size: [usize; 3],
}

impl NativeImage {
    /// Packed RGBA frame (line size = width × 4).
    pub fn rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * 4);
        NativeImage {
            format: ImageFormat::Rgba,
            width,
            height,
            line_size: [width as usize * 4, 0, 0],
            planes: [data, Vec::new(), Vec::new()],
        }
    }

    /// Whether the populated planes match the format's plane count.
    pub fn planes_consistent(&self) -> bool {
        let n = self.format.plane_count();
        (0..3).all(|i| {
            if i < n {
                !self.planes[i].is_empty() && self.line_size[i] > 0
            } else {
                self.planes[i].is_empty() && self.line_size[i] == 0
            }
        })
    }
}

/// One chunk of interleaved PCM pushed by the host's microphone path.
///
/// Layout (rate, channel count, sample format) is fixed per recording job
/// by [`crate::AudioEncodeParams`]; `samples` counts per-channel frames.
#[derive(Debug, Clone)]
pub struct PcmFrame {
    pub data:    Vec<u8>,
    pub samples: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_counts_per_format() {
        assert_eq!(ImageFormat::Rgba.plane_count(), 1);
        assert_eq!(ImageFormat::Nv21.plane_count(), 2);
        assert_eq!(ImageFormat::Nv12.plane_count(), 2);
        assert_eq!(ImageFormat::I420.plane_count(), 3);
    }

    #[test]
    fn rgba_constructor_is_consistent() {
        let img = NativeImage::rgba(4, 2, vec![0u8; 4 * 2 * 4]);
        assert!(img.planes_consistent());
        assert_eq!(img.line_size[0], 16);
    }

    #[test]
    fn consistency_rejects_missing_chroma() {
        let img = NativeImage {
            format: ImageFormat::I420,
            width: 4,
            height: 4,
            planes: [vec![0u8; 16], Vec::new(), Vec::new()],
            line_size: [4, 0, 0],
        };
        assert!(!img.planes_consistent());
    }
}
