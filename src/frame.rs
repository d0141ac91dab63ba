//! Decoded media units that flow from a grabber to a recorder.
//!
//! A `Frame` carries an optional RGB24 image, optional interleaved audio
//! samples, and a capture timestamp. Frames are produced by `Grabber::grab`,
//! optionally shown in a preview, and handed by value to `Recorder::record`.
//! Nothing in the crate mutates a frame after it has been grabbed.

/// Packed RGB24 image, `width * height * 3` bytes, rows without padding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoImage {
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl VideoImage {
    /// Wrap packed RGB24 bytes. Returns `None` when the length does not match
    /// the dimensions.
    pub fn from_rgb24(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(3)?;
        if data.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * 3
    }
}

/// Interleaved 32-bit float samples.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioSamples {
    pub sample_rate: u32,
    pub channels: u16,
    data: Vec<f32>,
}

impl AudioSamples {
    pub fn new(sample_rate: u32, channels: u16, data: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels,
            data,
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.data.len() / self.channels as usize
    }
}

/// One grabbed unit of media.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Capture timestamp in microseconds; 0 when the source did not provide one.
    pub timestamp_us: i64,
    pub image: Option<VideoImage>,
    pub samples: Option<AudioSamples>,
}

impl Frame {
    pub fn video(timestamp_us: i64, image: VideoImage) -> Self {
        Self {
            timestamp_us,
            image: Some(image),
            samples: None,
        }
    }

    pub fn audio(timestamp_us: i64, samples: AudioSamples) -> Self {
        Self {
            timestamp_us,
            image: None,
            samples: Some(samples),
        }
    }

    /// A frame with neither image nor samples. The copy loop skips these.
    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.samples.is_none()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.image.as_ref().map(|image| (image.width, image.height))
    }
}

/// Microseconds between frames at `fps`, truncating the rate to whole frames.
///
/// Returns 0 for rates below one frame per second.
pub fn frame_interval_us(fps: f64) -> i64 {
    let whole = fps as i64;
    if whole <= 0 {
        return 0;
    }
    1_000_000 / whole
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb24_length_must_match_dimensions() {
        assert!(VideoImage::from_rgb24(2, 2, vec![0; 12]).is_some());
        assert!(VideoImage::from_rgb24(2, 2, vec![0; 11]).is_none());
        assert!(VideoImage::from_rgb24(0, 0, Vec::new()).is_some());
    }

    #[test]
    fn empty_frames_have_no_payload() {
        let frame = Frame {
            timestamp_us: 10,
            image: None,
            samples: None,
        };
        assert!(frame.is_empty());

        let audio = Frame::audio(0, AudioSamples::new(48_000, 2, vec![0.0; 8]));
        assert!(!audio.is_empty());
        assert_eq!(audio.samples.as_ref().map(AudioSamples::frames), Some(4));
        assert_eq!(audio.dimensions(), None);
    }

    #[test]
    fn frame_interval_truncates_rate() {
        assert_eq!(frame_interval_us(30.0), 33_333);
        assert_eq!(frame_interval_us(29.97), 1_000_000 / 29);
        assert_eq!(frame_interval_us(0.5), 0);
    }
}
