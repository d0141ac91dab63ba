//! Codec decisions for a sink, derived from the detected source.

use super::{AudioSettings, PixelFormat, VideoSettings};
use crate::ingest::{Codec, SourceInfo};

pub const DEFAULT_VIDEO_BITRATE: u64 = 2_000_000;
pub const DEFAULT_AUDIO_BITRATE: u64 = 128_000;
pub const DEFAULT_FRAME_RATE: f64 = 30.0;
/// Source rates at or above this are treated as bogus.
const MAX_SOURCE_FRAME_RATE: f64 = 200.0;

#[derive(Clone, Debug, PartialEq)]
pub struct CodecPlan {
    pub video: VideoSettings,
    pub audio: Option<AudioSettings>,
    /// Video stays in the source codec without overrides.
    pub keeps_video: bool,
    pub keeps_audio: bool,
}

/// Fixed H.264/YUV420P settings for camera capture. `gop_seconds` sets the
/// keyframe interval relative to the frame rate.
pub fn plan_camera(frame_rate: f64, bitrate: u64, gop_seconds: Option<u32>) -> CodecPlan {
    CodecPlan {
        video: VideoSettings {
            codec: Codec::H264,
            bitrate: Some(bitrate),
            frame_rate: Some(frame_rate),
            gop: gop_seconds.map(|secs| frame_rate as u32 * secs),
            pixel_format: Some(PixelFormat::Yuv420p),
        },
        audio: None,
        keeps_video: false,
        keeps_audio: false,
    }
}

/// HLS wants H.264 and AAC. Matching source codecs are kept as they are;
/// anything else is re-encoded.
pub fn plan_hls(info: &SourceInfo) -> CodecPlan {
    let keeps_video = info.video_codec == Some(Codec::H264);
    let video = if keeps_video {
        log::info!("source video is H.264; keeping codec");
        VideoSettings {
            codec: Codec::H264,
            bitrate: None,
            frame_rate: valid_frame_rate(info.frame_rate),
            gop: None,
            pixel_format: None,
        }
    } else {
        log::info!(
            "source video codec is {}; re-encoding to H.264",
            info.video_codec.as_ref().map(Codec::name).unwrap_or("unknown")
        );
        VideoSettings {
            codec: Codec::H264,
            bitrate: Some(positive_or(info.video_bitrate, DEFAULT_VIDEO_BITRATE)),
            frame_rate: Some(valid_frame_rate(info.frame_rate).unwrap_or(DEFAULT_FRAME_RATE)),
            gop: None,
            pixel_format: Some(PixelFormat::Yuv420p),
        }
    };

    let keeps_audio = info.has_audio() && info.audio_codec == Some(Codec::Aac);
    let audio = info.has_audio().then(|| {
        let bitrate = if keeps_audio {
            log::info!("source audio is AAC; keeping codec");
            None
        } else {
            log::info!(
                "source audio codec is {}; re-encoding to AAC",
                info.audio_codec.as_ref().map(Codec::name).unwrap_or("unknown")
            );
            Some(positive_or(info.audio_bitrate, DEFAULT_AUDIO_BITRATE))
        };
        AudioSettings {
            codec: Codec::Aac,
            bitrate,
            sample_rate: (info.sample_rate > 0).then_some(info.sample_rate),
            channels: info.audio_channels,
        }
    });

    CodecPlan {
        video,
        audio,
        keeps_video,
        keeps_audio,
    }
}

/// Publishing a local file always re-encodes to H.264/AAC at the source's
/// rates where known.
pub fn plan_file_publish(info: &SourceInfo) -> CodecPlan {
    let frame_rate = if info.frame_rate > 0.0 {
        info.frame_rate
    } else {
        DEFAULT_FRAME_RATE
    };
    let mut plan = plan_camera(
        frame_rate,
        positive_or(info.video_bitrate, DEFAULT_VIDEO_BITRATE),
        Some(2),
    );
    plan.audio = info.has_audio().then(|| AudioSettings {
        codec: Codec::Aac,
        bitrate: Some(positive_or(info.audio_bitrate, DEFAULT_AUDIO_BITRATE)),
        sample_rate: (info.sample_rate > 0).then_some(info.sample_rate),
        channels: info.audio_channels,
    });
    plan
}

fn valid_frame_rate(rate: f64) -> Option<f64> {
    (rate > 0.0 && rate < MAX_SOURCE_FRAME_RATE).then_some(rate)
}

fn positive_or(value: u64, fallback: u64) -> u64 {
    if value > 0 {
        value
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(codec: Codec, frame_rate: f64, bitrate: u64) -> SourceInfo {
        SourceInfo {
            width: 1920,
            height: 1080,
            frame_rate,
            video_codec: Some(codec),
            video_bitrate: bitrate,
            ..SourceInfo::default()
        }
    }

    #[test]
    fn h264_source_is_kept_without_overrides() {
        let plan = plan_hls(&source(Codec::H264, 25.0, 4_000_000));
        assert!(plan.keeps_video);
        assert_eq!(plan.video.codec, Codec::H264);
        assert_eq!(plan.video.bitrate, None);
        assert_eq!(plan.video.pixel_format, None);
        assert_eq!(plan.video.frame_rate, Some(25.0));
        assert!(plan.audio.is_none());
    }

    #[test]
    fn kept_h264_with_bogus_rate_leaves_rate_unset() {
        let plan = plan_hls(&source(Codec::H264, 90_000.0, 0));
        assert_eq!(plan.video.frame_rate, None);
    }

    #[test]
    fn other_codecs_are_reencoded_with_fallbacks() {
        let plan = plan_hls(&source(Codec::H265, 0.0, 0));
        assert!(!plan.keeps_video);
        assert_eq!(plan.video.bitrate, Some(DEFAULT_VIDEO_BITRATE));
        assert_eq!(plan.video.frame_rate, Some(DEFAULT_FRAME_RATE));
        assert_eq!(plan.video.pixel_format, Some(PixelFormat::Yuv420p));

        let plan = plan_hls(&source(Codec::Mjpeg, 15.0, 800_000));
        assert_eq!(plan.video.bitrate, Some(800_000));
        assert_eq!(plan.video.frame_rate, Some(15.0));
    }

    #[test]
    fn hls_audio_follows_source() {
        let mut info = source(Codec::H264, 30.0, 0);
        info.audio_channels = 2;
        info.audio_codec = Some(Codec::Aac);
        info.sample_rate = 44_100;
        let audio = plan_hls(&info).audio.expect("audio plan");
        assert_eq!(audio.codec, Codec::Aac);
        assert_eq!(audio.bitrate, None);
        assert_eq!(audio.sample_rate, Some(44_100));
        assert_eq!(audio.channels, 2);

        info.audio_codec = Some(Codec::Pcm);
        info.sample_rate = 0;
        let plan = plan_hls(&info);
        assert!(!plan.keeps_audio);
        let audio = plan.audio.expect("audio plan");
        assert_eq!(audio.bitrate, Some(DEFAULT_AUDIO_BITRATE));
        assert_eq!(audio.sample_rate, None);
    }

    #[test]
    fn file_publish_uses_source_rates() {
        let mut info = source(Codec::H264, 24.0, 3_000_000);
        info.audio_channels = 1;
        info.sample_rate = 48_000;
        info.audio_bitrate = 96_000;
        let plan = plan_file_publish(&info);
        assert_eq!(plan.video.bitrate, Some(3_000_000));
        assert_eq!(plan.video.frame_rate, Some(24.0));
        assert_eq!(plan.video.gop, Some(48));
        let audio = plan.audio.expect("audio plan");
        assert_eq!(audio.bitrate, Some(96_000));
        assert_eq!(audio.sample_rate, Some(48_000));
    }

    #[test]
    fn file_publish_falls_back_when_source_is_silent() {
        let plan = plan_file_publish(&source(Codec::Mjpeg, 0.0, 0));
        assert_eq!(plan.video.bitrate, Some(DEFAULT_VIDEO_BITRATE));
        assert_eq!(plan.video.frame_rate, Some(DEFAULT_FRAME_RATE));
        assert_eq!(plan.video.gop, Some(60));
        assert!(plan.audio.is_none());
    }
}
