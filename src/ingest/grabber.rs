//! `Grabber`: the handle that pulls frames from a source.
//!
//! The grabber owns its native session. `release(self)` closes it explicitly;
//! dropping an open grabber closes it too, so a session is released exactly
//! once whichever way the program exits.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use url::Url;

#[cfg(feature = "ffmpeg")]
use super::ffmpeg::FfmpegGrabber;
use super::{Codec, SourceInfo, SourceSpec};
use crate::frame::{frame_interval_us, AudioSamples, Frame, VideoImage};

/// Fixed options applied when the source is opened.
#[derive(Clone, Debug)]
pub struct GrabberOptions {
    /// Requested capture size; cameras may ignore it.
    pub image_size: Option<(u32, u32)>,
    /// RTSP lower transport ("tcp" or "udp").
    pub rtsp_transport: String,
    /// Connect/read timeout for network sources.
    pub timeout: Duration,
    /// Wait for a publisher instead of pulling (RTSP only).
    pub rtsp_listen: bool,
    /// Only produce image frames.
    pub video_only: bool,
}

impl Default for GrabberOptions {
    fn default() -> Self {
        Self {
            image_size: None,
            rtsp_transport: "tcp".to_string(),
            timeout: Duration::from_secs(10),
            rtsp_listen: false,
            video_only: false,
        }
    }
}

/// Frame statistics for a grabber.
#[derive(Clone, Debug)]
pub struct GrabberStats {
    pub frames_grabbed: u64,
    pub source: String,
}

pub struct Grabber {
    spec: SourceSpec,
    backend: GrabberBackend,
    info: Option<SourceInfo>,
    frames_grabbed: u64,
}

enum GrabberBackend {
    Synthetic(SyntheticGrabber),
    #[cfg(feature = "ffmpeg")]
    Ffmpeg(FfmpegGrabber),
}

impl Grabber {
    pub fn new(spec: SourceSpec, options: GrabberOptions) -> Result<Self> {
        if let SourceSpec::File(path) = &spec {
            if !path.is_file() {
                return Err(anyhow!(
                    "input file not found or is not a file: {}",
                    path.display()
                ));
            }
        }
        let backend = match &spec {
            SourceSpec::Synthetic(location) => {
                GrabberBackend::Synthetic(SyntheticGrabber::new(location, options)?)
            }
            _ => {
                #[cfg(feature = "ffmpeg")]
                {
                    GrabberBackend::Ffmpeg(FfmpegGrabber::new(spec.clone(), options))
                }
                #[cfg(not(feature = "ffmpeg"))]
                {
                    return Err(anyhow!(
                        "source '{}' requires the ffmpeg feature (only stub:// is built in)",
                        spec
                    ));
                }
            }
        };
        Ok(Self {
            spec,
            backend,
            info: None,
            frames_grabbed: 0,
        })
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    /// Open the source and probe its parameters.
    pub fn start(&mut self) -> Result<SourceInfo> {
        let info = match &mut self.backend {
            GrabberBackend::Synthetic(source) => source.start(),
            #[cfg(feature = "ffmpeg")]
            GrabberBackend::Ffmpeg(source) => source.start(),
        }
        .with_context(|| format!("failed to open source {}", self.spec))?;
        log::info!("grabber started: {}", self.spec);
        self.info = Some(info.clone());
        Ok(info)
    }

    /// Start, and if the source reports no usable resolution, restart once
    /// with `width`x`height` requested.
    pub fn start_with_fallback(&mut self, width: u32, height: u32) -> Result<SourceInfo> {
        let info = self.start()?;
        if info.has_valid_dimensions() {
            return Ok(info);
        }
        log::warn!(
            "source resolution ({}x{}) is invalid; retrying with {}x{}",
            info.width,
            info.height,
            width,
            height
        );
        self.close();
        self.set_image_size(width, height);
        let info = self.start()?;
        if !info.has_valid_dimensions() {
            return Err(anyhow!(
                "could not get a valid resolution ({}x{}) from {}",
                width,
                height,
                self.spec
            ));
        }
        log::info!("using fallback resolution: {}x{}", info.width, info.height);
        Ok(info)
    }

    pub fn set_image_size(&mut self, width: u32, height: u32) {
        match &mut self.backend {
            GrabberBackend::Synthetic(source) => source.options.image_size = Some((width, height)),
            #[cfg(feature = "ffmpeg")]
            GrabberBackend::Ffmpeg(source) => source.set_image_size(width, height),
        }
    }

    /// Source parameters detected by the last `start`.
    pub fn info(&self) -> Option<&SourceInfo> {
        self.info.as_ref()
    }

    /// Pull the next frame. `Ok(None)` marks the end of the stream.
    pub fn grab(&mut self) -> Result<Option<Frame>> {
        let frame = match &mut self.backend {
            GrabberBackend::Synthetic(source) => source.grab(),
            #[cfg(feature = "ffmpeg")]
            GrabberBackend::Ffmpeg(source) => source.grab(),
        }?;
        if frame.is_some() {
            self.frames_grabbed += 1;
        }
        Ok(frame)
    }

    pub fn stats(&self) -> GrabberStats {
        GrabberStats {
            frames_grabbed: self.frames_grabbed,
            source: self.spec.to_string(),
        }
    }

    /// Stop and release the source.
    pub fn release(mut self) -> Result<()> {
        self.close();
        Ok(())
    }

    fn close(&mut self) {
        let was_open = match &mut self.backend {
            GrabberBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "ffmpeg")]
            GrabberBackend::Ffmpeg(source) => source.close(),
        };
        if was_open {
            log::info!("grabber released: {}", self.spec);
        }
        self.info = None;
    }
}

impl Drop for Grabber {
    fn drop(&mut self) {
        self.close();
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

/// `stub://name?frames=N&width=W&height=H&fps=F&audio=C&sample_rate=R&codec=C`
///
/// Extra knobs: `audio_codec`, `bitrate`, `audio_bitrate`, `empty_every=K`
/// (every K-th video frame is followed by an empty frame), `fail_open=1`,
/// `fail_after=N` (grab errors after N frames), `jitter_at=N` (frame N has a
/// different size). `width=0` uses the requested image size instead.
struct SyntheticGrabber {
    location: String,
    options: GrabberOptions,
    frames: Option<u64>,
    width: u32,
    height: u32,
    fps: f64,
    audio_channels: u16,
    sample_rate: u32,
    video_codec: Codec,
    audio_codec: Codec,
    video_bitrate: u64,
    audio_bitrate: u64,
    empty_every: Option<u64>,
    fail_open: bool,
    fail_after: Option<u64>,
    jitter_at: Option<u64>,
    session: Option<SyntheticSession>,
}

struct SyntheticSession {
    width: u32,
    height: u32,
    video_frames: u64,
    pending: Vec<Frame>,
}

impl SyntheticGrabber {
    fn new(location: &str, options: GrabberOptions) -> Result<Self> {
        let url = Url::parse(location).context("parse stub source url")?;
        let mut source = Self {
            location: location.to_string(),
            options,
            frames: None,
            width: 640,
            height: 480,
            fps: 30.0,
            audio_channels: 0,
            sample_rate: 44_100,
            video_codec: Codec::RawVideo,
            audio_codec: Codec::Pcm,
            video_bitrate: 0,
            audio_bitrate: 0,
            empty_every: None,
            fail_open: false,
            fail_after: None,
            jitter_at: None,
            session: None,
        };
        for (key, value) in url.query_pairs() {
            let parse_err = || anyhow!("invalid stub parameter {}={}", key, value);
            match key.as_ref() {
                "frames" => source.frames = Some(value.parse().map_err(|_| parse_err())?),
                "width" => source.width = value.parse().map_err(|_| parse_err())?,
                "height" => source.height = value.parse().map_err(|_| parse_err())?,
                "fps" => source.fps = value.parse().map_err(|_| parse_err())?,
                "audio" => source.audio_channels = value.parse().map_err(|_| parse_err())?,
                "sample_rate" => source.sample_rate = value.parse().map_err(|_| parse_err())?,
                "codec" => source.video_codec = Codec::from_name(&value),
                "audio_codec" => source.audio_codec = Codec::from_name(&value),
                "bitrate" => source.video_bitrate = value.parse().map_err(|_| parse_err())?,
                "audio_bitrate" => source.audio_bitrate = value.parse().map_err(|_| parse_err())?,
                "empty_every" => source.empty_every = Some(value.parse().map_err(|_| parse_err())?),
                "fail_open" => source.fail_open = value == "1" || value == "true",
                "fail_after" => source.fail_after = Some(value.parse().map_err(|_| parse_err())?),
                "jitter_at" => source.jitter_at = Some(value.parse().map_err(|_| parse_err())?),
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        if source.options.video_only {
            source.audio_channels = 0;
        }
        Ok(source)
    }

    fn start(&mut self) -> Result<SourceInfo> {
        if self.fail_open {
            return Err(anyhow!("stub source refused to open"));
        }
        let (width, height) = if self.width == 0 || self.height == 0 {
            self.options.image_size.unwrap_or((0, 0))
        } else {
            (self.width, self.height)
        };
        log::info!("SyntheticGrabber: connected to {}", self.location);
        self.session = Some(SyntheticSession {
            width,
            height,
            video_frames: 0,
            pending: Vec::new(),
        });
        Ok(SourceInfo {
            width,
            height,
            frame_rate: self.fps,
            video_codec: Some(self.video_codec.clone()),
            pixel_format: Some("rgb24".to_string()),
            video_bitrate: self.video_bitrate,
            audio_channels: self.audio_channels,
            audio_codec: (self.audio_channels > 0).then(|| self.audio_codec.clone()),
            sample_rate: if self.audio_channels > 0 {
                self.sample_rate
            } else {
                0
            },
            audio_bitrate: self.audio_bitrate,
        })
    }

    fn grab(&mut self) -> Result<Option<Frame>> {
        let interval = frame_interval_us(self.fps);
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("stub source not started; call start() first"))?;
        if let Some(frame) = session.pending.pop() {
            return Ok(Some(frame));
        }
        if let Some(limit) = self.fail_after {
            if session.video_frames >= limit {
                return Err(anyhow!("stub source read error"));
            }
        }
        if let Some(limit) = self.frames {
            if session.video_frames >= limit {
                return Ok(None);
            }
        }

        let index = session.video_frames;
        session.video_frames += 1;
        let timestamp_us = index as i64 * interval;

        let (width, height) = if self.jitter_at == Some(index) {
            (session.width + 2, session.height + 2)
        } else {
            (session.width, session.height)
        };
        let image = VideoImage::from_rgb24(width, height, synthetic_pixels(width, height, index))
            .ok_or_else(|| anyhow!("stub frame size overflow"))?;

        // `pending` is a stack: push in reverse emission order.
        if let Some(every) = self.empty_every {
            if every > 0 && session.video_frames % every == 0 {
                session.pending.push(Frame {
                    timestamp_us,
                    image: None,
                    samples: None,
                });
            }
        }
        if self.audio_channels > 0 {
            let per_channel = if self.fps > 0.0 {
                (self.sample_rate as f64 / self.fps) as usize
            } else {
                self.sample_rate as usize
            };
            let samples = vec![0.0f32; per_channel * self.audio_channels as usize];
            session.pending.push(Frame::audio(
                timestamp_us,
                AudioSamples::new(self.sample_rate, self.audio_channels, samples),
            ));
        }
        Ok(Some(Frame::video(timestamp_us, image)))
    }

    fn close(&mut self) -> bool {
        self.session.take().is_some()
    }
}

fn synthetic_pixels(width: u32, height: u32, frame_index: u64) -> Vec<u8> {
    let pixel_count = width as usize * height as usize * 3;
    let mut pixels = vec![0u8; pixel_count];
    for (i, pixel) in pixels.iter_mut().enumerate() {
        *pixel = ((i as u64 + frame_index) % 256) as u8;
    }
    pixels
}
