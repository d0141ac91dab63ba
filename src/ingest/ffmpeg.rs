//! FFmpeg-backed grabber for cameras, files and network streams.
//!
//! Video is decoded and converted to packed RGB24; audio is resampled to
//! interleaved f32 at the source rate. Timestamps are rescaled from the
//! stream time base to microseconds.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as ScalingContext, flag::Flags};
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::format::sample::{Sample, Type as SampleType};
use ffmpeg::{Rational, Rescale};
use std::collections::VecDeque;

use super::{Codec, GrabberOptions, SourceInfo, SourceSpec};
use crate::frame::{AudioSamples, Frame, VideoImage};

const MICROS: Rational = Rational(1, 1_000_000);

pub(crate) struct FfmpegGrabber {
    spec: SourceSpec,
    options: GrabberOptions,
    session: Option<Session>,
}

struct Session {
    input: ffmpeg::format::context::Input,
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
    queue: VecDeque<Frame>,
    eof: bool,
}

struct VideoTrack {
    index: usize,
    time_base: Rational,
    decoder: ffmpeg::decoder::Video,
    scaler: Option<(ScalingContext, Pixel, u32, u32)>,
}

struct AudioTrack {
    index: usize,
    time_base: Rational,
    channels: u16,
    decoder: ffmpeg::decoder::Audio,
    resampler: Option<ffmpeg::software::resampling::Context>,
}

impl FfmpegGrabber {
    pub(crate) fn new(spec: SourceSpec, options: GrabberOptions) -> Self {
        Self {
            spec,
            options,
            session: None,
        }
    }

    pub(crate) fn set_image_size(&mut self, width: u32, height: u32) {
        self.options.image_size = Some((width, height));
    }

    pub(crate) fn start(&mut self) -> Result<SourceInfo> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = open_input(&self.spec, &self.options)?;

        let video = match input.streams().best(ffmpeg::media::Type::Video) {
            Some(stream) => {
                let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                    .context("load video decoder parameters")?;
                let decoder = context
                    .decoder()
                    .video()
                    .context("open ffmpeg video decoder")?;
                Some(VideoTrack {
                    index: stream.index(),
                    time_base: stream.time_base(),
                    decoder,
                    scaler: None,
                })
            }
            None => None,
        };
        let audio = if self.options.video_only {
            None
        } else {
            match input.streams().best(ffmpeg::media::Type::Audio) {
                Some(stream) => {
                    let context =
                        ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                            .context("load audio decoder parameters")?;
                    let decoder = context
                        .decoder()
                        .audio()
                        .context("open ffmpeg audio decoder")?;
                    Some(AudioTrack {
                        index: stream.index(),
                        time_base: stream.time_base(),
                        channels: decoder.channels(),
                        decoder,
                        resampler: None,
                    })
                }
                None => None,
            }
        };
        if video.is_none() && audio.is_none() {
            return Err(anyhow!("{} has no audio or video track", self.spec));
        }

        let mut info = SourceInfo::default();
        if let Some(track) = &video {
            let stream = input
                .stream(track.index)
                .ok_or_else(|| anyhow!("video stream disappeared"))?;
            info.width = track.decoder.width();
            info.height = track.decoder.height();
            info.frame_rate = rational_to_f64(stream.avg_frame_rate())
                .or_else(|| rational_to_f64(stream.rate()))
                .unwrap_or(0.0);
            info.video_codec = Some(Codec::from_name(track.decoder.id().name()));
            info.pixel_format = track
                .decoder
                .format()
                .descriptor()
                .map(|descriptor| descriptor.name().to_string());
            info.video_bitrate = track.decoder.bit_rate() as u64;
        }
        if let Some(track) = &audio {
            info.audio_channels = track.channels;
            info.audio_codec = Some(Codec::from_name(track.decoder.id().name()));
            info.sample_rate = track.decoder.rate();
            info.audio_bitrate = track.decoder.bit_rate() as u64;
        }

        log::info!("FfmpegGrabber: connected to {}", self.spec);
        self.session = Some(Session {
            input,
            video,
            audio,
            queue: VecDeque::new(),
            eof: false,
        });
        Ok(info)
    }

    pub(crate) fn grab(&mut self) -> Result<Option<Frame>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("grabber not started; call start() first"))?;
        loop {
            if let Some(frame) = session.queue.pop_front() {
                return Ok(Some(frame));
            }
            if session.eof {
                return Ok(None);
            }
            session.read_next()?;
        }
    }

    pub(crate) fn close(&mut self) -> bool {
        self.session.take().is_some()
    }
}

impl Session {
    fn read_next(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                self.flush()?;
                self.eof = true;
                return Ok(());
            }
            Err(err) => return Err(err).context("read packet from source"),
        }

        let index = packet.stream();
        if let Some(track) = self.video.as_mut().filter(|track| track.index == index) {
            track
                .decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg video decoder")?;
            track.drain(&mut self.queue)?;
        } else if let Some(track) = self.audio.as_mut().filter(|track| track.index == index) {
            track
                .decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg audio decoder")?;
            track.drain(&mut self.queue)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(track) = self.video.as_mut() {
            track.decoder.send_eof().context("flush video decoder")?;
            track.drain(&mut self.queue)?;
        }
        if let Some(track) = self.audio.as_mut() {
            track.decoder.send_eof().context("flush audio decoder")?;
            track.drain(&mut self.queue)?;
        }
        Ok(())
    }
}

impl VideoTrack {
    fn drain(&mut self, queue: &mut VecDeque<Frame>) -> Result<()> {
        let mut decoded = ffmpeg::frame::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let (format, width, height) = (decoded.format(), decoded.width(), decoded.height());
            let stale = match &self.scaler {
                Some((_, f, w, h)) => (*f, *w, *h) != (format, width, height),
                None => true,
            };
            if stale {
                let scaler = ScalingContext::get(
                    format,
                    width,
                    height,
                    Pixel::RGB24,
                    width,
                    height,
                    Flags::BILINEAR,
                )
                .context("create ffmpeg scaler")?;
                self.scaler = Some((scaler, format, width, height));
            }
            let mut rgb = ffmpeg::frame::Video::empty();
            if let Some((scaler, ..)) = self.scaler.as_mut() {
                scaler.run(&decoded, &mut rgb).context("scale frame to RGB")?;
            }
            let pixels = packed_rgb(&rgb)?;
            let image = VideoImage::from_rgb24(width, height, pixels)
                .ok_or_else(|| anyhow!("decoded frame has inconsistent size"))?;
            let timestamp_us = to_micros(decoded.timestamp(), self.time_base);
            queue.push_back(Frame::video(timestamp_us, image));
        }
        Ok(())
    }
}

impl AudioTrack {
    fn drain(&mut self, queue: &mut VecDeque<Frame>) -> Result<()> {
        let mut decoded = ffmpeg::frame::Audio::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let layout = if decoded.channel_layout().is_empty() {
                ChannelLayout::default(i32::from(self.channels))
            } else {
                decoded.channel_layout()
            };
            if self.resampler.is_none() {
                let resampler = ffmpeg::software::resampling::Context::get(
                    decoded.format(),
                    layout,
                    decoded.rate(),
                    Sample::F32(SampleType::Packed),
                    layout,
                    decoded.rate(),
                )
                .context("create ffmpeg resampler")?;
                self.resampler = Some(resampler);
            }
            let mut converted = ffmpeg::frame::Audio::empty();
            if let Some(resampler) = self.resampler.as_mut() {
                resampler
                    .run(&decoded, &mut converted)
                    .context("resample audio")?;
            }
            let channels = self.channels.max(1);
            let count = converted.samples() * channels as usize;
            let samples: Vec<f32> = converted
                .data(0)
                .chunks_exact(4)
                .take(count)
                .map(|bytes| f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                .collect();
            let timestamp_us = to_micros(decoded.timestamp(), self.time_base);
            queue.push_back(Frame::audio(
                timestamp_us,
                AudioSamples::new(decoded.rate(), channels, samples),
            ));
        }
        Ok(())
    }
}

fn open_input(
    spec: &SourceSpec,
    options: &GrabberOptions,
) -> Result<ffmpeg::format::context::Input> {
    let mut dict = ffmpeg::Dictionary::new();
    match spec {
        SourceSpec::Camera(index) => {
            if let Some((width, height)) = options.image_size {
                dict.set("video_size", &format!("{}x{}", width, height));
            }
            let (format_name, device) = camera_device(*index)?;
            let format = ffmpeg::device::input::video()
                .find(|format| format.name() == format_name)
                .ok_or_else(|| anyhow!("ffmpeg capture input '{}' is not available", format_name))?;
            let context = ffmpeg::format::open_with(
                &device,
                &ffmpeg::format::Format::Input(format),
                dict,
            )
            .with_context(|| format!("failed to open camera {} ({})", index, device))?;
            Ok(context.input())
        }
        SourceSpec::File(path) => ffmpeg::format::input(path)
            .with_context(|| format!("failed to open file input '{}'", path.display())),
        SourceSpec::Network(url) => {
            if spec.is_rtsp() {
                dict.set("rtsp_transport", &options.rtsp_transport);
                if options.rtsp_listen {
                    dict.set("rtsp_flags", "listen");
                } else {
                    dict.set("timeout", &options.timeout.as_micros().to_string());
                }
            } else {
                dict.set("rw_timeout", &options.timeout.as_micros().to_string());
            }
            ffmpeg::format::input_with_dictionary(url, dict)
                .with_context(|| format!("failed to open stream '{}'", url))
        }
        SourceSpec::Synthetic(location) => Err(anyhow!(
            "synthetic source {} is not handled by ffmpeg",
            location
        )),
    }
}

fn camera_device(index: u32) -> Result<(&'static str, String)> {
    if cfg!(target_os = "linux") {
        Ok(("video4linux2,v4l2", format!("/dev/video{}", index)))
    } else if cfg!(target_os = "macos") {
        Ok(("avfoundation", format!("{}:none", index)))
    } else if cfg!(target_os = "windows") {
        Ok(("dshow", format!("video={}", index)))
    } else {
        Err(anyhow!("camera capture is not supported on this platform"))
    }
}

fn packed_rgb(frame: &ffmpeg::frame::Video) -> Result<Vec<u8>> {
    let row_bytes = frame.width() as usize * 3;
    let height = frame.height() as usize;
    let stride = frame.stride(0);
    let data = frame.data(0);
    if stride == row_bytes {
        return data
            .get(..row_bytes * height)
            .map(<[u8]>::to_vec)
            .context("ffmpeg frame is shorter than its dimensions");
    }
    let mut pixels = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Ok(pixels)
}

fn to_micros(timestamp: Option<i64>, time_base: Rational) -> i64 {
    match timestamp {
        Some(ts) if time_base.denominator() != 0 => ts.rescale(time_base, MICROS),
        _ => 0,
    }
}

fn rational_to_f64(rate: Rational) -> Option<f64> {
    if rate.numerator() <= 0 || rate.denominator() <= 0 {
        return None;
    }
    Some(f64::from(rate))
}
