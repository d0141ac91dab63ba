//! FFmpeg encoder/muxer behind `Recorder`.
//!
//! Frames arrive decoded (RGB24 images, interleaved f32 samples) and are
//! always encoded: a plan that "keeps" a codec only leaves bitrate and
//! pixel format to the encoder defaults.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::codec::Id;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as ScalingContext, flag::Flags};
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::format::sample::{Sample, Type as SampleType};
use ffmpeg::Rational;

use super::{AudioSettings, PixelFormat, RecorderConfig, VideoSettings};
use crate::frame::{AudioSamples, Frame, VideoImage};
use crate::ingest::Codec;

const DEFAULT_SAMPLE_RATE: u32 = 44_100;
const DEFAULT_AUDIO_FRAME_SIZE: usize = 1024;

pub(crate) struct FfmpegRecorder {
    output: ffmpeg::format::context::Output,
    video: Option<VideoOut>,
    audio: Option<AudioOut>,
}

// FFmpeg contexts are raw pointers; a recorder is only ever used from one
// thread at a time (moved into the start helper and back).
unsafe impl Send for FfmpegRecorder {}

struct VideoOut {
    index: usize,
    encoder: ffmpeg::encoder::Video,
    time_base: Rational,
    stream_time_base: Rational,
    frame_rate: f64,
    scaler: Option<(ScalingContext, u32, u32)>,
    last_pts: Option<i64>,
}

struct AudioOut {
    index: usize,
    encoder: ffmpeg::encoder::Audio,
    time_base: Rational,
    stream_time_base: Rational,
    layout: ChannelLayout,
    channels: usize,
    rate: u32,
    frame_size: usize,
    pending: Vec<f32>,
    next_pts: i64,
    warned_rate: bool,
}

impl FfmpegRecorder {
    pub(crate) fn open(config: &RecorderConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let mut output = match &config.format {
            Some(format) => ffmpeg::format::output_as(&config.location, format),
            None => ffmpeg::format::output(&config.location),
        }
        .with_context(|| format!("failed to open output '{}'", config.location))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let mut video = Some(VideoOut::add(&mut output, config, &config.video, global_header)?);
        let mut audio = match &config.audio {
            Some(settings) if settings.channels > 0 => {
                Some(AudioOut::add(&mut output, settings, global_header)?)
            }
            _ => None,
        };

        let mut options = ffmpeg::Dictionary::new();
        for (key, value) in &config.options {
            options.set(key, value);
        }
        let unused = output
            .write_header_with(options)
            .with_context(|| format!("failed to write header for '{}'", config.location))?;
        for (key, value) in unused.iter() {
            log::warn!("muxer ignored option {}={}", key, value);
        }

        // The muxer may adjust stream time bases while writing the header.
        if let Some(track) = video.as_mut() {
            if let Some(stream) = output.stream(track.index) {
                track.stream_time_base = stream.time_base();
            }
        }
        if let Some(track) = audio.as_mut() {
            if let Some(stream) = output.stream(track.index) {
                track.stream_time_base = stream.time_base();
            }
        }

        Ok(Self {
            output,
            video,
            audio,
        })
    }

    pub(crate) fn record(&mut self, frame: &Frame, timestamp_us: Option<i64>) -> Result<()> {
        let timestamp_us =
            timestamp_us.or((frame.timestamp_us != 0).then_some(frame.timestamp_us));
        if let (Some(image), Some(track)) = (&frame.image, self.video.as_mut()) {
            track.encode(image, timestamp_us, &mut self.output)?;
        }
        if let (Some(samples), Some(track)) = (&frame.samples, self.audio.as_mut()) {
            track.encode(samples, &mut self.output)?;
        }
        Ok(())
    }

    pub(crate) fn finish(mut self) -> Result<()> {
        if let Some(track) = self.video.as_mut() {
            track.encoder.send_eof().context("flush video encoder")?;
            write_packets(
                &mut track.encoder,
                track.index,
                track.time_base,
                track.stream_time_base,
                &mut self.output,
            )?;
        }
        if let Some(track) = self.audio.as_mut() {
            track.flush(&mut self.output)?;
        }
        self.output.write_trailer().context("write trailer")?;
        Ok(())
    }
}

impl VideoOut {
    fn add(
        output: &mut ffmpeg::format::context::Output,
        config: &RecorderConfig,
        settings: &VideoSettings,
        global_header: bool,
    ) -> Result<Self> {
        let codec = ffmpeg::encoder::find(codec_id(&settings.codec)?)
            .ok_or_else(|| anyhow!("no ffmpeg encoder for {}", settings.codec.name()))?;
        let mut stream = output.add_stream(codec).context("add video stream")?;
        let index = stream.index();

        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create video encoder")?;
        let frame_rate = settings.frame_rate.unwrap_or(super::plan::DEFAULT_FRAME_RATE);
        let rate = Rational::from(frame_rate);
        let time_base = rate.invert();
        encoder.set_width(config.width);
        encoder.set_height(config.height);
        encoder.set_format(pixel_format(settings.pixel_format, &codec));
        encoder.set_frame_rate(Some(rate));
        encoder.set_time_base(time_base);
        if let Some(bitrate) = settings.bitrate {
            encoder.set_bit_rate(usize::try_from(bitrate).unwrap_or(usize::MAX));
        }
        if let Some(gop) = settings.gop {
            encoder.set_gop(gop);
        }
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder
            .open_as(codec)
            .context("open ffmpeg video encoder")?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);

        Ok(Self {
            index,
            encoder,
            time_base,
            stream_time_base: time_base,
            frame_rate,
            scaler: None,
            last_pts: None,
        })
    }

    fn encode(
        &mut self,
        image: &VideoImage,
        timestamp_us: Option<i64>,
        output: &mut ffmpeg::format::context::Output,
    ) -> Result<()> {
        // Timestamps map to frame numbers; pts must strictly increase.
        let pts = match timestamp_us {
            Some(us) => (us as f64 * self.frame_rate / 1_000_000.0).round() as i64,
            None => self.last_pts.map_or(0, |last| last + 1),
        };
        let pts = match self.last_pts {
            Some(last) if pts <= last => last + 1,
            _ => pts,
        };
        self.last_pts = Some(pts);

        let mut source = ffmpeg::frame::Video::new(Pixel::RGB24, image.width, image.height);
        let row_bytes = image.row_bytes();
        let stride = source.stride(0);
        for (dst, src) in source
            .data_mut(0)
            .chunks_mut(stride)
            .zip(image.as_bytes().chunks(row_bytes))
        {
            dst.get_mut(..row_bytes)
                .context("ffmpeg frame row is out of bounds")?
                .copy_from_slice(src);
        }

        let stale = !matches!(&self.scaler, Some((_, w, h)) if (*w, *h) == (image.width, image.height));
        if stale {
            let scaler = ScalingContext::get(
                Pixel::RGB24,
                image.width,
                image.height,
                self.encoder.format(),
                self.encoder.width(),
                self.encoder.height(),
                Flags::BILINEAR,
            )
            .context("create ffmpeg scaler")?;
            self.scaler = Some((scaler, image.width, image.height));
        }
        let mut converted = ffmpeg::frame::Video::empty();
        if let Some((scaler, ..)) = self.scaler.as_mut() {
            scaler
                .run(&source, &mut converted)
                .context("convert frame for encoder")?;
        }
        converted.set_pts(Some(pts));

        self.encoder
            .send_frame(&converted)
            .context("send frame to video encoder")?;
        write_packets(
            &mut self.encoder,
            self.index,
            self.time_base,
            self.stream_time_base,
            output,
        )
    }
}

impl AudioOut {
    fn add(
        output: &mut ffmpeg::format::context::Output,
        settings: &AudioSettings,
        global_header: bool,
    ) -> Result<Self> {
        let codec = ffmpeg::encoder::find(codec_id(&settings.codec)?)
            .ok_or_else(|| anyhow!("no ffmpeg encoder for {}", settings.codec.name()))?;
        let mut stream = output.add_stream(codec).context("add audio stream")?;
        let index = stream.index();

        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .audio()
            .context("create audio encoder")?;
        let rate = settings.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
        let layout = ChannelLayout::default(i32::from(settings.channels));
        let time_base = Rational(1, rate as i32);
        encoder.set_rate(rate as i32);
        encoder.set_channel_layout(layout);
        encoder.set_format(Sample::F32(SampleType::Planar));
        encoder.set_time_base(time_base);
        if let Some(bitrate) = settings.bitrate {
            encoder.set_bit_rate(usize::try_from(bitrate).unwrap_or(usize::MAX));
        }
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder
            .open_as(codec)
            .context("open ffmpeg audio encoder")?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);

        let frame_size = match encoder.frame_size() {
            0 => DEFAULT_AUDIO_FRAME_SIZE,
            size => size as usize,
        };
        Ok(Self {
            index,
            encoder,
            time_base,
            stream_time_base: time_base,
            layout,
            channels: usize::from(settings.channels),
            rate,
            frame_size,
            pending: Vec::new(),
            next_pts: 0,
            warned_rate: false,
        })
    }

    fn encode(
        &mut self,
        samples: &AudioSamples,
        output: &mut ffmpeg::format::context::Output,
    ) -> Result<()> {
        if samples.sample_rate != self.rate && !self.warned_rate {
            log::warn!(
                "audio arrives at {} Hz but the encoder runs at {} Hz",
                samples.sample_rate,
                self.rate
            );
            self.warned_rate = true;
        }
        if usize::from(samples.channels) == self.channels {
            self.pending.extend_from_slice(samples.as_slice());
        } else {
            // Remix by repeating or dropping channels.
            let from = usize::from(samples.channels.max(1));
            for frame in samples.as_slice().chunks(from) {
                for ch in 0..self.channels {
                    self.pending.push(frame.get(ch.min(from - 1)).copied().unwrap_or(0.0));
                }
            }
        }
        while self.pending.len() >= self.frame_size * self.channels {
            self.send(self.frame_size, output)?;
        }
        Ok(())
    }

    fn send(&mut self, count: usize, output: &mut ffmpeg::format::context::Output) -> Result<()> {
        let mut frame =
            ffmpeg::frame::Audio::new(Sample::F32(SampleType::Planar), count, self.layout);
        frame.set_rate(self.rate);
        for ch in 0..self.channels {
            let plane = frame.data_mut(ch);
            for (i, bytes) in plane.chunks_exact_mut(4).take(count).enumerate() {
                let value = self.pending.get(i * self.channels + ch).copied().unwrap_or(0.0);
                bytes.copy_from_slice(&value.to_ne_bytes());
            }
        }
        frame.set_pts(Some(self.next_pts));
        self.next_pts += count as i64;
        let consumed = (count * self.channels).min(self.pending.len());
        self.pending.drain(..consumed);

        self.encoder
            .send_frame(&frame)
            .context("send frame to audio encoder")?;
        write_packets(
            &mut self.encoder,
            self.index,
            self.time_base,
            self.stream_time_base,
            output,
        )
    }

    fn flush(&mut self, output: &mut ffmpeg::format::context::Output) -> Result<()> {
        let remaining = self.pending.len() / self.channels.max(1);
        if remaining > 0 {
            self.send(remaining, output)?;
        }
        self.encoder.send_eof().context("flush audio encoder")?;
        write_packets(
            &mut self.encoder,
            self.index,
            self.time_base,
            self.stream_time_base,
            output,
        )
    }
}

fn write_packets(
    encoder: &mut ffmpeg::encoder::Encoder,
    index: usize,
    time_base: Rational,
    stream_time_base: Rational,
    output: &mut ffmpeg::format::context::Output,
) -> Result<()> {
    let mut packet = ffmpeg::Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(index);
        packet.rescale_ts(time_base, stream_time_base);
        packet
            .write_interleaved(output)
            .context("write packet to output")?;
    }
    Ok(())
}

fn codec_id(codec: &Codec) -> Result<Id> {
    match codec {
        Codec::H264 => Ok(Id::H264),
        Codec::H265 => Ok(Id::HEVC),
        Codec::Mjpeg => Ok(Id::MJPEG),
        Codec::Aac => Ok(Id::AAC),
        Codec::Mp3 => Ok(Id::MP3),
        Codec::Opus => Ok(Id::OPUS),
        other => Err(anyhow!("codec {} cannot be used for output", other.name())),
    }
}

fn pixel_format(requested: Option<PixelFormat>, codec: &ffmpeg::Codec) -> Pixel {
    match requested {
        Some(PixelFormat::Yuv420p) => Pixel::YUV420P,
        None => codec
            .video()
            .ok()
            .and_then(|video| video.formats())
            .and_then(|mut formats| formats.next())
            .unwrap_or(Pixel::YUV420P),
    }
}
