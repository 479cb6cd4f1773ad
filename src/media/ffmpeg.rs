// SPDX-License-Identifier: GPL-3.0-only

//! FFmpeg-backed media source
//!
//! Demuxing, decoding and BGR conversion via `ffmpeg-next`. The one thing
//! the safe wrapper has no surface for is the demuxer interrupt callback,
//! so that single hook goes through `ffmpeg-sys-next`: a boxed
//! [`InterruptWatch`] is installed as the `AVFormatContext` interrupt
//! callback right after open, which lets `stop_camera` abort a read that
//! is blocked on a dead socket.

use std::ffi::{c_int, c_void};
use std::sync::Once;

use ffmpeg_next as ffmpeg;

use ffmpeg::Dictionary;
use ffmpeg::codec::context::Context as CodecContext;
use ffmpeg::codec::packet::Packet;
use ffmpeg::codec::threading;
use ffmpeg::decoder;
use ffmpeg::format::{self, context::Input};
use ffmpeg::frame;
use ffmpeg::media;
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg::util::format::Pixel;

use ffmpeg_sys_next as sys;

use tracing::{debug, trace, warn};

use super::{ConnectOptions, DecodeStatus, MediaBackend, MediaSource, ReadStatus, StreamInfo, options};
use crate::errors::{MediaError, MediaErrorKind, MediaResult};
use crate::interrupt::InterruptWatch;
use crate::types::BgrFrame;

static FFMPEG_INIT: Once = Once::new();

/// Production [`MediaBackend`] over libavformat/libavcodec/libswscale
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Self {
        FFMPEG_INIT.call_once(|| {
            if let Err(e) = ffmpeg::init() {
                warn!(error = %e, "ffmpeg init failed; opens will fail");
            }
        });
        Self
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for FfmpegBackend {
    fn connect(
        &self,
        url: &str,
        options: &ConnectOptions,
        watch: InterruptWatch,
    ) -> MediaResult<Box<dyn MediaSource>> {
        let dict = open_options(url, options);
        let mut input = format::input_with_dictionary(&url, dict).map_err(classify_open)?;

        // From here on every blocking demuxer call polls the watch.
        let hook = install_interrupt(&mut input, watch);

        let stream = input
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| MediaError::new(MediaErrorKind::NoVideoStream, url.to_string()))?;
        let stream_index = stream.index();
        let time_base = {
            let tb = stream.time_base();
            if tb.denominator() != 0 {
                f64::from(tb.numerator()) / f64::from(tb.denominator())
            } else {
                0.0
            }
        };
        let guessed_fps = {
            let rate = stream.avg_frame_rate();
            if rate.denominator() != 0 && rate.numerator() > 0 {
                f64::from(rate.numerator()) / f64::from(rate.denominator())
            } else {
                0.0
            }
        };

        let mut codec_ctx = CodecContext::from_parameters(stream.parameters())
            .map_err(|e| MediaError::new(MediaErrorKind::DecoderSetup, e.to_string()))?;
        // One decoding thread per camera: predictable latency, and the
        // process already runs one worker thread per stream.
        codec_ctx.set_threading(threading::Config::count(1));
        let decoder = codec_ctx
            .decoder()
            .video()
            .map_err(|e| MediaError::new(MediaErrorKind::DecoderSetup, e.to_string()))?;

        let info = StreamInfo {
            time_base,
            guessed_fps,
            width: decoder.width(),
            height: decoder.height(),
        };
        debug!(
            url,
            stream_index,
            time_base,
            guessed_fps,
            width = info.width,
            height = info.height,
            "input opened"
        );

        Ok(Box::new(FfmpegSource {
            input,
            _hook: hook,
            decoder,
            stream_index,
            info,
            packet: Packet::empty(),
            frame: frame::Video::empty(),
            bgr: frame::Video::empty(),
            scaler: None,
        }))
    }
}

/// Demuxer options for low-latency live ingestion
fn open_options(url: &str, options: &ConnectOptions) -> Dictionary<'static> {
    let mut dict = Dictionary::new();
    for (key, value) in options::option_pairs(url, options) {
        dict.set(key, &value);
    }
    dict
}

/// Keeps the interrupt state alive for as long as the format context may
/// invoke it
struct InterruptHook {
    _state: Box<InterruptWatch>,
}

unsafe extern "C" fn interrupt_poll(opaque: *mut c_void) -> c_int {
    let watch = unsafe { &*(opaque as *const InterruptWatch) };
    c_int::from(watch.triggered())
}

fn install_interrupt(input: &mut Input, watch: InterruptWatch) -> InterruptHook {
    let state = Box::new(watch);
    unsafe {
        let ctx = input.as_mut_ptr();
        (*ctx).interrupt_callback = sys::AVIOInterruptCB {
            callback: Some(interrupt_poll),
            opaque: &*state as *const InterruptWatch as *mut c_void,
        };
    }
    InterruptHook { _state: state }
}

fn classify_open(error: ffmpeg::Error) -> MediaError {
    let kind = match error {
        ffmpeg::Error::Exit => MediaErrorKind::Interrupted,
        ffmpeg::Error::Other { errno: libc::EIO } => MediaErrorKind::OpenRetryable,
        ffmpeg::Error::Other {
            errno: libc::ENETUNREACH,
        } => MediaErrorKind::OpenRetryable,
        ffmpeg::Error::StreamNotFound => MediaErrorKind::NoVideoStream,
        _ => MediaErrorKind::OpenFailed,
    };
    MediaError::new(kind, error.to_string())
}

struct FfmpegSource {
    // Field order matters: the input must drop before the hook it points at.
    input: Input,
    _hook: InterruptHook,
    decoder: decoder::Video,
    stream_index: usize,
    info: StreamInfo,
    packet: Packet,
    frame: frame::Video,
    bgr: frame::Video,
    /// Conversion context plus the source geometry it was built for
    scaler: Option<(u32, u32, Pixel, Scaler)>,
}

// The raw pointers inside the ffmpeg wrappers are owned by this struct and
// only touched from the worker thread that owns the source.
unsafe impl Send for FfmpegSource {}

impl MediaSource for FfmpegSource {
    fn stream_info(&self) -> StreamInfo {
        self.info
    }

    fn read_packet(&mut self) -> MediaResult<ReadStatus> {
        match self.packet.read(&mut self.input) {
            Ok(()) => {
                if self.packet.stream() == self.stream_index {
                    Ok(ReadStatus::Video)
                } else {
                    Ok(ReadStatus::Other)
                }
            }
            Err(ffmpeg::Error::Eof) => Ok(ReadStatus::Eof),
            Err(ffmpeg::Error::Other { errno: libc::EAGAIN }) => Ok(ReadStatus::Again),
            Err(ffmpeg::Error::Exit) => Err(MediaError::new(
                MediaErrorKind::Interrupted,
                "read aborted by interrupt hook",
            )),
            Err(e) => Err(MediaError::new(MediaErrorKind::Stream, e.to_string())),
        }
    }

    fn send_packet(&mut self) -> MediaResult<DecodeStatus> {
        match self.decoder.send_packet(&self.packet) {
            Ok(()) => Ok(DecodeStatus::Ok),
            Err(ffmpeg::Error::Other { errno: libc::EAGAIN }) => Ok(DecodeStatus::Again),
            Err(ffmpeg::Error::Eof) => Ok(DecodeStatus::Eof),
            Err(e) => Err(MediaError::new(MediaErrorKind::Stream, e.to_string())),
        }
    }

    fn send_eof(&mut self) -> MediaResult<DecodeStatus> {
        match self.decoder.send_eof() {
            Ok(()) => Ok(DecodeStatus::Ok),
            Err(ffmpeg::Error::Eof) => Ok(DecodeStatus::Eof),
            Err(e) => Err(MediaError::new(MediaErrorKind::Stream, e.to_string())),
        }
    }

    fn receive_frame(&mut self) -> MediaResult<DecodeStatus> {
        match self.decoder.receive_frame(&mut self.frame) {
            Ok(()) => Ok(DecodeStatus::Ok),
            Err(ffmpeg::Error::Other { errno: libc::EAGAIN }) => Ok(DecodeStatus::Again),
            Err(ffmpeg::Error::Eof) => Ok(DecodeStatus::Eof),
            Err(e) => Err(MediaError::new(MediaErrorKind::Stream, e.to_string())),
        }
    }

    fn frame_pts(&self) -> Option<i64> {
        self.frame.timestamp().or_else(|| self.frame.pts())
    }

    fn bgr_frame(&mut self) -> MediaResult<BgrFrame<'_>> {
        let (width, height, pix_fmt) = (self.frame.width(), self.frame.height(), self.frame.format());

        let rebuild = self
            .scaler
            .as_ref()
            .map(|(w, h, f, _)| (*w, *h, *f) != (width, height, pix_fmt))
            .unwrap_or(true);
        if rebuild {
            trace!(width, height, ?pix_fmt, "rebuilding BGR scaler");
            let scaler = Scaler::get(
                pix_fmt,
                width,
                height,
                Pixel::BGR24,
                width,
                height,
                Flags::BILINEAR,
            )
            .map_err(|e| MediaError::new(MediaErrorKind::Scale, e.to_string()))?;
            self.scaler = Some((width, height, pix_fmt, scaler));
            // Geometry changed; let the next run re-allocate the output.
            self.bgr = frame::Video::empty();
        }

        let pts = self.frame_pts();
        let (_, _, _, scaler) = self.scaler.as_mut().unwrap();
        scaler
            .run(&self.frame, &mut self.bgr)
            .map_err(|e| MediaError::new(MediaErrorKind::Scale, e.to_string()))?;

        Ok(BgrFrame {
            width,
            height,
            stride: self.bgr.stride(0),
            data: self.bgr.data(0),
            pts,
        })
    }
}
