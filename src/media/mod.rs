// SPDX-License-Identifier: GPL-3.0-only

//! Media library facade
//!
//! The pipeline never talks to the decoding library directly; it drives the
//! [`MediaSource`] trait and the registry picks which [`MediaBackend`]
//! produces sources. Production uses [`ffmpeg::FfmpegBackend`]; tests plug
//! in a scripted backend so the whole state machine runs without a network
//! or a codec.
//!
//! The trait surface deliberately mirrors the demux/decode split of the
//! underlying library: one packet is read, sent to the decoder, and the
//! decoder is drained frame by frame, with `Again`/`Eof` surfaced to the
//! caller rather than hidden behind an iterator.

pub mod ffmpeg;
pub mod options;

use crate::constants;
use crate::errors::MediaResult;
use crate::types::BgrFrame;

/// Outcome of one demuxer read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// A packet for the selected video stream is now current
    Video,
    /// A packet for some other stream was read; skip it
    Other,
    /// The demuxer has nothing right now; try again
    Again,
    /// End of stream
    Eof,
}

/// Outcome of one decoder exchange (send or receive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    Ok,
    /// The decoder needs the opposite half of the exchange first
    Again,
    /// The decoder is drained for good
    Eof,
}

/// Static facts about the selected video stream
#[derive(Debug, Clone, Copy)]
pub struct StreamInfo {
    /// Seconds per PTS tick
    pub time_base: f64,
    /// Container's frame-rate guess; 0.0 when the container does not know
    pub guessed_fps: f64,
    pub width: u32,
    pub height: u32,
}

/// Knobs applied when opening an input
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Force RTSP interleaved over TCP (applies to `rtsp://` URLs only)
    pub rtsp_over_tcp: bool,
    /// Socket read/write timeout, microseconds
    pub socket_timeout_us: String,
    /// Probe size in bytes
    pub probe_size: String,
    /// Analyze duration, microseconds
    pub analyze_duration_us: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            rtsp_over_tcp: true,
            socket_timeout_us: constants::media::SOCKET_TIMEOUT_US.to_string(),
            probe_size: constants::media::PROBE_SIZE.to_string(),
            analyze_duration_us: constants::media::ANALYZE_DURATION_US.to_string(),
        }
    }
}

/// One connected input: demuxer plus opened video decoder
///
/// Holds a current packet and a current decoded frame internally, the way
/// the underlying library reuses its buffers. The packet is implicitly
/// released on the next read; the frame stays valid until the next receive.
pub trait MediaSource: Send {
    fn stream_info(&self) -> StreamInfo;

    /// Read the next packet from the demuxer. Blocking; aborts early when
    /// the interrupt hook fires.
    fn read_packet(&mut self) -> MediaResult<ReadStatus>;

    /// Feed the current packet to the decoder. The packet is considered
    /// consumed whatever the outcome.
    fn send_packet(&mut self) -> MediaResult<DecodeStatus>;

    /// Tell the decoder no more packets are coming so it can surrender
    /// buffered frames. Called once, on end of stream.
    fn send_eof(&mut self) -> MediaResult<DecodeStatus>;

    /// Pull the next decoded frame out of the decoder.
    fn receive_frame(&mut self) -> MediaResult<DecodeStatus>;

    /// Presentation timestamp of the current decoded frame, in stream
    /// time-base ticks.
    fn frame_pts(&self) -> Option<i64>;

    /// Convert the current decoded frame to packed BGR24 and borrow the
    /// result. The conversion context is cached and rebuilt only when the
    /// source geometry or pixel format changes.
    fn bgr_frame(&mut self) -> MediaResult<BgrFrame<'_>>;
}

/// Factory for [`MediaSource`]s
pub trait MediaBackend: Send + Sync {
    /// Open `url`, probe it, select the best video stream and open its
    /// decoder. `watch` is wired into every blocking call the source makes.
    fn connect(
        &self,
        url: &str,
        options: &ConnectOptions,
        watch: crate::interrupt::InterruptWatch,
    ) -> MediaResult<Box<dyn MediaSource>>;
}
