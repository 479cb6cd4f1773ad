// SPDX-License-Identifier: GPL-3.0-only

//! Per-scheme demuxer option sets
//!
//! Kept as plain key/value pairs so the option matrix is testable without
//! touching the decoding library; the ffmpeg backend folds the pairs into
//! its dictionary right before open.

use url::Url;

use super::ConnectOptions;

/// Input families that get different open options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlScheme {
    Rtsp,
    Http,
    Rtmp,
    Other,
}

impl UrlScheme {
    /// Classify a stream URL. Anything unparsable (including bare file
    /// paths used in tests) lands in `Other` and gets only the generic
    /// options.
    pub fn of(url: &str) -> Self {
        match Url::parse(url).map(|u| u.scheme().to_ascii_lowercase()) {
            Ok(scheme) if scheme == "rtsp" => UrlScheme::Rtsp,
            Ok(scheme) if scheme == "http" || scheme == "https" => UrlScheme::Http,
            Ok(scheme) if scheme == "rtmp" || scheme == "rtmps" => UrlScheme::Rtmp,
            _ => UrlScheme::Other,
        }
    }
}

/// The full option set for opening `url`: generic low-latency knobs plus
/// whatever the scheme needs.
pub fn option_pairs(url: &str, options: &ConnectOptions) -> Vec<(&'static str, String)> {
    let mut pairs = vec![
        ("fflags", "nobuffer".to_string()),
        ("flags", "low_delay".to_string()),
        ("probesize", options.probe_size.clone()),
        ("analyzeduration", options.analyze_duration_us.clone()),
        ("rw_timeout", options.socket_timeout_us.clone()),
        ("tcp_nodelay", "1".to_string()),
    ];

    match UrlScheme::of(url) {
        UrlScheme::Rtsp => {
            if options.rtsp_over_tcp {
                pairs.push(("rtsp_transport", "tcp".to_string()));
            }
            pairs.push(("stimeout", options.socket_timeout_us.clone()));
        }
        UrlScheme::Http => {
            // Persistent connection plus transparent reconnect for HLS
            // playlists and MJPEG streams.
            pairs.push(("reconnect", "1".to_string()));
            pairs.push(("reconnect_streamed", "1".to_string()));
            pairs.push(("multiple_requests", "1".to_string()));
        }
        UrlScheme::Rtmp | UrlScheme::Other => {}
    }
    pairs
}
