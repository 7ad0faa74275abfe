// Decoder configuration
// Which hardware device, which FFmpeg decoder, and what to hand back to the caller

use std::path::Path;

use ffmpeg_next as ffmpeg;
use serde::{Deserialize, Serialize};

use crate::decoder::DecoderError;

/// Platform-preferred hardware device type
#[cfg(target_os = "macos")]
pub const PREFERRED_HARDWARE: &str = "videotoolbox";

#[cfg(target_os = "windows")]
pub const PREFERRED_HARDWARE: &str = "d3d11va";

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub const PREFERRED_HARDWARE: &str = "vaapi";

/// FFmpeg library log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Quiet,
    Panic,
    Fatal,
    Error,
    Warning,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

impl From<LogLevel> for ffmpeg::log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Quiet => ffmpeg::log::Level::Quiet,
            LogLevel::Panic => ffmpeg::log::Level::Panic,
            LogLevel::Fatal => ffmpeg::log::Level::Fatal,
            LogLevel::Error => ffmpeg::log::Level::Error,
            LogLevel::Warning => ffmpeg::log::Level::Warning,
            LogLevel::Info => ffmpeg::log::Level::Info,
            LogLevel::Verbose => ffmpeg::log::Level::Verbose,
            LogLevel::Debug => ffmpeg::log::Level::Debug,
            LogLevel::Trace => ffmpeg::log::Level::Trace,
        }
    }
}

/// Decoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// FFmpeg hardware device type name, e.g. "vaapi", "vdpau", "cuda"
    pub hardware: String,
    /// FFmpeg decoder name, e.g. "h264", "hevc"
    pub codec: String,
    /// Device to open, e.g. "/dev/dri/renderD128". FFmpeg picks when absent.
    #[serde(default)]
    pub device: Option<String>,
    /// Host pixel format frames are transferred to, e.g. "nv12".
    /// When absent the first format offered by the device is used.
    #[serde(default)]
    pub pixel_format: Option<String>,
    #[serde(default)]
    pub log_level: LogLevel,
}

impl DecoderConfig {
    pub fn new(hardware: impl Into<String>, codec: impl Into<String>) -> Self {
        Self {
            hardware: hardware.into(),
            codec: codec.into(),
            device: None,
            pixel_format: None,
            log_level: LogLevel::default(),
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_pixel_format(mut self, pixel_format: impl Into<String>) -> Self {
        self.pixel_format = Some(pixel_format.into());
        self
    }

    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    /// Parse a JSON config
    pub fn from_json_str(json: &str) -> Result<Self, DecoderError> {
        serde_json::from_str(json)
            .map_err(|e| DecoderError::InvalidConfig(format!("Malformed config: {}", e)))
    }

    /// Load a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DecoderError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            DecoderError::InvalidConfig(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Reject configs FFmpeg would only fail on later with a less useful message
    pub fn validate(&self) -> Result<(), DecoderError> {
        if self.hardware.trim().is_empty() {
            return Err(DecoderError::InvalidConfig("hardware name is empty".to_string()));
        }
        if self.codec.trim().is_empty() {
            return Err(DecoderError::InvalidConfig("codec name is empty".to_string()));
        }
        if matches!(self.device.as_deref(), Some(d) if d.trim().is_empty()) {
            return Err(DecoderError::InvalidConfig("device is empty".to_string()));
        }
        if matches!(self.pixel_format.as_deref(), Some(p) if p.trim().is_empty()) {
            return Err(DecoderError::InvalidConfig("pixel format is empty".to_string()));
        }

        // Names are handed to FFmpeg as C strings
        let fields = [
            ("hardware", Some(self.hardware.as_str())),
            ("codec", Some(self.codec.as_str())),
            ("device", self.device.as_deref()),
            ("pixel format", self.pixel_format.as_deref()),
        ];
        for (field, value) in fields {
            if value.is_some_and(|v| v.contains('\0')) {
                return Err(DecoderError::InvalidConfig(format!("{} contains a NUL byte", field)));
            }
        }
        Ok(())
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::new(PREFERRED_HARDWARE, "h264")
    }
}
