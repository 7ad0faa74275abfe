// Video decoder module
// Hardware decoding through FFmpeg, frames handed back in host memory
//
// Flow per stream:
// 1. send_packet() with compressed data (or send_eof() to flush)
// 2. receive_frame() until it returns None
// 3. repeat; Again from send_packet means step 2 must run first

pub mod ffmpeg;
pub mod hwdevice;

pub use self::ffmpeg::HardwareDecoder;
pub use hwdevice::{available_devices, HwDeviceType};

use ffmpeg_next::frame::Video as VideoFrame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("Invalid decoder configuration: {0}")]
    InvalidConfig(String),
    #[error("Cannot find hardware decoder {0}")]
    UnknownHardware(String),
    #[error("Cannot find decoder {0}")]
    UnknownCodec(String),
    #[error("Unable to find pixel format for {0}")]
    UnsupportedHardware(String),
    #[error("Failed to initialize decoder: {0}")]
    InitError(String),
    #[error("Decoding failed: {0}")]
    DecodeError(String),
    #[error("Frame decoded in software (not in hardware)")]
    SoftwareFrame,
    #[error("Unable to transfer data to system memory: {0}")]
    TransferError(String),
}

/// Outcome of submitting input to the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Input consumed
    Accepted,
    /// Decoder is full, receive frames and resubmit the same input
    Again,
}

/// Video decoder trait
pub trait VideoDecoder: Send {
    /// Submit one compressed packet
    fn send_packet(&mut self, data: &[u8]) -> Result<SendStatus, DecoderError>;

    /// Submit the end of stream marker, frames still buffered become receivable
    fn send_eof(&mut self) -> Result<SendStatus, DecoderError>;

    /// Next decoded frame in host memory, None when more input is needed
    /// or the stream is fully drained. The frame is valid until the next call.
    fn receive_frame(&mut self) -> Result<Option<&VideoFrame>, DecoderError>;

    /// Get decoder info
    fn info(&self) -> &str;
}

/// Submit `packet` (None flushes) and pass every frame that becomes available to `on_frame`.
///
/// Returns the number of frames delivered.
pub fn decode<D, F, E>(decoder: &mut D, packet: Option<&[u8]>, mut on_frame: F) -> Result<usize, E>
where
    D: VideoDecoder + ?Sized,
    F: FnMut(&VideoFrame) -> Result<(), E>,
    E: From<DecoderError>,
{
    let mut delivered = 0;

    loop {
        let status = match packet {
            Some(data) => decoder.send_packet(data)?,
            None => decoder.send_eof()?,
        };

        let mut drained = 0;
        while let Some(frame) = decoder.receive_frame()? {
            on_frame(frame)?;
            drained += 1;
        }
        delivered += drained;

        match status {
            SendStatus::Accepted => return Ok(delivered),
            SendStatus::Again if drained == 0 => {
                return Err(DecoderError::DecodeError(
                    "decoder refused input without producing a frame".to_string(),
                )
                .into());
            }
            SendStatus::Again => {
                log::trace!("Decoder full, drained {} frames, resubmitting", drained)
            }
        }
    }
}
