// HVD - hardware video decoder
// Packet in, host frame out, on top of FFmpeg hardware acceleration

pub mod bitstream;
pub mod cli;
pub mod config;
pub mod decoder;
pub mod frame;

pub use config::{DecoderConfig, LogLevel};
pub use decoder::{
    available_devices, decode, DecoderError, HardwareDecoder, HwDeviceType, SendStatus,
    VideoDecoder,
};
