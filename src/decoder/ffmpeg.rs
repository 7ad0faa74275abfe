// FFmpeg hardware-accelerated video decoder
// Decodes on a hardware device and lends each frame, moved to host memory, until the next call

use std::ffi::c_void;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec::Context;
use ffmpeg_next::decoder::Video as FfmpegVideo;
use ffmpeg_next::ffi;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::Packet;
use once_cell::sync::OnceCell;

use super::hwdevice::{self, HwDevice, HwDeviceType};
use super::{DecoderError, SendStatus, VideoDecoder};
use crate::config::DecoderConfig;

static FFMPEG_INIT: OnceCell<Result<(), ffmpeg::Error>> = OnceCell::new();

/// Initialize FFmpeg (once per process)
fn init_ffmpeg() -> Result<(), DecoderError> {
    FFMPEG_INIT
        .get_or_init(ffmpeg::init)
        .clone()
        .map_err(|e| DecoderError::InitError(format!("Failed to initialize FFmpeg: {}", e)))
}

/// get_format callback: accept only the hardware surface format.
/// `opaque` points at the format chosen when the decoder was built.
unsafe extern "C" fn negotiate_hw_format(
    ctx: *mut ffi::AVCodecContext,
    mut offered: *const ffi::AVPixelFormat,
) -> ffi::AVPixelFormat {
    let wanted = unsafe { *((*ctx).opaque as *const ffi::AVPixelFormat) };

    unsafe {
        while *offered != ffi::AVPixelFormat::AV_PIX_FMT_NONE {
            if *offered == wanted {
                return wanted;
            }
            offered = offered.add(1);
        }
    }

    log::error!("Failed to get HW surface format {:?}", Pixel::from(wanted));
    ffi::AVPixelFormat::AV_PIX_FMT_NONE
}

/// Is this the "try again" answer from send_packet/receive_frame
fn is_again(err: &ffmpeg::Error) -> bool {
    matches!(err, ffmpeg::Error::Other { errno } if *errno == ffmpeg::util::error::EAGAIN)
}

/// Translate a send_packet result
fn send_status(result: Result<(), ffmpeg::Error>) -> Result<SendStatus, DecoderError> {
    match result {
        Ok(()) => Ok(SendStatus::Accepted),
        Err(e) if is_again(&e) => Ok(SendStatus::Again),
        Err(e) => {
            log::error!("send_packet error: {}", e);
            Err(DecoderError::DecodeError(format!("Failed to send packet: {}", e)))
        }
    }
}

/// What receive_frame should do with FFmpeg's answer
#[derive(Debug, PartialEq, Eq)]
enum Received {
    Frame,
    NeedInput,
    Drained,
}

fn receive_status(result: Result<(), ffmpeg::Error>) -> Result<Received, DecoderError> {
    match result {
        Ok(()) => Ok(Received::Frame),
        Err(e) if is_again(&e) => Ok(Received::NeedInput),
        Err(ffmpeg::Error::Eof) => Ok(Received::Drained),
        Err(e) => {
            log::error!("Error while decoding: {}", e);
            Err(DecoderError::DecodeError(format!("Failed to receive frame: {}", e)))
        }
    }
}

/// Hardware video decoder
pub struct HardwareDecoder {
    // Field order is drop order: the codec context goes before the device
    // and before the format its get_format callback reads.
    decoder: FfmpegVideo,
    hw_frame: VideoFrame,
    sw_frame: VideoFrame,
    device: HwDevice,
    hw_format: Box<ffi::AVPixelFormat>,
    sw_format: Option<Pixel>,
    codec_name: String,
    info: String,
}

impl HardwareDecoder {
    /// Open a hardware decoder for `config`
    pub fn new(config: &DecoderConfig) -> Result<Self, DecoderError> {
        config.validate()?;
        init_ffmpeg()?;
        ffmpeg::log::set_level(config.log_level.into());

        let kind = HwDeviceType::find(&config.hardware)
            .ok_or_else(|| DecoderError::UnknownHardware(config.hardware.clone()))?;

        let codec = ffmpeg::decoder::find_by_name(&config.codec)
            .ok_or_else(|| DecoderError::UnknownCodec(config.codec.clone()))?;

        let hw_pixel = hwdevice::hw_pixel_format(codec, kind)
            .ok_or_else(|| DecoderError::UnsupportedHardware(config.hardware.clone()))?;

        let sw_format = config
            .pixel_format
            .as_deref()
            .map(|name| {
                name.parse::<Pixel>().map_err(|_| {
                    DecoderError::InvalidConfig(format!("Unknown pixel format {}", name))
                })
            })
            .transpose()?;

        let hw_format = Box::new(ffi::AVPixelFormat::from(hw_pixel));
        let device = HwDevice::open(kind, config.device.as_deref())?;

        let mut context = Context::new_with_codec(codec);
        unsafe {
            let raw = context.as_mut_ptr();
            (*raw).opaque = &*hw_format as *const ffi::AVPixelFormat as *mut c_void;
            (*raw).get_format = Some(negotiate_hw_format);
            // The context owns this reference and releases it when freed
            (*raw).hw_device_ctx = device.new_ref()?;
        }

        let decoder = context
            .decoder()
            .open_as(codec)
            .and_then(|opened| opened.video())
            .map_err(|e| {
                DecoderError::InitError(format!(
                    "Failed to initialize decoder context for {}: {}",
                    codec.name(),
                    e
                ))
            })?;

        let codec_name = codec.name().to_string();
        let info = format!("FFmpeg {} on {} (Hardware)", codec_name, kind);

        log::info!(
            "Hardware decoder initialized: {} via {}, surface format {:?}, host format {}",
            codec_name,
            kind,
            hw_pixel,
            sw_format.map_or_else(|| "(device default)".to_string(), |p| format!("{:?}", p))
        );

        Ok(Self {
            decoder,
            hw_frame: VideoFrame::empty(),
            sw_frame: VideoFrame::empty(),
            device,
            hw_format,
            sw_format,
            codec_name,
            info,
        })
    }

    /// Submit a compressed packet.
    ///
    /// The data is copied into a padded FFmpeg buffer, so any slice works.
    pub fn send_packet(&mut self, data: &[u8]) -> Result<SendStatus, DecoderError> {
        let packet = Packet::copy(data);
        send_status(self.decoder.send_packet(&packet))
    }

    /// Signal end of stream so the decoder releases buffered frames
    pub fn send_eof(&mut self) -> Result<SendStatus, DecoderError> {
        send_status(self.decoder.send_eof())
    }

    /// Receive the next frame, transferred to host memory.
    ///
    /// `Ok(None)` means more input is needed, or the stream was fully drained;
    /// in the latter case the decoder is reset and accepts a new stream.
    pub fn receive_frame(&mut self) -> Result<Option<&VideoFrame>, DecoderError> {
        match receive_status(self.decoder.receive_frame(&mut self.hw_frame))? {
            Received::Frame => {}
            Received::NeedInput => return Ok(None),
            Received::Drained => {
                log::debug!("Decoder drained, flushing buffers for a new stream");
                self.decoder.flush();
                return Ok(None);
            }
        }

        if self.hw_frame.format() != self.hw_pixel_format() {
            log::error!(
                "Frame decoded in software (not in hardware): {:?}",
                self.hw_frame.format()
            );
            return Err(DecoderError::SoftwareFrame);
        }

        self.transfer()?;
        Ok(Some(&self.sw_frame))
    }

    /// Copy the current hardware surface into the host frame
    fn transfer(&mut self) -> Result<(), DecoderError> {
        unsafe {
            let dst = self.sw_frame.as_mut_ptr();
            ffi::av_frame_unref(dst);
            if let Some(format) = self.sw_format {
                (*dst).format = ffi::AVPixelFormat::from(format) as i32;
            }

            let ret = ffi::av_hwframe_transfer_data(dst, self.hw_frame.as_ptr(), 0);
            if ret < 0 {
                let e = ffmpeg::Error::from(ret);
                log::error!("Unable to transfer data to system memory: {}", e);
                return Err(DecoderError::TransferError(e.to_string()));
            }

            let ret = ffi::av_frame_copy_props(dst, self.hw_frame.as_ptr());
            if ret < 0 {
                return Err(DecoderError::TransferError(format!(
                    "Unable to copy frame properties: {}",
                    ffmpeg::Error::from(ret)
                )));
            }
        }

        Ok(())
    }

    /// Device type the decoder runs on
    pub fn hardware(&self) -> HwDeviceType {
        self.device.kind()
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    /// Surface format frames have while in device memory
    pub fn hw_pixel_format(&self) -> Pixel {
        Pixel::from(*self.hw_format)
    }

    pub fn info(&self) -> &str {
        &self.info
    }
}

impl VideoDecoder for HardwareDecoder {
    fn send_packet(&mut self, data: &[u8]) -> Result<SendStatus, DecoderError> {
        HardwareDecoder::send_packet(self, data)
    }

    fn send_eof(&mut self) -> Result<SendStatus, DecoderError> {
        HardwareDecoder::send_eof(self)
    }

    fn receive_frame(&mut self) -> Result<Option<&VideoFrame>, DecoderError> {
        HardwareDecoder::receive_frame(self)
    }

    fn info(&self) -> &str {
        &self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn again() -> ffmpeg::Error {
        ffmpeg::Error::Other { errno: ffmpeg::util::error::EAGAIN }
    }

    #[test]
    fn test_send_status_mapping() {
        assert_eq!(send_status(Ok(())).unwrap(), SendStatus::Accepted);
        assert_eq!(send_status(Err(again())).unwrap(), SendStatus::Again);
        assert!(matches!(
            send_status(Err(ffmpeg::Error::InvalidData)),
            Err(DecoderError::DecodeError(_))
        ));
        assert!(send_status(Err(ffmpeg::Error::Eof)).is_err());
    }

    #[test]
    fn test_receive_status_mapping() {
        assert_eq!(receive_status(Ok(())).unwrap(), Received::Frame);
        assert_eq!(receive_status(Err(again())).unwrap(), Received::NeedInput);
        assert_eq!(receive_status(Err(ffmpeg::Error::Eof)).unwrap(), Received::Drained);
        assert!(matches!(
            receive_status(Err(ffmpeg::Error::InvalidData)),
            Err(DecoderError::DecodeError(_))
        ));
    }

    #[test]
    fn test_again_is_raw_eagain() {
        assert!(is_again(&ffmpeg::Error::from(-ffmpeg::util::error::EAGAIN)));
        assert!(!is_again(&ffmpeg::Error::Eof));
    }

    #[test]
    fn test_unknown_hardware() {
        let config = DecoderConfig::new("no-such-accelerator", "h264");
        let err = HardwareDecoder::new(&config).err().unwrap();
        assert!(matches!(
            err,
            DecoderError::UnknownHardware(ref name) if name == "no-such-accelerator"
        ));
        assert_eq!(err.to_string(), "Cannot find hardware decoder no-such-accelerator");
    }

    #[test]
    fn test_unknown_codec() {
        // Needs at least one device type compiled into FFmpeg
        let Some(kind) = hwdevice::available_devices().into_iter().next() else {
            return;
        };
        let config = DecoderConfig::new(kind.name(), "no-such-codec");
        let err = HardwareDecoder::new(&config).err().unwrap();
        assert!(matches!(err, DecoderError::UnknownCodec(ref name) if name == "no-such-codec"));
    }

    /// Run the get_format callback against `offered` with `wanted` as the hardware format
    fn negotiate(wanted: ffi::AVPixelFormat, offered: &[ffi::AVPixelFormat]) -> ffi::AVPixelFormat {
        let wanted = Box::new(wanted);
        unsafe {
            let mut ctx = ffi::avcodec_alloc_context3(std::ptr::null());
            assert!(!ctx.is_null());
            (*ctx).opaque = &*wanted as *const ffi::AVPixelFormat as *mut c_void;
            let chosen = negotiate_hw_format(ctx, offered.as_ptr());
            ffi::avcodec_free_context(&mut ctx);
            chosen
        }
    }

    #[test]
    fn test_negotiate_picks_hw_format() {
        let vaapi = ffi::AVPixelFormat::from(Pixel::VAAPI);
        let offered = [
            ffi::AVPixelFormat::AV_PIX_FMT_YUV420P,
            vaapi,
            ffi::AVPixelFormat::AV_PIX_FMT_NONE,
        ];
        assert_eq!(negotiate(vaapi, &offered), vaapi);
    }

    #[test]
    fn test_negotiate_rejects_missing_hw_format() {
        let vaapi = ffi::AVPixelFormat::from(Pixel::VAAPI);
        let offered = [
            ffi::AVPixelFormat::AV_PIX_FMT_YUV420P,
            ffi::AVPixelFormat::AV_PIX_FMT_NONE,
        ];
        assert_eq!(negotiate(vaapi, &offered), ffi::AVPixelFormat::AV_PIX_FMT_NONE);
    }

    #[test]
    fn test_negotiate_ignores_software_formats() {
        // Only the hardware format is acceptable, even if software ones come first
        let cuda = ffi::AVPixelFormat::from(Pixel::CUDA);
        let offered = [
            ffi::AVPixelFormat::AV_PIX_FMT_NV12,
            ffi::AVPixelFormat::AV_PIX_FMT_YUV420P,
            cuda,
            ffi::AVPixelFormat::AV_PIX_FMT_NONE,
        ];
        assert_eq!(negotiate(cuda, &offered), cuda);
        assert_eq!(
            negotiate(ffi::AVPixelFormat::from(Pixel::VAAPI), &offered),
            ffi::AVPixelFormat::AV_PIX_FMT_NONE
        );
    }

    #[test]
    fn test_nul_in_codec_is_config_error() {
        let config = DecoderConfig::new("vaapi", "h2\0 64");
        let err = HardwareDecoder::new(&config).err().unwrap();
        assert!(matches!(err, DecoderError::InvalidConfig(_)));
    }

    #[test]
    fn test_invalid_config_rejected_first() {
        let config = DecoderConfig::new("", "h264");
        let err = HardwareDecoder::new(&config).err().unwrap();
        assert!(matches!(err, DecoderError::InvalidConfig(_)));
    }
}
