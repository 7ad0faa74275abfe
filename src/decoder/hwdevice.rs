// FFmpeg hardware device registry and device context
//
// Device types are looked up by name in FFmpeg's registry. The surface pixel
// format for a device comes from the codec's hardware configs, with a fixed
// table as fallback for decoders that do not advertise any.

use std::ffi::{CStr, CString};
use std::fmt;
use std::ptr;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;
use ffmpeg_next::format::Pixel;

use super::DecoderError;

/// AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX
const HW_CONFIG_METHOD_HW_DEVICE_CTX: i32 = 0x01;

/// Hardware device type known to the linked FFmpeg
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HwDeviceType(ffi::AVHWDeviceType);

impl HwDeviceType {
    /// Look up a device type by its FFmpeg name
    pub fn find(name: &str) -> Option<Self> {
        let cname = CString::new(name).ok()?;
        let kind = unsafe { ffi::av_hwdevice_find_type_by_name(cname.as_ptr()) };
        if kind == ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            None
        } else {
            Some(Self(kind))
        }
    }

    /// FFmpeg's canonical name for this device type
    pub fn name(&self) -> &'static str {
        let name = unsafe { ffi::av_hwdevice_get_type_name(self.0) };
        if name.is_null() {
            return "unknown";
        }
        unsafe { CStr::from_ptr(name) }.to_str().unwrap_or("unknown")
    }

    pub fn as_raw(&self) -> ffi::AVHWDeviceType {
        self.0
    }
}

impl fmt::Debug for HwDeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HwDeviceType").field(&self.name()).finish()
    }
}

impl fmt::Display for HwDeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Every hardware device type compiled into the linked FFmpeg
pub fn available_devices() -> Vec<HwDeviceType> {
    let mut devices = Vec::new();
    let none = ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE;
    let mut current = unsafe { ffi::av_hwdevice_iterate_types(none) };

    while current != none {
        devices.push(HwDeviceType(current));
        current = unsafe { ffi::av_hwdevice_iterate_types(current) };
    }

    devices
}

/// Hardware surface format the decoder will output for this device
pub fn hw_pixel_format(codec: ffmpeg::Codec, kind: HwDeviceType) -> Option<Pixel> {
    codec_hw_config_format(codec, kind).or_else(|| fallback_pixel_format(kind.name()))
}

/// Ask the codec which surface format it produces through a device context
fn codec_hw_config_format(codec: ffmpeg::Codec, kind: HwDeviceType) -> Option<Pixel> {
    let mut index = 0;
    loop {
        let config = unsafe { ffi::avcodec_get_hw_config(codec.as_ptr(), index) };
        if config.is_null() {
            return None;
        }

        let config = unsafe { &*config };
        if config.methods & HW_CONFIG_METHOD_HW_DEVICE_CTX != 0
            && config.device_type == kind.as_raw()
        {
            return Some(Pixel::from(config.pix_fmt));
        }
        index += 1;
    }
}

/// Fixed device to surface format table
/// (decoders that predate hw configs still decode through these)
pub fn fallback_pixel_format(device_name: &str) -> Option<Pixel> {
    match device_name {
        "vaapi" => Some(Pixel::VAAPI),
        "dxva2" => Some(Pixel::DXVA2_VLD),
        "d3d11va" => Some(Pixel::D3D11),
        "vdpau" => Some(Pixel::VDPAU),
        "videotoolbox" => Some(Pixel::VIDEOTOOLBOX),
        "cuda" => Some(Pixel::CUDA),
        "qsv" => Some(Pixel::QSV),
        _ => None,
    }
}

/// Opened hardware device context
pub struct HwDevice {
    ctx: *mut ffi::AVBufferRef,
    kind: HwDeviceType,
}

unsafe impl Send for HwDevice {}

impl HwDevice {
    /// Open a device of the given type; `device` selects a specific one
    pub fn open(kind: HwDeviceType, device: Option<&str>) -> Result<Self, DecoderError> {
        let device = device
            .map(CString::new)
            .transpose()
            .map_err(|_| DecoderError::InvalidConfig("device contains a NUL byte".to_string()))?;
        let device_ptr = device.as_ref().map_or(ptr::null(), |d| d.as_ptr());

        let mut ctx: *mut ffi::AVBufferRef = ptr::null_mut();
        let ret = unsafe {
            ffi::av_hwdevice_ctx_create(&mut ctx, kind.as_raw(), device_ptr, ptr::null_mut(), 0)
        };
        if ret < 0 || ctx.is_null() {
            return Err(DecoderError::InitError(format!(
                "Failed to create {} device: {}",
                kind,
                ffmpeg::Error::from(ret)
            )));
        }

        log::debug!(
            "Opened {} device {}",
            kind,
            device.as_ref().map_or("(default)", |d| d.to_str().unwrap_or("?"))
        );

        Ok(Self { ctx, kind })
    }

    /// New reference to the device context, owned by whoever stores it
    pub fn new_ref(&self) -> Result<*mut ffi::AVBufferRef, DecoderError> {
        let reference = unsafe { ffi::av_buffer_ref(self.ctx) };
        if reference.is_null() {
            return Err(DecoderError::InitError(format!(
                "Unable to reference {} device context",
                self.kind
            )));
        }
        Ok(reference)
    }

    pub fn kind(&self) -> HwDeviceType {
        self.kind
    }
}

impl Drop for HwDevice {
    fn drop(&mut self) {
        unsafe { ffi::av_buffer_unref(&mut self.ctx) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_table() {
        assert_eq!(fallback_pixel_format("vaapi"), Some(Pixel::VAAPI));
        assert_eq!(fallback_pixel_format("dxva2"), Some(Pixel::DXVA2_VLD));
        assert_eq!(fallback_pixel_format("d3d11va"), Some(Pixel::D3D11));
        assert_eq!(fallback_pixel_format("vdpau"), Some(Pixel::VDPAU));
        assert_eq!(fallback_pixel_format("videotoolbox"), Some(Pixel::VIDEOTOOLBOX));
        assert_eq!(fallback_pixel_format("opencl"), None);
        assert_eq!(fallback_pixel_format(""), None);
    }

    #[test]
    fn test_codec_hw_config_format_preferred() {
        let Some(codec) = ffmpeg::decoder::find_by_name("h264") else {
            return;
        };

        for kind in available_devices() {
            let mut advertised = None;
            for index in 0.. {
                let config = unsafe { ffi::avcodec_get_hw_config(codec.as_ptr(), index) };
                if config.is_null() {
                    break;
                }
                let config = unsafe { &*config };
                if config.methods & HW_CONFIG_METHOD_HW_DEVICE_CTX != 0
                    && config.device_type == kind.as_raw()
                {
                    advertised = Some(Pixel::from(config.pix_fmt));
                    break;
                }
            }

            let Some(advertised) = advertised else {
                continue;
            };
            assert_eq!(hw_pixel_format(codec, kind), Some(advertised), "{}", kind);
            if kind.name() == "vaapi" {
                assert_eq!(advertised, Pixel::VAAPI);
            }
        }
    }

    #[test]
    fn test_hw_pixel_format_falls_back_to_table() {
        // A decoder with no hw configs at all
        let Some(codec) = ffmpeg::decoder::find_by_name("pcm_s16le") else {
            return;
        };
        let Some(kind) = HwDeviceType::find("vaapi") else {
            return;
        };
        assert_eq!(hw_pixel_format(codec, kind), Some(Pixel::VAAPI));
    }

    #[test]
    fn test_find_unknown_device() {
        assert!(HwDeviceType::find("no-such-accelerator").is_none());
        assert!(HwDeviceType::find("").is_none());
        assert!(HwDeviceType::find("va\0api").is_none());
    }

    #[test]
    fn test_available_devices_resolve_by_name() {
        for kind in available_devices() {
            assert_eq!(HwDeviceType::find(kind.name()), Some(kind));
            assert_eq!(kind.to_string(), kind.name());
        }
    }
}
