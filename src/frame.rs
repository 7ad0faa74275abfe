// Host frame output
// Raw dump of decoded frames, plane by plane with stride padding removed

use std::io::{self, Write};

use ffmpeg_next::ffi;
use ffmpeg_next::frame::Video as VideoFrame;

/// Visible bytes in one row of `plane`
pub fn plane_row_bytes(frame: &VideoFrame, plane: usize) -> Option<usize> {
    let bytes = unsafe {
        ffi::av_image_get_linesize(
            ffi::AVPixelFormat::from(frame.format()),
            frame.width() as i32,
            plane as i32,
        )
    };
    usize::try_from(bytes).ok().filter(|&b| b > 0)
}

/// Write `rows` rows of `row_bytes` each, skipping the padding up to `stride`
pub fn write_plane<W: Write>(
    data: &[u8],
    stride: usize,
    row_bytes: usize,
    rows: usize,
    out: &mut W,
) -> io::Result<usize> {
    if stride == 0 || row_bytes > stride {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("row of {} bytes does not fit stride {}", row_bytes, stride),
        ));
    }

    let mut chunks = data.chunks(stride);
    for _ in 0..rows {
        let visible = chunks
            .next()
            .and_then(|row| row.get(..row_bytes))
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "plane data shorter than its rows")
            })?;
        out.write_all(visible)?;
    }

    Ok(row_bytes * rows)
}

/// Write every plane of a host frame to `out`, returns bytes written
pub fn write_frame<W: Write>(frame: &VideoFrame, out: &mut W) -> io::Result<usize> {
    let mut written = 0;

    for plane in 0..frame.planes() {
        let row_bytes = plane_row_bytes(frame, plane).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("no line size for plane {} of {:?}", plane, frame.format()),
            )
        })?;

        written += write_plane(
            frame.data(plane),
            frame.stride(plane),
            row_bytes,
            frame.plane_height(plane) as usize,
            out,
        )?;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::format::Pixel;

    #[test]
    fn test_write_plane_drops_padding() {
        // 3 rows of 2 visible bytes in a stride of 4
        let data = [1, 2, 0xAA, 0xAA, 3, 4, 0xAA, 0xAA, 5, 6, 0xAA, 0xAA];
        let mut out = Vec::new();

        let n = write_plane(&data, 4, 2, 3, &mut out).unwrap();
        assert_eq!(n, 6);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_write_plane_short_last_row() {
        // Final row may be cut right after its visible bytes
        let data = [1, 2, 0xAA, 3, 4];
        let mut out = Vec::new();

        write_plane(&data, 3, 2, 2, &mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_write_plane_truncated() {
        let data = [1, 2, 0xAA, 3];
        let err = write_plane(&data, 3, 2, 2, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_write_plane_missing_rows() {
        let err = write_plane(&[1, 2, 3, 4], 2, 2, 3, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_write_plane_row_wider_than_stride() {
        let err = write_plane(&[0; 8], 2, 4, 2, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_write_nv12_frame() {
        let frame = VideoFrame::new(Pixel::NV12, 6, 4);
        assert_eq!(plane_row_bytes(&frame, 0), Some(6));
        assert_eq!(plane_row_bytes(&frame, 1), Some(6));

        let mut out = Vec::new();
        let n = write_frame(&frame, &mut out).unwrap();
        // Y plane 6x4 plus interleaved UV plane 6x2
        assert_eq!(n, 6 * 4 + 6 * 2);
        assert_eq!(out.len(), n);
    }

    #[test]
    fn test_write_yuv420p_frame() {
        let frame = VideoFrame::new(Pixel::YUV420P, 8, 2);
        let mut out = Vec::new();
        let n = write_frame(&frame, &mut out).unwrap();
        assert_eq!(n, 8 * 2 + 4 + 4);
    }
}
