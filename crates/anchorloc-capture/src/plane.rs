//! Stride-aware luma plane copy.
//!
//! Camera drivers hand out image planes whose rows are padded to a `stride`
//! wider than the image.  Localizers want tightly packed rows, sometimes
//! flipped vertically.  [`copy_unpadded`] does that row by row into a
//! [`PixelBuffer`] the caller keeps around between frames.

use anchorloc_types::PixelBuffer;
use thiserror::Error;

/// A borrowed single-channel image plane with row padding.
#[derive(Debug, Clone, Copy)]
pub struct LumaPlane<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Bytes between the starts of consecutive rows (≥ `width`).
    pub stride: u32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaneError {
    #[error("plane has zero width or height")]
    Empty,
    #[error("stride {stride} is smaller than width {width}")]
    StrideTooSmall { stride: u32, width: u32 },
    #[error("plane data holds {actual} bytes, {required} required")]
    Truncated { required: usize, actual: usize },
}

impl LumaPlane<'_> {
    /// Minimum number of bytes the plane must hold.
    fn required_len(&self) -> usize {
        self.stride as usize * (self.height as usize - 1) + self.width as usize
    }

    fn check(&self) -> Result<(), PlaneError> {
        if self.width == 0 || self.height == 0 {
            return Err(PlaneError::Empty);
        }
        if self.stride < self.width {
            return Err(PlaneError::StrideTooSmall {
                stride: self.stride,
                width: self.width,
            });
        }
        let required = self.required_len();
        if self.data.len() < required {
            return Err(PlaneError::Truncated {
                required,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

/// Copy `plane` into `dst` with the row padding removed, optionally flipping
/// the rows.  `dst` ends up exactly `width * height` bytes long.
pub fn copy_unpadded(
    plane: &LumaPlane<'_>,
    invert_vertically: bool,
    dst: &mut PixelBuffer,
) -> Result<(), PlaneError> {
    plane.check()?;
    let width = plane.width as usize;
    let height = plane.height as usize;
    let stride = plane.stride as usize;

    let out = dst.prepare(width * height);
    for (row, out_row) in out.chunks_exact_mut(width).enumerate() {
        let src_row = if invert_vertically { height - 1 - row } else { row };
        let start = src_row * stride;
        out_row.copy_from_slice(&plane.data[start..start + width]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // 3×2 image in a stride-4 plane; the padding byte is 0xFF.
    const PADDED: [u8; 7] = [1, 2, 3, 0xFF, 4, 5, 6];

    fn plane() -> LumaPlane<'static> {
        LumaPlane {
            data: &PADDED,
            width: 3,
            height: 2,
            stride: 4,
        }
    }

    #[test]
    fn padding_is_removed() {
        let mut buf = PixelBuffer::new();
        copy_unpadded(&plane(), false, &mut buf).unwrap();
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn rows_can_be_flipped() {
        let mut buf = PixelBuffer::new();
        copy_unpadded(&plane(), true, &mut buf).unwrap();
        assert_eq!(buf.as_slice(), &[4, 5, 6, 1, 2, 3]);
    }

    #[test]
    fn last_row_needs_no_padding() {
        // 7 bytes suffice: the final row has no trailing padding.
        assert_eq!(plane().required_len(), 7);
    }

    #[test]
    fn buffer_is_reused_across_frames() {
        let mut buf = PixelBuffer::with_capacity(6);
        copy_unpadded(&plane(), false, &mut buf).unwrap();
        let ptr = buf.as_slice().as_ptr();
        copy_unpadded(&plane(), true, &mut buf).unwrap();
        assert_eq!(buf.as_slice().as_ptr(), ptr);
    }

    #[test]
    fn invalid_planes_are_rejected() {
        let mut buf = PixelBuffer::new();
        let narrow = LumaPlane {
            stride: 2,
            ..plane()
        };
        assert_eq!(
            copy_unpadded(&narrow, false, &mut buf),
            Err(PlaneError::StrideTooSmall { stride: 2, width: 3 })
        );

        let truncated = LumaPlane {
            data: &PADDED[..6],
            ..plane()
        };
        assert_eq!(
            copy_unpadded(&truncated, false, &mut buf),
            Err(PlaneError::Truncated {
                required: 7,
                actual: 6
            })
        );

        let empty = LumaPlane {
            height: 0,
            ..plane()
        };
        assert_eq!(copy_unpadded(&empty, false, &mut buf), Err(PlaneError::Empty));
    }
}
