// ============================================================================
// TEMP BUF - contiguous scratch raster
// ============================================================================

use std::path::{Path, PathBuf};

use image::GrayImage;

use crate::error::StoreError;
use crate::swap::BufSwapper;

/// A contiguous scratch raster with an origin, used for brush masks and
/// intermediate compositing results.
///
/// Pixels may be swapped out wholesale through a [`BufSwapper`]; while
/// swapped the buffer holds no bytes and access goes through the
/// swapper-aware accessors, which reload transparently. Buffers that have
/// been through a swapper are torn down with [`TempBuf::dispose`]; a plain
/// drop can only unlink a file that already made it to disk.
pub struct TempBuf {
    width: u32,
    height: u32,
    bpp: u32,
    x: i32,
    y: i32,
    swapped: bool,
    swap_path: Option<PathBuf>,
    data: Vec<u8>,
}

impl TempBuf {
    /// Allocates a zero-filled buffer. Fails with `OutOfMemory` instead of
    /// aborting when the allocation is refused.
    pub fn new(width: u32, height: u32, bpp: u32) -> Result<Self, StoreError> {
        let bytes = width as usize * height as usize * bpp as usize;
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|_| StoreError::OutOfMemory { bytes })?;
        data.resize(bytes, 0);
        Ok(Self {
            width,
            height,
            bpp,
            x: 0,
            y: 0,
            swapped: false,
            swap_path: None,
            data,
        })
    }

    pub fn with_origin(
        width: u32,
        height: u32,
        bpp: u32,
        x: i32,
        y: i32,
    ) -> Result<Self, StoreError> {
        let mut buf = Self::new(width, height, bpp)?;
        buf.x = x;
        buf.y = y;
        Ok(buf)
    }

    // ---- geometry ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bpp(&self) -> u32 {
        self.bpp
    }

    /// Origin of the buffer in the coordinate space it was cut from.
    pub fn origin(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    pub fn set_origin(&mut self, x: i32, y: i32) {
        self.x = x;
        self.y = y;
    }

    pub fn size_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.bpp as usize
    }

    pub fn is_swapped(&self) -> bool {
        self.swapped
    }

    // ---- pixel access ----------------------------------------------------------

    /// Borrows the pixels, transparently unswapping first.
    pub fn data<'a>(&'a mut self, swapper: &mut BufSwapper) -> Result<&'a [u8], StoreError> {
        swapper.unswap(self)?;
        Ok(&self.data)
    }

    /// Mutably borrows the pixels, transparently unswapping first.
    pub fn data_mut<'a>(
        &'a mut self,
        swapper: &mut BufSwapper,
    ) -> Result<&'a mut [u8], StoreError> {
        swapper.unswap(self)?;
        Ok(&mut self.data)
    }

    /// Deep copy. The clone starts resident with no swap file of its own.
    pub fn copy(&mut self, swapper: &mut BufSwapper) -> Result<Self, StoreError> {
        swapper.unswap(self)?;
        let mut data = Vec::new();
        data.try_reserve_exact(self.data.len())
            .map_err(|_| StoreError::OutOfMemory {
                bytes: self.data.len(),
            })?;
        data.extend_from_slice(&self.data);
        Ok(Self {
            width: self.width,
            height: self.height,
            bpp: self.bpp,
            x: self.x,
            y: self.y,
            swapped: false,
            swap_path: None,
            data,
        })
    }

    // ---- teardown ------------------------------------------------------------------

    /// Tears the buffer down through its swapper, dropping pixels still
    /// parked in the cache slot and unlinking the swap file. A swapped
    /// buffer that is merely dropped cannot reach the cache, and the next
    /// swap would flush its dead pixels to a file with no owner left.
    pub fn dispose(self, swapper: &mut BufSwapper) {
        if let Some(path) = self.swap_path() {
            swapper.discard(path);
        }
    }

    // ---- conversions -------------------------------------------------------------

    /// Wraps a gray image as a single-channel buffer without copying.
    pub fn from_gray(img: GrayImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            bpp: 1,
            x: 0,
            y: 0,
            swapped: false,
            swap_path: None,
            data: img.into_raw(),
        }
    }

    /// Clones a single-channel buffer out as a gray image.
    pub fn to_gray(&mut self, swapper: &mut BufSwapper) -> Result<GrayImage, StoreError> {
        assert_eq!(self.bpp, 1, "to_gray on a {}-bpp buffer", self.bpp);
        swapper.unswap(self)?;
        Ok(GrayImage::from_raw(self.width, self.height, self.data.clone())
            .expect("buffer length matches dimensions"))
    }

    // ---- swapper plumbing ----------------------------------------------------------

    pub(crate) fn swap_path(&self) -> Option<&Path> {
        self.swap_path.as_deref()
    }

    pub(crate) fn swap_path_or_assign(&mut self, mk: impl FnOnce() -> PathBuf) -> PathBuf {
        self.swap_path.get_or_insert_with(mk).clone()
    }

    pub(crate) fn take_pixels(&mut self) -> Vec<u8> {
        self.swapped = true;
        std::mem::take(&mut self.data)
    }

    pub(crate) fn put_pixels(&mut self, bytes: Vec<u8>) {
        debug_assert_eq!(bytes.len(), self.size_bytes());
        self.data = bytes;
        self.swapped = false;
    }
}

impl Drop for TempBuf {
    fn drop(&mut self) {
        if let Some(path) = &self.swap_path {
            let _ = std::fs::remove_file(path);
        }
    }
}
