use std::path::Path;

use tempfile::tempdir;
use tilemask::{BufSwapper, TempBuf};

fn patterned(width: u32, height: u32, bpp: u32, seed: u8) -> TempBuf {
    let mut buf = TempBuf::new(width, height, bpp).unwrap();
    let dir = tempdir().unwrap();
    let mut swapper = BufSwapper::new(dir.path());
    for (i, b) in buf.data_mut(&mut swapper).unwrap().iter_mut().enumerate() {
        *b = seed.wrapping_add(i as u8);
    }
    buf
}

fn swap_file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[test]
fn test_new_buffer_is_zeroed() {
    let dir = tempdir().unwrap();
    let mut swapper = BufSwapper::new(dir.path());

    let mut buf = TempBuf::new(10, 5, 3).unwrap();
    assert_eq!((buf.width(), buf.height(), buf.bpp()), (10, 5, 3));
    assert_eq!(buf.size_bytes(), 150);
    assert_eq!(buf.origin(), (0, 0));
    assert!(!buf.is_swapped());
    assert!(buf.data(&mut swapper).unwrap().iter().all(|&b| b == 0));
}

#[test]
fn test_swap_unswap_round_trip() {
    let dir = tempdir().unwrap();
    let mut swapper = BufSwapper::new(dir.path());

    let mut buf = patterned(16, 16, 2, 3);
    let original = buf.data(&mut swapper).unwrap().to_vec();

    swapper.swap(&mut buf).unwrap();
    assert!(buf.is_swapped());
    // Swapping an already-swapped buffer is a no-op.
    swapper.swap(&mut buf).unwrap();
    assert!(buf.is_swapped());

    assert_eq!(buf.data(&mut swapper).unwrap(), original.as_slice());
    assert!(!buf.is_swapped());
}

#[test]
fn test_second_swap_flushes_the_first_to_disk() {
    let dir = tempdir().unwrap();
    let mut swapper = BufSwapper::new(dir.path());

    let mut a = patterned(8, 8, 1, 10);
    let mut b = patterned(8, 8, 1, 200);
    let a_bytes = a.data(&mut swapper).unwrap().to_vec();
    let b_bytes = b.data(&mut swapper).unwrap().to_vec();

    // One cache slot: swapping B pushes A's pixels out to its file.
    swapper.swap(&mut a).unwrap();
    swapper.swap(&mut b).unwrap();
    assert!(a.is_swapped());
    assert!(b.is_swapped());

    // A comes back from disk, B straight from the cache.
    assert_eq!(a.data(&mut swapper).unwrap(), a_bytes.as_slice());
    assert_eq!(b.data(&mut swapper).unwrap(), b_bytes.as_slice());
}

#[test]
fn test_unswap_order_does_not_matter() {
    let dir = tempdir().unwrap();
    let mut swapper = BufSwapper::new(dir.path());

    let mut bufs: Vec<TempBuf> = (0..4).map(|i| patterned(12, 7, 4, i * 40)).collect();
    let originals: Vec<Vec<u8>> = bufs
        .iter_mut()
        .map(|b| b.data(&mut swapper).unwrap().to_vec())
        .collect();

    for buf in &mut bufs {
        swapper.swap(buf).unwrap();
    }
    // Fault them back most-recent first.
    for (buf, original) in bufs.iter_mut().zip(&originals).rev() {
        assert_eq!(buf.data(&mut swapper).unwrap(), original.as_slice());
    }
}

#[test]
fn test_swap_cycles_preserve_content() {
    let dir = tempdir().unwrap();
    let mut swapper = BufSwapper::new(dir.path());

    let mut buf = patterned(20, 20, 4, 77);
    let original = buf.data(&mut swapper).unwrap().to_vec();
    let mut other = patterned(4, 4, 1, 1);

    for _ in 0..3 {
        swapper.swap(&mut buf).unwrap();
        // Displace the cache slot so the next unswap reads the file.
        swapper.swap(&mut other).unwrap();
        assert_eq!(buf.data(&mut swapper).unwrap(), original.as_slice());
        let _ = other.data(&mut swapper).unwrap();
    }
}

#[test]
fn test_copy_is_independent() {
    let dir = tempdir().unwrap();
    let mut swapper = BufSwapper::new(dir.path());

    let mut buf = TempBuf::with_origin(4, 4, 2, -3, 7).unwrap();
    buf.data_mut(&mut swapper).unwrap().fill(0x11);

    let mut copy = buf.copy(&mut swapper).unwrap();
    assert_eq!(copy.origin(), (-3, 7));
    assert_eq!(copy.size_bytes(), buf.size_bytes());
    assert!(!copy.is_swapped());

    buf.data_mut(&mut swapper).unwrap().fill(0x22);
    assert!(copy.data(&mut swapper).unwrap().iter().all(|&b| b == 0x11));
}

#[test]
fn test_copy_of_swapped_buffer_faults_in_first() {
    let dir = tempdir().unwrap();
    let mut swapper = BufSwapper::new(dir.path());

    let mut buf = patterned(6, 6, 1, 90);
    let original = buf.data(&mut swapper).unwrap().to_vec();
    swapper.swap(&mut buf).unwrap();

    let mut copy = buf.copy(&mut swapper).unwrap();
    assert!(!buf.is_swapped());
    assert_eq!(copy.data(&mut swapper).unwrap(), original.as_slice());
}

#[test]
fn test_dispose_drops_cached_pixels_without_a_file() {
    let dir = tempdir().unwrap();
    let mut swapper = BufSwapper::new(dir.path());

    let mut a = patterned(8, 8, 1, 10);
    let mut b = patterned(8, 8, 1, 200);
    let b_bytes = b.data(&mut swapper).unwrap().to_vec();

    // A's pixels sit in the cache slot, not yet flushed to disk.
    swapper.swap(&mut a).unwrap();
    a.dispose(&mut swapper);

    // The next swap must not flush the dead pixels to an unowned file.
    swapper.swap(&mut b).unwrap();
    assert_eq!(swap_file_count(dir.path()), 0);
    assert_eq!(b.data(&mut swapper).unwrap(), b_bytes.as_slice());

    b.dispose(&mut swapper);
    assert_eq!(swap_file_count(dir.path()), 0);
}

#[test]
fn test_dispose_unlinks_the_flushed_file() {
    let dir = tempdir().unwrap();
    let mut swapper = BufSwapper::new(dir.path());

    let mut a = patterned(8, 8, 1, 1);
    let mut b = patterned(8, 8, 1, 2);
    swapper.swap(&mut a).unwrap();
    swapper.swap(&mut b).unwrap();
    assert_eq!(swap_file_count(dir.path()), 1);

    a.dispose(&mut swapper);
    assert_eq!(swap_file_count(dir.path()), 0);
    b.dispose(&mut swapper);
    assert_eq!(swap_file_count(dir.path()), 0);
}

#[test]
fn test_gray_image_round_trip() {
    let dir = tempdir().unwrap();
    let mut swapper = BufSwapper::new(dir.path());

    let img = image::GrayImage::from_fn(9, 4, |x, y| image::Luma([(x * 10 + y) as u8]));
    let mut buf = TempBuf::from_gray(img.clone());
    let mut displacer = patterned(2, 2, 1, 0);
    assert_eq!((buf.width(), buf.height(), buf.bpp()), (9, 4, 1));

    // Conversion survives a trip through the swap file.
    swapper.swap(&mut buf).unwrap();
    swapper.swap(&mut displacer).unwrap();
    let back = buf.to_gray(&mut swapper).unwrap();
    assert_eq!(back, img);
}

#[test]
fn test_origin_follows_the_buffer() {
    let mut buf = TempBuf::with_origin(3, 3, 1, 100, -40).unwrap();
    assert_eq!(buf.origin(), (100, -40));
    buf.set_origin(0, 5);
    assert_eq!(buf.origin(), (0, 5));
}
