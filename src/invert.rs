//! Raster inversion.
//!
//! Page rasters get a plain RGB inversion with detected regions restored from
//! the original. Embedded images that may carry partial transparency go
//! through [`invert_full_premultiplied`] so their edges do not pick up a dark
//! halo.

use image::RgbaImage;

use crate::boxes::BoundingBox;

/// Invert every RGB channel in place, leaving alpha untouched.
///
/// This is the cheap uniform fallback, equivalent to a CSS `invert(1)`
/// filter. The buffer is mutated in place.
pub fn invert_flat_in_place(image: &mut RgbaImage) {
    for px in image.pixels_mut() {
        for ch in 0..3 {
            px[ch] = 255 - px[ch];
        }
    }
}

/// Invert the whole raster except inside `boxes`, which keep their original
/// pixels.
///
/// Returns a new buffer; `image` is not modified. An empty `boxes` slice gives
/// a full inversion. Boxes are expected to come from
/// [`clamp_box_to_pixels`](crate::boxes::clamp_box_to_pixels); any part that
/// still falls outside the raster is clipped.
#[must_use]
pub fn invert_outside_boxes(image: &RgbaImage, boxes: &[BoundingBox]) -> RgbaImage {
    let mut out = image.clone();
    invert_flat_in_place(&mut out);

    let img_w = image.width();
    let img_h = image.height();
    let stride = img_w as usize * 4;
    let src = image.as_raw();
    let dst: &mut [u8] = &mut out;

    for b in boxes {
        // Clip to image bounds
        let x2 = b.x.saturating_add(b.w).min(img_w);
        let y2 = b.y.saturating_add(b.h).min(img_h);
        if b.x >= x2 || b.y >= y2 {
            continue;
        }

        let start_col = b.x as usize * 4;
        let end_col = x2 as usize * 4;
        for row in b.y as usize..y2 as usize {
            let range = row * stride + start_col..row * stride + end_col;
            dst[range.clone()].copy_from_slice(&src[range]);
        }
    }

    out
}

/// Invert a raster whose color channels are premultiplied by alpha.
///
/// Each pixel with `a > 0` is un-premultiplied, inverted and re-premultiplied
/// with rounding. Fully transparent pixels are copied unchanged. Returns a new
/// buffer.
#[must_use]
pub fn invert_full_premultiplied(image: &RgbaImage) -> RgbaImage {
    let mut out = image.clone();
    for px in out.pixels_mut() {
        let alpha = px[3];
        if alpha == 0 {
            continue;
        }
        let a = f64::from(alpha) / 255.0;
        for ch in 0..3 {
            let straight = f64::from(px[ch]) / a;
            let inverted = (255.0 - straight) * a;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                px[ch] = inverted.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gradient(w: u32, h: u32) -> RgbaImage {
        #[allow(clippy::cast_possible_truncation)]
        RgbaImage::from_fn(w, h, |x, y| {
            Rgba([(x * 16) as u8, (y * 16) as u8, ((x + y) * 8) as u8, 200])
        })
    }

    #[test]
    fn full_box_leaves_image_unchanged() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        let full = BoundingBox { x: 0, y: 0, w: 4, h: 4 };
        assert_eq!(invert_outside_boxes(&img, &[full]), img);
    }

    #[test]
    fn no_boxes_inverts_everything_and_keeps_alpha() {
        let img = gradient(6, 5);
        let out = invert_outside_boxes(&img, &[]);
        for (o, i) in out.pixels().zip(img.pixels()) {
            assert_eq!(o[0], 255 - i[0]);
            assert_eq!(o[1], 255 - i[1]);
            assert_eq!(o[2], 255 - i[2]);
            assert_eq!(o[3], i[3]);
        }
    }

    #[test]
    fn only_box_interior_is_restored() {
        let img = gradient(10, 10);
        let b = BoundingBox { x: 2, y: 3, w: 5, h: 4 };
        let out = invert_outside_boxes(&img, &[b]);
        for (x, y, px) in out.enumerate_pixels() {
            let orig = img.get_pixel(x, y);
            let inside = (2..7).contains(&x) && (3..7).contains(&y);
            if inside {
                assert_eq!(px, orig, "({x},{y}) should be restored");
            } else {
                assert_eq!(px[0], 255 - orig[0], "({x},{y}) should be inverted");
            }
        }
    }

    #[test]
    fn overlapping_boxes_restore_union() {
        let img = gradient(8, 8);
        let a = BoundingBox { x: 0, y: 0, w: 5, h: 5 };
        let b = BoundingBox { x: 3, y: 3, w: 5, h: 5 };
        let out = invert_outside_boxes(&img, &[a, b]);
        assert_eq!(out.get_pixel(4, 4), img.get_pixel(4, 4));
        assert_eq!(out.get_pixel(7, 7), img.get_pixel(7, 7));
        assert_eq!(out.get_pixel(7, 0)[0], 255 - img.get_pixel(7, 0)[0]);
    }

    #[test]
    fn oversized_box_is_clipped_instead_of_panicking() {
        let img = gradient(5, 5);
        let b = BoundingBox { x: 3, y: 3, w: 50, h: 50 };
        let out = invert_outside_boxes(&img, &[b]);
        assert_eq!(out.get_pixel(4, 4), img.get_pixel(4, 4));
        assert_eq!(out.get_pixel(0, 0)[1], 255 - img.get_pixel(0, 0)[1]);
    }

    #[test]
    fn source_is_not_modified() {
        let img = gradient(4, 4);
        let copy = img.clone();
        let _ = invert_outside_boxes(&img, &[]);
        let _ = invert_full_premultiplied(&img);
        assert_eq!(img, copy);
    }

    #[test]
    fn premultiplied_inversion_of_opaque_pixels_is_exact() {
        let img = RgbaImage::from_fn(16, 16, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            Rgba([(x * 17) as u8, (y * 17) as u8, 99, 255])
        });
        let once = invert_full_premultiplied(&img);
        assert_eq!(once.get_pixel(3, 5), &Rgba([255 - 51, 255 - 85, 156, 255]));
        assert_eq!(invert_full_premultiplied(&once), img);
    }

    #[test]
    fn premultiplied_round_trip_within_one_for_partial_alpha() {
        // Valid premultiplied data: every channel <= alpha.
        let img = RgbaImage::from_fn(32, 8, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            let a = (y * 32 + 7) as u8;
            #[allow(clippy::cast_possible_truncation)]
            let c = |k: u32| ((u32::from(a) * ((x * k) % 256)) / 255) as u8;
            Rgba([c(3), c(7), c(11), a])
        });
        let back = invert_full_premultiplied(&invert_full_premultiplied(&img));
        for (b, o) in back.pixels().zip(img.pixels()) {
            for ch in 0..3 {
                let diff = (i32::from(b[ch]) - i32::from(o[ch])).abs();
                assert!(diff <= 1, "{o:?} came back as {b:?}");
            }
            assert_eq!(b[3], o[3]);
        }
    }

    #[test]
    fn transparent_pixels_are_untouched() {
        let img = RgbaImage::from_pixel(3, 3, Rgba([12, 34, 56, 0]));
        assert_eq!(invert_full_premultiplied(&img), img);
    }

    #[test]
    fn half_alpha_inverts_within_coverage() {
        // Straight white at 50% coverage stored premultiplied is 128; its
        // inverse is black, which stays 0 after re-premultiplying.
        let img = RgbaImage::from_pixel(1, 1, Rgba([128, 0, 64, 128]));
        let out = invert_full_premultiplied(&img);
        assert_eq!(out.get_pixel(0, 0), &Rgba([0, 128, 64, 128]));
    }

    #[test]
    fn flat_inversion_is_an_involution() {
        let img = gradient(7, 3);
        let mut buf = img.clone();
        invert_flat_in_place(&mut buf);
        assert_ne!(buf, img);
        invert_flat_in_place(&mut buf);
        assert_eq!(buf, img);
    }
}
