//! # Raster
//!
//! Thin helpers over [`image`] buffers. Colour content is straight (non-premultiplied) RGBA8,
//! selection coverage is 8-bit luma where 0 is "not selected" and 255 "fully selected".
//! These are intentionally simple CPU implementations - the document model only needs them to be
//! correct, the renderer is free to do its own thing.

use crate::state::transform::Matrix;
use crate::util::{Anchor, Point, Rect, Size};
use image::{GrayImage, ImageBuffer, Luma, Pixel, Rgba, RgbaImage};

/// Blend `src` over `dst` with the standard "source over" operator, scaling source alpha by `opacity`.
pub fn alpha_over(dst: &mut Rgba<u8>, src: Rgba<u8>, opacity: f32) {
    let src_a = f32::from(src[3]) / 255.0 * opacity;
    if src_a <= 0.0 {
        return;
    }
    let dst_a = f32::from(dst[3]) / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        *dst = Rgba([0; 4]);
        return;
    }
    for c in 0..3 {
        let s = f32::from(src[c]);
        let d = f32::from(dst[c]);
        let v = (s * src_a + d * dst_a * (1.0 - src_a)) / out_a;
        dst[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// Composite `src` onto `dst` with its top-left at `offset` (in `dst` pixel space).
/// Out-of-bounds source pixels are dropped.
pub fn composite_at(dst: &mut RgbaImage, src: &RgbaImage, offset: Point, opacity: f32) {
    let Some(overlap) = Rect::from_size(size_of(dst))
        .intersection(&Rect::new(offset.x, offset.y, src.width(), src.height()))
    else {
        return;
    };
    for y in overlap.y..overlap.bottom() {
        for x in overlap.x..overlap.right() {
            let s = *src.get_pixel((x - offset.x) as u32, (y - offset.y) as u32);
            alpha_over(dst.get_pixel_mut(x as u32, y as u32), s, opacity);
        }
    }
}

/// Composite `src` onto `dst`, placed by `transform` from `src` pixels to `dst` pixels.
/// Whole-pixel translations are copied directly, anything else is resampled with [`warp`].
pub fn composite_transformed(dst: &mut RgbaImage, src: &RgbaImage, transform: &Matrix, opacity: f32) {
    if transform.is_translation() {
        composite_at(dst, src, transform.pixel_offset(), opacity);
        return;
    }
    let Some(inverse) = transform.inverse() else {
        return;
    };
    let Some(region) = Rect::from_size(size_of(dst)).intersection(&transform.cover(size_of(src)))
    else {
        return;
    };
    let to_src = Matrix::from_translation(region.x as f32, region.y as f32).then(&inverse);
    let placed = warp(src, region.size(), &to_src);
    composite_at(dst, &placed, region.origin(), opacity);
}

/// Nearest-neighbour resample of `src` onto a fresh `size` buffer. `to_src` maps positions in the
/// new buffer to positions in `src`, pixels landing outside of `src` are zero.
#[must_use]
pub fn warp<P: Pixel>(
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    size: Size,
    to_src: &Matrix,
) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let mut out = ImageBuffer::new(size.width, size.height);
    let (width, height) = (src.width() as f32, src.height() as f32);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let [sx, sy] = to_src.map_point([x as f32 + 0.5, y as f32 + 0.5]);
        let (sx, sy) = (sx.floor(), sy.floor());
        if sx >= 0.0 && sy >= 0.0 && sx < width && sy < height {
            *pixel = *src.get_pixel(sx as u32, sy as u32);
        }
    }
    out
}

/// Copy `src` into `dst` at `offset`, replacing rather than blending.
pub fn replace_at<P: Pixel>(
    dst: &mut ImageBuffer<P, Vec<P::Subpixel>>,
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    offset: Point,
) {
    image::imageops::replace(dst, src, i64::from(offset.x), i64::from(offset.y));
}

/// Copy out the `region` of `src`. Parts of the region outside of `src` are zero (transparent).
#[must_use]
pub fn copy_region<P: Pixel>(
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    region: Rect,
) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let mut out = ImageBuffer::new(region.width, region.height);
    replace_at(&mut out, src, Point::new(-region.x, -region.y));
    out
}

/// Reallocate `src` at `new_size`, placing old content according to `anchor`.
/// New area is zero-filled, content falling outside is discarded.
#[must_use]
pub fn resize_canvas<P: Pixel>(
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    new_size: Size,
    anchor: Anchor,
) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let offset = anchor.offset(size_of(src), new_size);
    let mut out = ImageBuffer::new(new_size.width, new_size.height);
    replace_at(&mut out, src, offset);
    out
}

/// Scale an image to exactly `size`. No-op clone if already that size.
#[must_use]
pub fn scale_to<P>(
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    size: Size,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    if size_of(src) == size {
        return src.clone();
    }
    image::imageops::resize(
        src,
        size.width,
        size.height,
        image::imageops::FilterType::Triangle,
    )
}

/// Tightest rectangle containing every pixel with non-zero alpha, or None if fully transparent.
#[must_use]
pub fn content_bounds(image: &RgbaImage) -> Option<Rect> {
    bounds_where(image.width(), image.height(), |x, y| {
        image.get_pixel(x, y)[3] != 0
    })
}

/// Tightest rectangle containing every non-zero mask pixel, or None if the mask is empty.
#[must_use]
pub fn mask_bounds(mask: &GrayImage) -> Option<Rect> {
    bounds_where(mask.width(), mask.height(), |x, y| mask.get_pixel(x, y)[0] != 0)
}

fn bounds_where(width: u32, height: u32, hit: impl Fn(u32, u32) -> bool) -> Option<Rect> {
    let mut min = (u32::MAX, u32::MAX);
    let mut max = (0, 0);
    let mut any = false;
    for y in 0..height {
        for x in 0..width {
            if hit(x, y) {
                any = true;
                min = (min.0.min(x), min.1.min(y));
                max = (max.0.max(x), max.1.max(y));
            }
        }
    }
    any.then(|| {
        Rect::new(
            min.0 as i32,
            min.1 as i32,
            max.0 - min.0 + 1,
            max.1 - min.1 + 1,
        )
    })
}

#[must_use]
pub fn is_fully_transparent(image: &RgbaImage) -> bool {
    image.pixels().all(|p| p[3] == 0)
}

/// "Destination in": multiply alpha by mask coverage. `mask` is sampled at `(x + offset.x, y + offset.y)`,
/// positions outside of the mask count as uncovered.
pub fn apply_mask(image: &mut RgbaImage, mask: &GrayImage, offset: Point) {
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let mx = x as i64 + i64::from(offset.x);
        let my = y as i64 + i64::from(offset.y);
        let coverage = if mx >= 0 && my >= 0 && mx < i64::from(mask.width()) && my < i64::from(mask.height())
        {
            u16::from(mask.get_pixel(mx as u32, my as u32)[0])
        } else {
            0
        };
        pixel[3] = ((u16::from(pixel[3]) * coverage + 127) / 255) as u8;
    }
}

/// "Destination out": remove the covered parts of `image`. The inverse of [`apply_mask`].
pub fn cut_mask(image: &mut RgbaImage, mask: &GrayImage) {
    for (pixel, coverage) in image.pixels_mut().zip(mask.pixels()) {
        let keep = 255 - u16::from(coverage[0]);
        pixel[3] = ((u16::from(pixel[3]) * keep + 127) / 255) as u8;
    }
}

/// Softened copy of a mask, used to feather inpainting edges.
#[must_use]
pub fn blurred_mask(mask: &GrayImage, sigma: f32) -> GrayImage {
    image::imageops::blur(mask, sigma)
}

/// Turn a coverage mask into a white image with the mask as alpha, the form generation backends expect.
#[must_use]
pub fn mask_to_rgba(mask: &GrayImage) -> RgbaImage {
    ImageBuffer::from_fn(mask.width(), mask.height(), |x, y| {
        Rgba([255, 255, 255, mask.get_pixel(x, y)[0]])
    })
}

/// Stamp a hard round dab, calling `put` for each covered pixel with its coverage (0..=1).
/// Edge pixels get fractional coverage for a one pixel antialiased rim.
pub fn for_each_in_disc(
    size: Size,
    center: (f32, f32),
    radius: f32,
    mut put: impl FnMut(u32, u32, f32),
) {
    let radius = radius.max(0.5);
    let x0 = (center.0 - radius - 1.0).floor().max(0.0) as u32;
    let y0 = (center.1 - radius - 1.0).floor().max(0.0) as u32;
    let x1 = ((center.0 + radius + 1.0).ceil().max(0.0) as u32).min(size.width);
    let y1 = ((center.1 + radius + 1.0).ceil().max(0.0) as u32).min(size.height);
    for y in y0..y1 {
        for x in x0..x1 {
            let dx = x as f32 + 0.5 - center.0;
            let dy = y as f32 + 0.5 - center.1;
            let dist = (dx * dx + dy * dy).sqrt();
            let coverage = (radius + 0.5 - dist).clamp(0.0, 1.0);
            if coverage > 0.0 {
                put(x, y, coverage);
            }
        }
    }
}

/// Paint a dab of `color`. When `mask` is given, dab coverage is additionally scaled by the mask,
/// sampled at the pixel position plus `mask_offset`.
pub fn paint_dab(
    image: &mut RgbaImage,
    center: (f32, f32),
    radius: f32,
    color: Rgba<u8>,
    mask: Option<(&GrayImage, Point)>,
) {
    let size = size_of(image);
    for_each_in_disc(size, center, radius, |x, y, coverage| {
        let coverage = coverage * mask_coverage(mask, x, y);
        alpha_over(image.get_pixel_mut(x, y), color, coverage);
    });
}

/// Erase a dab, reducing alpha by the dab coverage.
pub fn erase_dab(
    image: &mut RgbaImage,
    center: (f32, f32),
    radius: f32,
    mask: Option<(&GrayImage, Point)>,
) {
    let size = size_of(image);
    for_each_in_disc(size, center, radius, |x, y, coverage| {
        let coverage = coverage * mask_coverage(mask, x, y);
        let pixel = image.get_pixel_mut(x, y);
        pixel[3] = (f32::from(pixel[3]) * (1.0 - coverage)).round() as u8;
    });
}

fn mask_coverage(mask: Option<(&GrayImage, Point)>, x: u32, y: u32) -> f32 {
    let Some((mask, offset)) = mask else {
        return 1.0;
    };
    let mx = x as i64 + i64::from(offset.x);
    let my = y as i64 + i64::from(offset.y);
    if mx < 0 || my < 0 || mx >= i64::from(mask.width()) || my >= i64::from(mask.height()) {
        0.0
    } else {
        f32::from(mask.get_pixel(mx as u32, my as u32)[0]) / 255.0
    }
}

/// Paint or erase coverage in a mask. `value` is the target coverage, blended in by dab coverage.
pub fn mask_dab(mask: &mut GrayImage, center: (f32, f32), radius: f32, value: u8) {
    let size = size_of(mask);
    for_each_in_disc(size, center, radius, |x, y, coverage| {
        let pixel = mask.get_pixel_mut(x, y);
        let old = f32::from(pixel[0]);
        let new = old + (f32::from(value) - old) * coverage;
        *pixel = Luma([new.round().clamp(0.0, 255.0) as u8]);
    });
}

#[must_use]
pub fn size_of<P: Pixel>(image: &ImageBuffer<P, Vec<P::Subpixel>>) -> Size {
    Size::new(image.width(), image.height())
}

/// A fresh, fully transparent buffer.
#[must_use]
pub fn transparent(size: Size) -> RgbaImage {
    RgbaImage::new(size.width, size.height)
}

/// A buffer filled with a single colour.
#[must_use]
pub fn filled(size: Size, color: Rgba<u8>) -> RgbaImage {
    RgbaImage::from_pixel(size.width, size.height, color)
}
