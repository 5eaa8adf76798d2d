use std::io::Cursor;

use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const SIDE: u32 = 64;

/// Vertical stripes with per-pixel noise, reproducible from `seed`.
pub fn striped_texture(seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    RgbImage::from_fn(SIDE, SIDE, |x, _y| {
        let base: i32 = if (x / 4) % 2 == 0 { 70 } else { 130 };
        let mut px = [0u8; 3];
        for (c, tint) in [0i32, 8, -8].into_iter().enumerate() {
            let v = base + tint + rng.gen_range(-20..=20);
            px[c] = v.clamp(0, 255) as u8;
        }
        Rgb(px)
    })
}

/// Copy of `image` with a solid white rectangle painted over it.
pub fn with_bright_rectangle(image: &RgbImage, x0: u32, y0: u32, w: u32, h: u32) -> RgbImage {
    let mut out = image.clone();
    for y in y0..(y0 + h).min(out.height()) {
        for x in x0..(x0 + w).min(out.width()) {
            out.put_pixel(x, y, Rgb([255, 255, 255]));
        }
    }
    out
}

pub fn uniform(width: u32, height: u32, value: u8) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([value, value, value]))
}

pub fn encode_png(image: &RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .expect("png encode");
    buf
}

/// `n` identical copies of the seeded texture.
pub fn training_set(n: usize) -> Vec<RgbImage> {
    (0..n).map(|_| striped_texture(7)).collect()
}

/// `n` textures from distinct seeds `1..=n`.
pub fn distinct_training_set(n: usize) -> Vec<RgbImage> {
    (1..=n as u64).map(striped_texture).collect()
}

/// Copy of `image` with the red channel of one pixel moved by one level.
pub fn nudged(image: &RgbImage, x: u32, y: u32) -> RgbImage {
    let mut out = image.clone();
    let px = out.get_pixel_mut(x, y);
    px.0[0] = px.0[0].saturating_add(1);
    if px.0[0] == image.get_pixel(x, y).0[0] {
        px.0[0] -= 1;
    }
    out
}
