//! Low-level pixel operations shared by the detectors.
//!
//! Operations that the detector algorithms need but that have no direct
//! counterpart in `imageproc`: grayscale morphology (top-hat/black-hat),
//! directional binary closing, local-mean adaptive thresholding, Zhang-Suen
//! skeleton thinning, local binary patterns, Lab color conversion and Gabor
//! filtering. All functions are deterministic and allocation-per-call.

use image::{GrayImage, Luma, RgbImage};

/// Converts a grayscale image into a row-major f32 buffer.
pub fn gray_to_f32(image: &GrayImage) -> Vec<f32> {
    image.as_raw().iter().map(|&v| v as f32).collect()
}

/// Min-max normalizes an f32 field into an 8-bit grayscale image.
///
/// A constant field maps to zero.
pub fn f32_to_gray_normalized(field: &[f32], width: u32, height: u32) -> GrayImage {
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for &v in field {
        min = min.min(v);
        max = max.max(v);
    }
    let range = max - min;
    let mut out = GrayImage::new(width, height);
    if range <= f32::EPSILON {
        return out;
    }
    for (i, pixel) in out.pixels_mut().enumerate() {
        pixel.0[0] = ((field[i] - min) / range * 255.0).round() as u8;
    }
    out
}

/// Summed-area table with one row/column of zero padding.
///
/// `sat[(y + 1) * (w + 1) + (x + 1)]` holds the sum of all pixels in
/// `[0..=x, 0..=y]`.
pub fn integral_image(image: &GrayImage) -> Vec<u64> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let stride = w + 1;
    let mut sat = vec![0u64; stride * (h + 1)];
    let raw = image.as_raw();
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += raw[y * w + x] as u64;
            sat[(y + 1) * stride + (x + 1)] = sat[y * stride + (x + 1)] + row_sum;
        }
    }
    sat
}

/// Sum of pixel values in the inclusive window `[x0..=x1, y0..=y1]`.
pub fn integral_sum(sat: &[u64], image_width: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> u64 {
    let stride = image_width as usize + 1;
    let (x0, y0, x1, y1) = (x0 as usize, y0 as usize, x1 as usize, y1 as usize);
    sat[(y1 + 1) * stride + (x1 + 1)] + sat[y0 * stride + x0]
        - sat[y0 * stride + (x1 + 1)]
        - sat[(y1 + 1) * stride + x0]
}

/// Mean and standard deviation of a rectangular region.
pub fn region_mean_std(image: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32) -> (f64, f64) {
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;
    for y in y0..=y1.min(image.height().saturating_sub(1)) {
        for x in x0..=x1.min(image.width().saturating_sub(1)) {
            let v = image.get_pixel(x, y).0[0] as f64;
            sum += v;
            sum_sq += v * v;
            count += 1;
        }
    }
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f64;
    let var = (sum_sq / count as f64 - mean * mean).max(0.0);
    (mean, var.sqrt())
}

/// Grayscale erosion: minimum over a `(2r+1)` square window.
pub fn gray_erode(image: &GrayImage, radius: u32) -> GrayImage {
    window_extremum(image, radius, false)
}

/// Grayscale dilation: maximum over a `(2r+1)` square window.
pub fn gray_dilate(image: &GrayImage, radius: u32) -> GrayImage {
    window_extremum(image, radius, true)
}

fn window_extremum(image: &GrayImage, radius: u32, take_max: bool) -> GrayImage {
    let (w, h) = image.dimensions();
    let r = radius as i64;
    let mut out = GrayImage::new(w, h);
    // Separable pass: rows then columns.
    let mut tmp = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut best = if take_max { 0u8 } else { 255u8 };
            for dx in -r..=r {
                let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
                let v = image.get_pixel(sx, y).0[0];
                best = if take_max { best.max(v) } else { best.min(v) };
            }
            tmp.put_pixel(x, y, Luma([best]));
        }
    }
    for y in 0..h {
        for x in 0..w {
            let mut best = if take_max { 0u8 } else { 255u8 };
            for dy in -r..=r {
                let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
                let v = tmp.get_pixel(x, sy).0[0];
                best = if take_max { best.max(v) } else { best.min(v) };
            }
            out.put_pixel(x, y, Luma([best]));
        }
    }
    out
}

/// Grayscale opening (erode then dilate).
pub fn gray_open(image: &GrayImage, radius: u32) -> GrayImage {
    gray_dilate(&gray_erode(image, radius), radius)
}

/// Grayscale closing (dilate then erode).
pub fn gray_close(image: &GrayImage, radius: u32) -> GrayImage {
    gray_erode(&gray_dilate(image, radius), radius)
}

/// Top-hat transform: image minus its opening. Highlights bright spots
/// smaller than the structuring window.
pub fn top_hat(image: &GrayImage, radius: u32) -> GrayImage {
    let opened = gray_open(image, radius);
    let mut out = GrayImage::new(image.width(), image.height());
    for (o, (i, p)) in out
        .pixels_mut()
        .zip(image.pixels().zip(opened.pixels()))
    {
        o.0[0] = i.0[0].saturating_sub(p.0[0]);
    }
    out
}

/// Black-hat transform: closing minus the image. Highlights dark spots
/// smaller than the structuring window.
pub fn black_hat(image: &GrayImage, radius: u32) -> GrayImage {
    let closed = gray_close(image, radius);
    let mut out = GrayImage::new(image.width(), image.height());
    for (o, (i, p)) in out
        .pixels_mut()
        .zip(image.pixels().zip(closed.pixels()))
    {
        o.0[0] = p.0[0].saturating_sub(i.0[0]);
    }
    out
}

/// Saturating pixel-wise sum of two equally sized images.
pub fn saturating_add(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let mut out = GrayImage::new(a.width(), a.height());
    for (o, (pa, pb)) in out.pixels_mut().zip(a.pixels().zip(b.pixels())) {
        o.0[0] = pa.0[0].saturating_add(pb.0[0]);
    }
    out
}

/// Binary closing with a 1-pixel-thick line element of half length
/// `half_len`, oriented along one axis. Bridges small gaps along that axis
/// only.
pub fn close_binary_directional(image: &GrayImage, half_len: u32, horizontal: bool) -> GrayImage {
    let dilated = line_extremum(image, half_len, horizontal, true);
    line_extremum(&dilated, half_len, horizontal, false)
}

fn line_extremum(image: &GrayImage, half_len: u32, horizontal: bool, take_max: bool) -> GrayImage {
    let (w, h) = image.dimensions();
    let r = half_len as i64;
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut best = if take_max { 0u8 } else { 255u8 };
            for d in -r..=r {
                let (sx, sy) = if horizontal {
                    ((x as i64 + d).clamp(0, w as i64 - 1) as u32, y)
                } else {
                    (x, (y as i64 + d).clamp(0, h as i64 - 1) as u32)
                };
                let v = image.get_pixel(sx, sy).0[0];
                best = if take_max { best.max(v) } else { best.min(v) };
            }
            out.put_pixel(x, y, Luma([best]));
        }
    }
    out
}

/// Local-mean adaptive threshold, inverted: a pixel becomes foreground
/// (255) when it is darker than its neighborhood mean minus `offset`.
///
/// The neighborhood is the `(2·block_radius+1)` square around the pixel.
pub fn adaptive_threshold_inv(image: &GrayImage, block_radius: u32, offset: i32) -> GrayImage {
    let (w, h) = image.dimensions();
    let mut out = GrayImage::new(w, h);
    if w == 0 || h == 0 {
        return out;
    }
    let sat = integral_image(image);
    for y in 0..h {
        for x in 0..w {
            let x0 = x.saturating_sub(block_radius);
            let y0 = y.saturating_sub(block_radius);
            let x1 = (x + block_radius).min(w - 1);
            let y1 = (y + block_radius).min(h - 1);
            let count = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f64;
            let mean = integral_sum(&sat, w, x0, y0, x1, y1) as f64 / count;
            let v = image.get_pixel(x, y).0[0] as f64;
            if v < mean - offset as f64 {
                out.put_pixel(x, y, Luma([255]));
            }
        }
    }
    out
}

/// Iterative Zhang-Suen thinning of a binary image to a 1-pixel skeleton.
///
/// Foreground is any non-zero pixel; the result uses 255 for skeleton
/// pixels.
pub fn thin_skeleton(binary: &GrayImage) -> GrayImage {
    let (w, h) = binary.dimensions();
    if w < 3 || h < 3 {
        return binary.clone();
    }
    let w_us = w as usize;
    let mut grid: Vec<u8> = binary.as_raw().iter().map(|&v| u8::from(v > 0)).collect();

    let idx = |x: usize, y: usize| y * w_us + x;
    let mut to_clear: Vec<usize> = Vec::new();
    loop {
        let mut changed = false;
        for phase in 0..2 {
            to_clear.clear();
            for y in 1..(h as usize - 1) {
                for x in 1..w_us - 1 {
                    if grid[idx(x, y)] == 0 {
                        continue;
                    }
                    // Neighbors clockwise from north.
                    let p = [
                        grid[idx(x, y - 1)],
                        grid[idx(x + 1, y - 1)],
                        grid[idx(x + 1, y)],
                        grid[idx(x + 1, y + 1)],
                        grid[idx(x, y + 1)],
                        grid[idx(x - 1, y + 1)],
                        grid[idx(x - 1, y)],
                        grid[idx(x - 1, y - 1)],
                    ];
                    let b: u8 = p.iter().sum();
                    if !(2..=6).contains(&b) {
                        continue;
                    }
                    let mut a = 0;
                    for k in 0..8 {
                        if p[k] == 0 && p[(k + 1) % 8] == 1 {
                            a += 1;
                        }
                    }
                    if a != 1 {
                        continue;
                    }
                    let (c1, c2) = if phase == 0 {
                        (p[0] * p[2] * p[4], p[2] * p[4] * p[6])
                    } else {
                        (p[0] * p[2] * p[6], p[0] * p[4] * p[6])
                    };
                    if c1 == 0 && c2 == 0 {
                        to_clear.push(idx(x, y));
                    }
                }
            }
            if !to_clear.is_empty() {
                changed = true;
                for &i in &to_clear {
                    grid[i] = 0;
                }
            }
        }
        if !changed {
            break;
        }
    }

    GrayImage::from_raw(w, h, grid.iter().map(|&v| v * 255).collect())
        .expect("skeleton buffer matches dimensions")
}

/// 8-neighbor local binary pattern code for every interior pixel.
///
/// Border pixels are zero.
pub fn lbp_map(image: &GrayImage) -> GrayImage {
    let (w, h) = image.dimensions();
    let mut out = GrayImage::new(w, h);
    if w < 3 || h < 3 {
        return out;
    }
    const OFFSETS: [(i32, i32); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
        (-1, 0),
    ];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = image.get_pixel(x, y).0[0];
            let mut code = 0u8;
            for (bit, (dx, dy)) in OFFSETS.iter().enumerate() {
                let v = image
                    .get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)
                    .0[0];
                if v >= center {
                    code |= 1 << bit;
                }
            }
            out.put_pixel(x, y, Luma([code]));
        }
    }
    out
}

/// Converts an sRGB image into separate L, a, b planes (CIE Lab, D65).
pub fn rgb_to_lab_planes(image: &RgbImage) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
    let n = (image.width() * image.height()) as usize;
    let mut l_plane = Vec::with_capacity(n);
    let mut a_plane = Vec::with_capacity(n);
    let mut b_plane = Vec::with_capacity(n);

    fn srgb_to_linear(c: f32) -> f32 {
        if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    }
    fn lab_f(t: f32) -> f32 {
        if t > 0.008856 {
            t.cbrt()
        } else {
            7.787 * t + 16.0 / 116.0
        }
    }

    for pixel in image.pixels() {
        let r = srgb_to_linear(pixel.0[0] as f32 / 255.0);
        let g = srgb_to_linear(pixel.0[1] as f32 / 255.0);
        let b = srgb_to_linear(pixel.0[2] as f32 / 255.0);

        // D65 reference white.
        let x = (0.4124 * r + 0.3576 * g + 0.1805 * b) / 0.95047;
        let y = 0.2126 * r + 0.7152 * g + 0.0722 * b;
        let z = (0.0193 * r + 0.1192 * g + 0.9505 * b) / 1.08883;

        let fx = lab_f(x);
        let fy = lab_f(y);
        let fz = lab_f(z);

        l_plane.push(116.0 * fy - 16.0);
        a_plane.push(500.0 * (fx - fy));
        b_plane.push(200.0 * (fy - fz));
    }
    (l_plane, a_plane, b_plane)
}

/// Mean and standard deviation of an f32 plane.
pub fn plane_mean_std(plane: &[f32]) -> (f32, f32) {
    if plane.is_empty() {
        return (0.0, 0.0);
    }
    let n = plane.len() as f32;
    let mean = plane.iter().sum::<f32>() / n;
    let var = plane.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    (mean, var.sqrt())
}

/// Builds a Gabor kernel oriented at `theta` radians.
///
/// Kernel size is `2·radius+1`; parameters follow the usual convention
/// (Gaussian envelope `sigma`, wavelength `lambda`, spatial aspect `gamma`).
pub fn gabor_kernel(radius: i32, theta: f32, sigma: f32, lambda: f32, gamma: f32) -> Vec<f32> {
    let size = (2 * radius + 1) as usize;
    let mut kernel = Vec::with_capacity(size * size);
    let (sin_t, cos_t) = theta.sin_cos();
    for y in -radius..=radius {
        for x in -radius..=radius {
            let xr = x as f32 * cos_t + y as f32 * sin_t;
            let yr = -(x as f32) * sin_t + y as f32 * cos_t;
            let envelope = (-(xr * xr + gamma * gamma * yr * yr) / (2.0 * sigma * sigma)).exp();
            let carrier = (2.0 * std::f32::consts::PI * xr / lambda).cos();
            kernel.push(envelope * carrier);
        }
    }
    kernel
}

/// Edge-preserving bilateral filter on a grayscale image.
///
/// Weights combine a spatial Gaussian over the `(2r+1)` window with a range
/// Gaussian over intensity differences.
pub fn bilateral_filter_gray(
    image: &GrayImage,
    radius: i32,
    sigma_color: f32,
    sigma_space: f32,
) -> GrayImage {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let mut out = GrayImage::new(image.width(), image.height());
    let inv_color = -0.5 / (sigma_color * sigma_color);
    let inv_space = -0.5 / (sigma_space * sigma_space);

    // Precompute spatial weights.
    let size = (2 * radius + 1) as usize;
    let mut spatial = vec![0.0f32; size * size];
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let d2 = (dx * dx + dy * dy) as f32;
            spatial[((dy + radius) * (2 * radius + 1) + (dx + radius)) as usize] =
                (d2 * inv_space).exp();
        }
    }

    for y in 0..h {
        for x in 0..w {
            let center = image.get_pixel(x as u32, y as u32).0[0] as f32;
            let mut acc = 0.0f32;
            let mut weight_sum = 0.0f32;
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let sx = (x + dx).clamp(0, w - 1) as u32;
                    let sy = (y + dy).clamp(0, h - 1) as u32;
                    let v = image.get_pixel(sx, sy).0[0] as f32;
                    let diff = v - center;
                    let weight = spatial
                        [((dy + radius) * (2 * radius + 1) + (dx + radius)) as usize]
                        * (diff * diff * inv_color).exp();
                    acc += weight * v;
                    weight_sum += weight;
                }
            }
            out.put_pixel(x as u32, y as u32, Luma([(acc / weight_sum).round() as u8]));
        }
    }
    out
}

/// Non-local-means denoising on a grayscale image.
///
/// Patch radius 1, search radius 5, filtering strength `h`. Rows are
/// processed in parallel.
pub fn nlm_denoise_gray(image: &GrayImage, h: f32) -> GrayImage {
    use rayon::prelude::*;

    const PATCH_R: i32 = 1;
    const SEARCH_R: i32 = 5;
    let (w, hgt) = (image.width() as i32, image.height() as i32);
    let inv_h2 = -1.0 / (h * h * ((2 * PATCH_R + 1) * (2 * PATCH_R + 1)) as f32);

    let sample = |x: i32, y: i32| -> f32 {
        image
            .get_pixel(x.clamp(0, w - 1) as u32, y.clamp(0, hgt - 1) as u32)
            .0[0] as f32
    };

    let rows: Vec<Vec<u8>> = (0..hgt)
        .into_par_iter()
        .map(|y| {
            let mut row = Vec::with_capacity(w as usize);
            for x in 0..w {
                let mut acc = 0.0f32;
                let mut weight_sum = 0.0f32;
                for sy in -SEARCH_R..=SEARCH_R {
                    for sx in -SEARCH_R..=SEARCH_R {
                        let mut dist = 0.0f32;
                        for py in -PATCH_R..=PATCH_R {
                            for px in -PATCH_R..=PATCH_R {
                                let d = sample(x + px, y + py) - sample(x + sx + px, y + sy + py);
                                dist += d * d;
                            }
                        }
                        let weight = (dist * inv_h2).exp();
                        acc += weight * sample(x + sx, y + sy);
                        weight_sum += weight;
                    }
                }
                row.push((acc / weight_sum).round() as u8);
            }
            row
        })
        .collect();

    GrayImage::from_raw(
        image.width(),
        image.height(),
        rows.into_iter().flatten().collect(),
    )
    .expect("row buffer matches dimensions")
}

/// Gaussian blur approximation on an f32 field using three box-blur passes.
///
/// Considerably faster than direct convolution at the large sigmas the
/// Retinex stages use.
pub fn blur_field(field: &[f32], width: u32, height: u32, sigma: f32) -> Vec<f32> {
    if sigma <= 0.0 {
        return field.to_vec();
    }
    // Box length whose triple application approximates a Gaussian of `sigma`.
    let ideal = (12.0 * sigma * sigma / 3.0 + 1.0).sqrt();
    let radius = (((ideal - 1.0) / 2.0).floor() as i64).max(1);

    let mut current = field.to_vec();
    for _ in 0..3 {
        current = box_blur_pass(&current, width, height, radius, true);
        current = box_blur_pass(&current, width, height, radius, false);
    }
    current
}

fn box_blur_pass(field: &[f32], width: u32, height: u32, radius: i64, horizontal: bool) -> Vec<f32> {
    let (w, h) = (width as i64, height as i64);
    let mut out = vec![0.0f32; field.len()];
    let norm = 1.0 / (2 * radius + 1) as f32;
    if horizontal {
        for y in 0..h {
            let row = &field[(y * w) as usize..((y + 1) * w) as usize];
            let mut acc: f32 = 0.0;
            for d in -radius..=radius {
                acc += row[d.clamp(0, w - 1) as usize];
            }
            for x in 0..w {
                out[(y * w + x) as usize] = acc * norm;
                let leaving = row[(x - radius).clamp(0, w - 1) as usize];
                let entering = row[(x + radius + 1).clamp(0, w - 1) as usize];
                acc += entering - leaving;
            }
        }
    } else {
        for x in 0..w {
            let mut acc: f32 = 0.0;
            for d in -radius..=radius {
                acc += field[(d.clamp(0, h - 1) * w + x) as usize];
            }
            for y in 0..h {
                out[(y * w + x) as usize] = acc * norm;
                let leaving = field[((y - radius).clamp(0, h - 1) * w + x) as usize];
                let entering = field[((y + radius + 1).clamp(0, h - 1) * w + x) as usize];
                acc += entering - leaving;
            }
        }
    }
    out
}

/// Contrast-limited adaptive histogram equalization on a grayscale image.
///
/// The image is divided into a `tiles x tiles` grid; each tile's histogram
/// is clipped at `clip_limit` times the uniform bin height before building
/// its equalization LUT, and pixels are remapped by bilinear interpolation
/// between the four surrounding tile LUTs.
pub fn clahe_gray(image: &GrayImage, clip_limit: f64, tiles: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }
    let tiles = tiles.max(1);
    let tile_w = w.div_ceil(tiles).max(1);
    let tile_h = h.div_ceil(tiles).max(1);
    let grid_x = w.div_ceil(tile_w);
    let grid_y = h.div_ceil(tile_h);

    // Per-tile clipped-histogram LUTs.
    let mut luts = vec![[0u8; 256]; (grid_x * grid_y) as usize];
    for ty in 0..grid_y {
        for tx in 0..grid_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = ((tx + 1) * tile_w).min(w);
            let y1 = ((ty + 1) * tile_h).min(h);

            let mut hist = [0u64; 256];
            let mut count = 0u64;
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[image.get_pixel(x, y).0[0] as usize] += 1;
                    count += 1;
                }
            }
            if count == 0 {
                continue;
            }

            let limit = ((clip_limit * count as f64 / 256.0).max(1.0)) as u64;
            let mut excess = 0u64;
            for bin in hist.iter_mut() {
                if *bin > limit {
                    excess += *bin - limit;
                    *bin = limit;
                }
            }
            let redistribute = excess / 256;
            let remainder = (excess % 256) as usize;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += redistribute + u64::from(i < remainder);
            }

            let lut = &mut luts[(ty * grid_x + tx) as usize];
            let mut cdf = 0u64;
            for (value, bin) in hist.iter().enumerate() {
                cdf += *bin;
                lut[value] = ((cdf as f64 / count as f64) * 255.0).round() as u8;
            }
        }
    }

    let tile_lut = |tx: u32, ty: u32, value: u8| -> f64 {
        luts[(ty * grid_x + tx) as usize][value as usize] as f64
    };

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let value = image.get_pixel(x, y).0[0];

            // Position relative to tile centers.
            let fx = (x as f64 - tile_w as f64 / 2.0) / tile_w as f64;
            let fy = (y as f64 - tile_h as f64 / 2.0) / tile_h as f64;
            let tx0 = fx.floor().max(0.0) as u32;
            let ty0 = fy.floor().max(0.0) as u32;
            let tx0 = tx0.min(grid_x - 1);
            let ty0 = ty0.min(grid_y - 1);
            let tx1 = (tx0 + 1).min(grid_x - 1);
            let ty1 = (ty0 + 1).min(grid_y - 1);
            let wx = (fx - fx.floor()).clamp(0.0, 1.0);
            let wy = (fy - fy.floor()).clamp(0.0, 1.0);

            let top = tile_lut(tx0, ty0, value) * (1.0 - wx) + tile_lut(tx1, ty0, value) * wx;
            let bottom = tile_lut(tx0, ty1, value) * (1.0 - wx) + tile_lut(tx1, ty1, value) * wx;
            let blended = top * (1.0 - wy) + bottom * wy;
            out.put_pixel(x, y, Luma([blended.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Rebuilds an sRGB image from CIE Lab planes (inverse of
/// [`rgb_to_lab_planes`]).
pub fn lab_planes_to_rgb(
    l_plane: &[f32],
    a_plane: &[f32],
    b_plane: &[f32],
    width: u32,
    height: u32,
) -> RgbImage {
    fn lab_f_inv(t: f32) -> f32 {
        let t3 = t * t * t;
        if t3 > 0.008856 {
            t3
        } else {
            (t - 16.0 / 116.0) / 7.787
        }
    }
    fn linear_to_srgb(c: f32) -> f32 {
        if c <= 0.0031308 {
            12.92 * c
        } else {
            1.055 * c.powf(1.0 / 2.4) - 0.055
        }
    }

    let mut out = RgbImage::new(width, height);
    for (i, pixel) in out.pixels_mut().enumerate() {
        let l = l_plane[i];
        let a = a_plane[i];
        let b = b_plane[i];

        let fy = (l + 16.0) / 116.0;
        let fx = fy + a / 500.0;
        let fz = fy - b / 200.0;

        let x = lab_f_inv(fx) * 0.95047;
        let y = lab_f_inv(fy);
        let z = lab_f_inv(fz) * 1.08883;

        let r = 3.2406 * x - 1.5372 * y - 0.4986 * z;
        let g = -0.9689 * x + 1.8758 * y + 0.0415 * z;
        let bl = 0.0557 * x - 0.2040 * y + 1.0570 * z;

        pixel.0 = [
            (linear_to_srgb(r.clamp(0.0, 1.0)) * 255.0).round() as u8,
            (linear_to_srgb(g.clamp(0.0, 1.0)) * 255.0).round() as u8,
            (linear_to_srgb(bl.clamp(0.0, 1.0)) * 255.0).round() as u8,
        ];
    }
    out
}

/// Convolves a grayscale image with a square kernel, clamping at borders.
pub fn convolve_f32(image: &GrayImage, kernel: &[f32], radius: i32) -> Vec<f32> {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let size = (2 * radius + 1) as usize;
    debug_assert_eq!(kernel.len(), size * size);
    let mut out = vec![0.0f32; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for ky in -radius..=radius {
                for kx in -radius..=radius {
                    let sx = (x + kx).clamp(0, w - 1) as u32;
                    let sy = (y + ky).clamp(0, h - 1) as u32;
                    let weight =
                        kernel[((ky + radius) * (2 * radius + 1) + (kx + radius)) as usize];
                    acc += weight * image.get_pixel(sx, sy).0[0] as f32;
                }
            }
            out[(y * w + x) as usize] = acc;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(w: u32, h: u32, v: u8) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([v]))
    }

    #[test]
    fn top_hat_highlights_small_bright_spot() {
        let mut img = uniform(31, 31, 40);
        for y in 14..17 {
            for x in 14..17 {
                img.put_pixel(x, y, Luma([220]));
            }
        }
        let hat = top_hat(&img, 7);
        assert!(hat.get_pixel(15, 15).0[0] > 150);
        assert_eq!(hat.get_pixel(2, 2).0[0], 0);
    }

    #[test]
    fn black_hat_highlights_small_dark_spot() {
        let mut img = uniform(31, 31, 200);
        for y in 14..17 {
            for x in 14..17 {
                img.put_pixel(x, y, Luma([20]));
            }
        }
        let hat = black_hat(&img, 7);
        assert!(hat.get_pixel(15, 15).0[0] > 150);
        assert_eq!(hat.get_pixel(2, 2).0[0], 0);
    }

    #[test]
    fn adaptive_threshold_inv_marks_dark_line() {
        let mut img = uniform(40, 40, 200);
        for x in 5..35 {
            img.put_pixel(x, 20, Luma([60]));
        }
        let binary = adaptive_threshold_inv(&img, 5, 2);
        assert_eq!(binary.get_pixel(20, 20).0[0], 255);
        assert_eq!(binary.get_pixel(20, 5).0[0], 0);
    }

    #[test]
    fn skeleton_of_thick_line_is_thin() {
        let mut img = GrayImage::new(40, 20);
        for y in 8..13 {
            for x in 5..35 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        let skeleton = thin_skeleton(&img);
        // Each interior column should retain at most two skeleton pixels.
        for x in 10..30 {
            let count = (0..20).filter(|&y| skeleton.get_pixel(x, y).0[0] > 0).count();
            assert!(count <= 2, "column {x} kept {count} pixels");
        }
        // The skeleton is still connected along the line.
        let total: usize = (5..35)
            .map(|x| (0..20).filter(|&y| skeleton.get_pixel(x, y).0[0] > 0).count())
            .sum();
        assert!(total >= 20);
    }

    #[test]
    fn lbp_is_uniform_on_flat_image() {
        let img = uniform(10, 10, 128);
        let map = lbp_map(&img);
        // All neighbors equal the center, so every interior code is 0xFF.
        assert_eq!(map.get_pixel(5, 5).0[0], 0xFF);
    }

    #[test]
    fn blur_field_preserves_constant_fields() {
        let field = vec![42.0f32; 30 * 20];
        let blurred = blur_field(&field, 30, 20, 5.0);
        for v in blurred {
            assert!((v - 42.0).abs() < 1e-3);
        }
    }

    #[test]
    fn clahe_spreads_a_compressed_histogram() {
        // Two populations at 90 and 170: equalization pushes them apart.
        let mut img = GrayImage::new(64, 64);
        for (x, _, p) in img.enumerate_pixels_mut() {
            p.0[0] = if x < 32 { 90 } else { 170 };
        }
        let enhanced = clahe_gray(&img, 100.0, 1);
        let (min, max) = enhanced
            .pixels()
            .fold((255u8, 0u8), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
        assert!(max - min > 100, "range only {}", max - min);
    }

    #[test]
    fn lab_round_trip_is_close() {
        let mut img = RgbImage::new(4, 4);
        for (i, p) in img.pixels_mut().enumerate() {
            p.0 = [(i * 16) as u8, 200 - (i * 8) as u8, 30 + (i * 5) as u8];
        }
        let (l, a, b) = rgb_to_lab_planes(&img);
        let back = lab_planes_to_rgb(&l, &a, &b, 4, 4);
        for (orig, rt) in img.pixels().zip(back.pixels()) {
            for c in 0..3 {
                let diff = (orig.0[c] as i32 - rt.0[c] as i32).abs();
                assert!(diff <= 2, "channel off by {diff}");
            }
        }
    }

    #[test]
    fn integral_sums_match_naive() {
        let mut img = GrayImage::new(8, 6);
        for (i, p) in img.pixels_mut().enumerate() {
            p.0[0] = (i % 251) as u8;
        }
        let sat = integral_image(&img);
        let naive: u64 = (2..=4)
            .flat_map(|y| (1..=6).map(move |x| (x, y)))
            .map(|(x, y)| img.get_pixel(x, y).0[0] as u64)
            .sum();
        assert_eq!(integral_sum(&sat, 8, 1, 2, 6, 4), naive);
    }
}
