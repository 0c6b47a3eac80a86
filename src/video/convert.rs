//! Pixel format conversion to I420 for the H.264 encoder
//!
//! BT.601 limited range. Odd dimensions are cropped to the next even value
//! since 4:2:0 chroma needs 2x2 blocks.

use crate::error::{AppError, Result};
use crate::video::format::{PixelFormat, Resolution};

/// YUV420P buffer with contiguous Y, U, V planes
pub struct Yuv420pBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Yuv420pBuffer {
    pub fn new(resolution: Resolution) -> Self {
        let y_size = resolution.pixels() as usize;
        Self {
            data: vec![0u8; y_size + y_size / 2],
            width: resolution.width,
            height: resolution.height,
        }
    }

    fn y_size(&self) -> usize {
        (self.width * self.height) as usize
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.data[..self.y_size()]
    }

    pub fn u_plane(&self) -> &[u8] {
        let y = self.y_size();
        &self.data[y..y + y / 4]
    }

    pub fn v_plane(&self) -> &[u8] {
        let y = self.y_size();
        &self.data[y + y / 4..]
    }

    /// Split into mutable (Y, U, V) planes
    fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let y_size = self.y_size();
        let (y, uv) = self.data.split_at_mut(y_size);
        let (u, v) = uv.split_at_mut(y_size / 4);
        (y, u, v)
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

#[inline]
fn rgb_to_y(r: i32, g: i32, b: i32) -> u8 {
    (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8
}

#[inline]
fn rgb_to_u(r: i32, g: i32, b: i32) -> u8 {
    (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255) as u8
}

#[inline]
fn rgb_to_v(r: i32, g: i32, b: i32) -> u8 {
    (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255) as u8
}

/// Convert one captured picture into I420
///
/// `stride` is the byte length of a row of the first plane.
pub fn to_i420(
    data: &[u8],
    resolution: Resolution,
    format: PixelFormat,
    stride: u32,
) -> Result<Yuv420pBuffer> {
    let width = resolution.width & !1;
    let height = resolution.height & !1;
    if width == 0 || height == 0 {
        return Err(AppError::VideoError(format!(
            "Cannot encode {} picture",
            resolution
        )));
    }

    let stride = stride.max(format.min_stride(resolution.width)) as usize;
    let needed = match format {
        PixelFormat::Nv12 | PixelFormat::Yuv420 => stride * resolution.height as usize * 3 / 2,
        _ => stride * (resolution.height as usize - 1) + format.min_stride(resolution.width) as usize,
    };
    if data.len() < needed {
        return Err(AppError::VideoError(format!(
            "Short {} frame: {} bytes, expected {}",
            format,
            data.len(),
            needed
        )));
    }

    let mut out = Yuv420pBuffer::new(Resolution::new(width, height));
    match format {
        PixelFormat::Bgr24 => packed_rgb(data, stride, &mut out, [2, 1, 0]),
        PixelFormat::Rgb24 => packed_rgb(data, stride, &mut out, [0, 1, 2]),
        PixelFormat::Yuyv => yuyv(data, stride, &mut out),
        PixelFormat::Nv12 => nv12(data, stride, resolution.height as usize, &mut out),
        PixelFormat::Yuv420 => i420(data, stride, resolution.height as usize, &mut out),
    }
    Ok(out)
}

/// `order` gives the byte offsets of R, G and B within a pixel
fn packed_rgb(data: &[u8], stride: usize, out: &mut Yuv420pBuffer, order: [usize; 3]) {
    let (w, h) = (out.width as usize, out.height as usize);
    let (y_plane, u_plane, v_plane) = out.planes_mut();
    let px = |x: usize, y: usize| {
        let o = y * stride + x * 3;
        (
            data[o + order[0]] as i32,
            data[o + order[1]] as i32,
            data[o + order[2]] as i32,
        )
    };

    for y in 0..h {
        for x in 0..w {
            let (r, g, b) = px(x, y);
            y_plane[y * w + x] = rgb_to_y(r, g, b);
        }
    }

    let cw = w / 2;
    for cy in 0..h / 2 {
        for cx in 0..cw {
            let (mut r, mut g, mut b) = (0, 0, 0);
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let (pr, pg, pb) = px(cx * 2 + dx, cy * 2 + dy);
                r += pr;
                g += pg;
                b += pb;
            }
            let (r, g, b) = ((r + 2) / 4, (g + 2) / 4, (b + 2) / 4);
            u_plane[cy * cw + cx] = rgb_to_u(r, g, b);
            v_plane[cy * cw + cx] = rgb_to_v(r, g, b);
        }
    }
}

fn yuyv(data: &[u8], stride: usize, out: &mut Yuv420pBuffer) {
    let (w, h) = (out.width as usize, out.height as usize);
    let (y_plane, u_plane, v_plane) = out.planes_mut();
    let cw = w / 2;

    for y in 0..h {
        let row = &data[y * stride..];
        for x in 0..w {
            y_plane[y * w + x] = row[x * 2];
        }
    }

    for cy in 0..h / 2 {
        let top = &data[cy * 2 * stride..];
        let bottom = &data[(cy * 2 + 1) * stride..];
        for cx in 0..cw {
            let o = cx * 4;
            u_plane[cy * cw + cx] = ((top[o + 1] as u16 + bottom[o + 1] as u16 + 1) / 2) as u8;
            v_plane[cy * cw + cx] = ((top[o + 3] as u16 + bottom[o + 3] as u16 + 1) / 2) as u8;
        }
    }
}

fn nv12(data: &[u8], stride: usize, src_height: usize, out: &mut Yuv420pBuffer) {
    let (w, h) = (out.width as usize, out.height as usize);
    let (y_plane, u_plane, v_plane) = out.planes_mut();
    let cw = w / 2;

    for y in 0..h {
        y_plane[y * w..(y + 1) * w].copy_from_slice(&data[y * stride..y * stride + w]);
    }

    let uv = &data[stride * src_height..];
    for cy in 0..h / 2 {
        for cx in 0..cw {
            let o = cy * stride + cx * 2;
            u_plane[cy * cw + cx] = uv[o];
            v_plane[cy * cw + cx] = uv[o + 1];
        }
    }
}

fn i420(data: &[u8], stride: usize, src_height: usize, out: &mut Yuv420pBuffer) {
    let (w, h) = (out.width as usize, out.height as usize);
    let (y_plane, u_plane, v_plane) = out.planes_mut();
    let cw = w / 2;
    let c_stride = stride / 2;
    let u_src = &data[stride * src_height..];
    let v_src = &u_src[c_stride * (src_height / 2)..];

    for y in 0..h {
        y_plane[y * w..(y + 1) * w].copy_from_slice(&data[y * stride..y * stride + w]);
    }
    for cy in 0..h / 2 {
        let o = cy * c_stride;
        u_plane[cy * cw..(cy + 1) * cw].copy_from_slice(&u_src[o..o + cw]);
        v_plane[cy * cw..(cy + 1) * cw].copy_from_slice(&v_src[o..o + cw]);
    }
}
