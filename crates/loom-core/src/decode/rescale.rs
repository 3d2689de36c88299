//! Picture conversion to the caller-selected pixel precision
//!
//! | Precision | Layout | Element |
//! |-----------|--------|---------|
//! | `U8`      | RGB    | `u8`    |
//! | `U16`     | RGBA   | `u16`   |
//! | `F32`     | RGBA   | `f32`   |
//!
//! YUV input is converted with BT.601 limited-range coefficients.

use serde::{Deserialize, Serialize};

use crate::media::{MediaError, MediaResult, Picture, PixelFormat};

/// Bits per channel of decoded video handed to the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelPrecision {
    #[default]
    U8,
    U16,
    F32,
}

impl PixelPrecision {
    /// Channels per pixel in the output buffer
    pub fn channels(self) -> usize {
        match self {
            PixelPrecision::U8 => 3,
            PixelPrecision::U16 | PixelPrecision::F32 => 4,
        }
    }

    pub fn bytes_per_channel(self) -> usize {
        match self {
            PixelPrecision::U8 => 1,
            PixelPrecision::U16 => 2,
            PixelPrecision::F32 => 4,
        }
    }
}

/// Typed pixel storage
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
}

impl PixelData {
    fn zeroed(precision: PixelPrecision, len: usize) -> Self {
        match precision {
            PixelPrecision::U8 => PixelData::U8(vec![0; len]),
            PixelPrecision::U16 => PixelData::U16(vec![0; len]),
            PixelPrecision::F32 => PixelData::F32(vec![0.0; len]),
        }
    }

    pub fn precision(&self) -> PixelPrecision {
        match self {
            PixelData::U8(_) => PixelPrecision::U8,
            PixelData::U16(_) => PixelPrecision::U16,
            PixelData::F32(_) => PixelPrecision::F32,
        }
    }

    /// Number of channel elements
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(v) => v.len(),
            PixelData::U16(v) => v.len(),
            PixelData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes for texture upload
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PixelData::U8(v) => v.as_slice(),
            PixelData::U16(v) => bytemuck::cast_slice(v),
            PixelData::F32(v) => bytemuck::cast_slice(v),
        }
    }
}

/// Reusable output frame of a video context
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: PixelData,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, precision: PixelPrecision) -> Self {
        let len = width as usize * height as usize * precision.channels();
        Self {
            width,
            height,
            data: PixelData::zeroed(precision, len),
        }
    }

    pub fn precision(&self) -> PixelPrecision {
        self.data.precision()
    }

    /// Reallocate only when dimensions or element type change
    fn ensure_shape(&mut self, width: u32, height: u32, precision: PixelPrecision) -> bool {
        if self.width == width && self.height == height && self.precision() == precision {
            return false;
        }
        *self = Self::new(width, height, precision);
        true
    }
}

/// Converts decoded pictures of one source shape into a [`PixelBuffer`]
#[derive(Debug, Clone, PartialEq)]
pub struct Rescaler {
    width: u32,
    height: u32,
    format: PixelFormat,
    precision: PixelPrecision,
}

impl Rescaler {
    pub fn new(width: u32, height: u32, format: PixelFormat, precision: PixelPrecision) -> Self {
        Self {
            width,
            height,
            format: format.canonical(),
            precision,
        }
    }

    pub fn precision(&self) -> PixelPrecision {
        self.precision
    }

    /// Whether this rescaler can take `picture` as input
    pub fn accepts(&self, picture: &Picture) -> bool {
        picture.width == self.width
            && picture.height == self.height
            && picture.format.canonical() == self.format
    }

    /// Convert `picture` into `out`, returning whether `out` was reallocated
    pub fn convert(&self, picture: &Picture, out: &mut PixelBuffer) -> MediaResult<bool> {
        if !self.accepts(picture) {
            return Err(MediaError::Unsupported(format!(
                "picture {}x{} {:?} does not match rescaler {}x{} {:?}",
                picture.width, picture.height, picture.format, self.width, self.height, self.format
            )));
        }
        self.check_planes(picture)?;

        let reallocated = out.ensure_shape(self.width, self.height, self.precision);
        let width = self.width as usize;
        let channels = self.precision.channels();

        for y in 0..self.height as usize {
            for x in 0..width {
                let rgba = self.sample(picture, x, y);
                let base = (y * width + x) * channels;
                match &mut out.data {
                    PixelData::U8(v) => {
                        for c in 0..3 {
                            v[base + c] = (rgba[c] * 255.0).round() as u8;
                        }
                    }
                    PixelData::U16(v) => {
                        for c in 0..4 {
                            v[base + c] = (rgba[c] * 65535.0).round() as u16;
                        }
                    }
                    PixelData::F32(v) => {
                        v[base..base + 4].copy_from_slice(&rgba);
                    }
                }
            }
        }

        Ok(reallocated)
    }

    fn check_planes(&self, picture: &Picture) -> MediaResult<()> {
        let (w, h) = (self.width as usize, self.height as usize);
        let required: Vec<(usize, usize)> = match self.format {
            PixelFormat::Rgb24 => vec![(w * 3, h)],
            PixelFormat::Rgba => vec![(w * 4, h)],
            PixelFormat::Yuv420p | PixelFormat::Yuvj420p => {
                let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
                vec![(w, h), (cw, ch), (cw, ch)]
            }
        };

        for (i, (row_bytes, rows)) in required.into_iter().enumerate() {
            let (Some(plane), Some(&stride)) = (picture.planes.get(i), picture.strides.get(i)) else {
                return Err(MediaError::Decode(format!("missing plane {}", i)));
            };
            if rows > 0 && (stride < row_bytes || plane.len() < stride * (rows - 1) + row_bytes) {
                return Err(MediaError::Decode(format!("plane {} too short", i)));
            }
        }
        Ok(())
    }

    /// Normalised RGBA of one source pixel
    fn sample(&self, picture: &Picture, x: usize, y: usize) -> [f32; 4] {
        let byte = |plane: usize, offset: usize| picture.planes[plane][offset] as f32;
        match self.format {
            PixelFormat::Rgb24 => {
                let o = y * picture.strides[0] + x * 3;
                [byte(0, o) / 255.0, byte(0, o + 1) / 255.0, byte(0, o + 2) / 255.0, 1.0]
            }
            PixelFormat::Rgba => {
                let o = y * picture.strides[0] + x * 4;
                [
                    byte(0, o) / 255.0,
                    byte(0, o + 1) / 255.0,
                    byte(0, o + 2) / 255.0,
                    byte(0, o + 3) / 255.0,
                ]
            }
            PixelFormat::Yuv420p | PixelFormat::Yuvj420p => {
                let luma = byte(0, y * picture.strides[0] + x);
                let co = (y / 2) * picture.strides[1] + x / 2;
                let cb = byte(1, co);
                let cr = byte(2, (y / 2) * picture.strides[2] + x / 2);

                let l = (luma - 16.0) / 219.0;
                let u = (cb - 128.0) / 224.0;
                let v = (cr - 128.0) / 224.0;
                [
                    (l + 1.402 * v).clamp(0.0, 1.0),
                    (l - 0.344_136 * u - 0.714_136 * v).clamp(0.0, 1.0),
                    (l + 1.772 * u).clamp(0.0, 1.0),
                    1.0,
                ]
            }
        }
    }
}
