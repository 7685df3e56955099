use crate::{
    consts::*,
    huffman,
    utils::{hash, Rgba},
    Header,
};
use alloc::vec::Vec;
use snafu::{ensure, Snafu};

#[derive(Debug, Snafu)]
pub enum EncodeError {
    #[snafu(display("width and height must be non-zero"))]
    EmptyImage,
    #[snafu(display("{width}x{height} exceeds the {QOI_PIXELS_MAX} pixel budget"))]
    TooLarge { width: u32, height: u32 },
    #[snafu(display(
        "image dimensions don't match the pixel buffer: {width}x{height} at {channels} channels \
         is {expected} bytes, but {actual} were given"
    ))]
    InvalidDimensions {
        width: u32,
        height: u32,
        channels: usize,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct QoihEncodeContext {
    pub prev: Rgba,
    pub arr: [Rgba; 64],
}

impl QoihEncodeContext {
    pub const fn new() -> Self {
        Self {
            prev: Rgba::START,
            arr: [Rgba::ZERO; 64],
        }
    }
}

impl Default for QoihEncodeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl QoihEncodeContext {
    /// Encodes raw pixels into a qoih frame, entropy coding the chunk stream
    /// when the estimated savings clear the 3% threshold.
    ///
    /// The frame is appended to `w`.
    pub fn encode_to_vec(header: Header, pixels: &[u8], w: &mut Vec<u8>) -> Result<(), EncodeError> {
        let start = w.len();
        Self::encode_plain_to_vec(header, pixels, w)?;

        if let Some(packed) = huffman::compress_frame(&w[start..]) {
            w.truncate(start);
            w.extend_from_slice(&packed);
        }

        Ok(())
    }

    /// Encodes raw pixels into a plain (never entropy-coded) qoih frame.
    ///
    /// The frame is appended to `w`.
    pub fn encode_plain_to_vec(
        header: Header,
        pixels: &[u8],
        w: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        ensure!(header.width != 0 && header.height != 0, EmptyImageSnafu);
        ensure!(
            header.within_pixel_budget(),
            TooLargeSnafu {
                width: header.width,
                height: header.height,
            }
        );

        let bpp = header.channels.bytes_per_pixel();
        let expected = header.pixel_count() * bpp;
        ensure!(
            pixels.len() == expected,
            InvalidDimensionsSnafu {
                width: header.width,
                height: header.height,
                channels: bpp,
                expected,
                actual: pixels.len(),
            }
        );

        w.reserve(header.max_frame_len());
        w.extend_from_slice(&QOI_MAGIC);
        w.extend_from_slice(&header.width.to_be_bytes());
        w.extend_from_slice(&header.height.to_be_bytes());
        w.push(header.channels as u8);
        w.push(header.colorspace as u8);

        let mut state = QoihEncodeContext::new();
        state.encode_pixels(pixels, bpp, w);

        w.extend_from_slice(&QOI_PADDING);

        Ok(())
    }

    fn encode_pixels(&mut self, pixels: &[u8], bpp: usize, w: &mut Vec<u8>) {
        let mut pixels = pixels.chunks_exact(bpp);

        while let Some(raw) = pixels.next() {
            let px = Rgba::from_raw(raw, self.prev.a);

            if px == self.prev {
                let prev = self.prev;
                let repeats = pixels
                    .clone()
                    .take_while(|&raw| Rgba::from_raw(raw, prev.a) == prev)
                    .count();
                if repeats > 0 {
                    let _ = pixels.nth(repeats - 1);
                }

                // account for the pixel that opened the run
                let count = repeats + 1;

                for _ in 0..count / 62 {
                    w.push(QOI_OP_RUN | (62 - 1));
                }
                let rest = count % 62;
                if rest > 0 {
                    w.push(QOI_OP_RUN | (rest - 1) as u8);
                }

                // same as prev: neither prev nor the array change
                continue;
            }

            let index = hash(px);
            if self.arr[usize::from(index)] == px {
                w.push(QOI_OP_INDEX | index);
                self.prev = px;
                continue;
            }

            // the array is updated on every miss, whichever chunk follows
            self.arr[usize::from(index)] = px;

            if px.a == self.prev.a {
                let vr = px.r.wrapping_sub(self.prev.r) as i8;
                let vg = px.g.wrapping_sub(self.prev.g) as i8;
                let vb = px.b.wrapping_sub(self.prev.b) as i8;

                let vg_r = vr.wrapping_sub(vg);
                let vg_b = vb.wrapping_sub(vg);

                if matches!((vr, vg, vb), (-2..=1, -2..=1, -2..=1)) {
                    w.push(
                        QOI_OP_DIFF
                            | ((vr + 2) as u8) << 4
                            | ((vg + 2) as u8) << 2
                            | (vb + 2) as u8,
                    );
                } else if matches!((vg_r, vg, vg_b), (-8..=7, -32..=31, -8..=7)) {
                    w.extend_from_slice(&[
                        QOI_OP_LUMA | (vg + 32) as u8,
                        ((vg_r + 8) as u8) << 4 | (vg_b + 8) as u8,
                    ]);
                } else {
                    w.extend_from_slice(&[QOI_OP_RGB, px.r, px.g, px.b]);
                }
            } else {
                w.extend_from_slice(&[QOI_OP_RGBA, px.r, px.g, px.b, px.a]);
            }

            self.prev = px;
        }
    }
}
