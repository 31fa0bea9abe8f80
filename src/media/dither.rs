//! Reduction of 8 bit gray rows to packed 1 bit monochrome
//!
//! Output is MSB first with a set bit meaning a lit (white) pixel. Padding
//! bits past `width` in each destination row are left cleared.

use super::DitherMode;

const BAYER_4X4: [[u8; 4]; 4] = [[0, 8, 2, 10], [12, 4, 14, 6], [3, 11, 1, 9], [15, 7, 13, 5]];

const MID_GRAY: i16 = 128;

/// Monochrome packing of a gray image
pub struct MonoPacker<'a> {
    pub src: &'a [u8],
    pub src_stride: usize,
    pub width: usize,
    pub height: usize,
}

impl MonoPacker<'_> {
    pub fn pack(&self, mode: DitherMode, dst: &mut [u8], dst_stride: usize) {
        let row_bytes = self.width.div_ceil(8);
        for y in 0..self.height {
            dst[y * dst_stride..y * dst_stride + row_bytes].fill(0);
        }

        match mode {
            DitherMode::None => self.threshold(dst, dst_stride),
            DitherMode::Bayer => self.ordered(dst, dst_stride),
            DitherMode::ErrorDiffusion => self.diffuse(dst, dst_stride),
        }
    }

    fn gray(&self, x: usize, y: usize) -> u8 {
        self.src[y * self.src_stride + x]
    }

    fn threshold(&self, dst: &mut [u8], dst_stride: usize) {
        for y in 0..self.height {
            for x in 0..self.width {
                if self.gray(x, y) as i16 >= MID_GRAY {
                    set_pixel(dst, dst_stride, x, y);
                }
            }
        }
    }

    fn ordered(&self, dst: &mut [u8], dst_stride: usize) {
        for y in 0..self.height {
            for x in 0..self.width {
                let level = BAYER_4X4[y % 4][x % 4] as u16 * 16 + 8;
                if self.gray(x, y) as u16 > level {
                    set_pixel(dst, dst_stride, x, y);
                }
            }
        }
    }

    fn diffuse(&self, dst: &mut [u8], dst_stride: usize) {
        // one guard column on each side
        let mut current = vec![0i16; self.width + 2];
        let mut next = vec![0i16; self.width + 2];

        for y in 0..self.height {
            for x in 0..self.width {
                let value = self.gray(x, y) as i16 + current[x + 1] / 16;
                let (lit, error) = if value >= MID_GRAY {
                    (true, value - 255)
                } else {
                    (false, value)
                };
                if lit {
                    set_pixel(dst, dst_stride, x, y);
                }
                current[x + 2] += error * 7;
                next[x] += error * 3;
                next[x + 1] += error * 5;
                next[x + 2] += error;
            }
            std::mem::swap(&mut current, &mut next);
            next.fill(0);
        }
    }
}

fn set_pixel(dst: &mut [u8], stride: usize, x: usize, y: usize) {
    dst[y * stride + x / 8] |= 0x80 >> (x % 8);
}
