//! Placement of a picture inside a panel's addressable area
//!
//! Given an optional requested size and offset, the source aspect ratio and
//! the panel limits for the current orientation, compute the largest
//! aspect-preserving rectangle that fits. Missing offsets center the picture
//! on that axis; offsets at or beyond the last pixel are reset to 0.

use super::AreaRequest;
use crate::pipeline::geometry::Geometry;

/// Addressable extent along each axis after orientation is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisLimits {
    pub x: i32,
    pub y: i32,
}

impl AxisLimits {
    /// Limits of a `width`x`height` panel, swapped when the scan is rotated
    pub fn new(width: i32, height: i32, swapped: bool) -> Self {
        if swapped {
            Self { x: height, y: width }
        } else {
            Self { x: width, y: height }
        }
    }
}

/// Inclusive pixel window plus its size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitRect {
    pub x_start: i32,
    pub x_end: i32,
    pub y_start: i32,
    pub y_end: i32,
    pub width: i32,
    pub height: i32,
}

impl FitRect {
    fn new(x_start: i32, y_start: i32, width: i32, height: i32) -> Self {
        Self {
            x_start,
            x_end: x_start + width - 1,
            y_start,
            y_end: y_start + height - 1,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// An offset that was out of range and got reset to 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetCorrection {
    pub axis: Axis,
    pub requested: i32,
    pub limit: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fit {
    pub rect: FitRect,
    pub corrections: Vec<OffsetCorrection>,
}

/// Source picture dimensions and the aspect ratio it should be shown at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceShape {
    pub width: i32,
    pub height: i32,
    pub aspect: f64,
}

impl SourceShape {
    /// Shape as displayed, widening or narrowing for a non-square SAR
    pub fn from_geometry(geometry: &Geometry) -> Self {
        let aspect = geometry.display_aspect();
        let height = geometry.height as i32;
        let width = if geometry.sar.is_valid() && geometry.sar.num != geometry.sar.den {
            (height as f64 * aspect).round() as i32
        } else {
            geometry.width as i32
        };
        Self {
            width,
            height,
            aspect,
        }
    }
}

fn height_for(width: i32, ratio: f64) -> i32 {
    (width as f64 / ratio).round() as i32
}

fn width_for(height: i32, ratio: f64) -> i32 {
    (height as f64 * ratio).round() as i32
}

fn center(limit: i32, size: i32) -> i32 {
    ((limit - size) as f64 / 2.0).round() as i32
}

fn clamp_offset(
    axis: Axis,
    offset: Option<u32>,
    limit: i32,
    corrections: &mut Vec<OffsetCorrection>,
) -> Option<i32> {
    let offset = offset? as i64;
    if offset >= (limit - 1) as i64 {
        corrections.push(OffsetCorrection {
            axis,
            requested: offset.min(i32::MAX as i64) as i32,
            limit,
        });
        Some(0)
    } else {
        Some(offset as i32)
    }
}

pub fn fit_area(request: &AreaRequest, source: &SourceShape, limits: AxisLimits) -> Fit {
    let mut ratio = source.aspect;
    let (mut width, mut height) = match (request.width, request.height) {
        (Some(w), Some(h)) => {
            ratio = w as f64 / h as f64;
            (w as i32, h as i32)
        }
        (Some(w), None) => (w as i32, height_for(w as i32, ratio)),
        (None, Some(h)) => (width_for(h as i32, ratio), h as i32),
        (None, None) => (source.width, source.height),
    };

    let mut corrections = Vec::new();
    let offset_x = clamp_offset(Axis::X, request.offset_x, limits.x, &mut corrections);
    let offset_y = clamp_offset(Axis::Y, request.offset_y, limits.y, &mut corrections);

    let x_start;
    let y_start;
    match (offset_x, offset_y) {
        (Some(ox), Some(oy)) => {
            x_start = ox;
            y_start = oy;
            let room_x = limits.x - ox;
            let room_y = limits.y - oy;
            let over_x = width > room_x;
            let over_y = height > room_y;

            if over_x && over_y {
                // shrink along whichever axis overflows more, then re-check the other
                let x_first = (room_x as f64 / width as f64) <= (room_y as f64 / height as f64);
                if x_first {
                    width = room_x;
                    height = height_for(width, ratio);
                    if height > room_y {
                        height = room_y;
                        width = width_for(height, ratio);
                    }
                } else {
                    height = room_y;
                    width = width_for(height, ratio);
                    if width > room_x {
                        width = room_x;
                        height = height_for(width, ratio);
                    }
                }
            } else if over_x {
                width = room_x;
                height = height_for(width, ratio);
            } else if over_y {
                height = room_y;
                width = width_for(height, ratio);
            }
        }
        (None, None) => {
            if width <= limits.x && height <= limits.y {
                x_start = center(limits.x, width);
                y_start = center(limits.y, height);
            } else if ratio >= limits.x as f64 / limits.y as f64 {
                width = limits.x;
                height = height_for(width, ratio);
                x_start = 0;
                y_start = center(limits.y, height);
            } else {
                height = limits.y;
                width = width_for(height, ratio);
                y_start = 0;
                x_start = center(limits.x, width);
            }
        }
        (None, Some(oy)) => {
            y_start = oy;
            if width <= limits.x && oy + height <= limits.y {
                x_start = center(limits.x, width);
            } else if width > limits.x {
                width = limits.x;
                height = height_for(width, ratio);
                if oy + height <= limits.y {
                    x_start = 0;
                } else {
                    height = limits.y - oy;
                    width = width_for(height, ratio);
                    x_start = center(limits.x, width);
                }
            } else {
                height = limits.y - oy;
                width = width_for(height, ratio);
                x_start = center(limits.x, width);
            }
        }
        (Some(ox), None) => {
            x_start = ox;
            if height <= limits.y && ox + width <= limits.x {
                y_start = center(limits.y, height);
            } else if height > limits.y {
                height = limits.y;
                width = width_for(height, ratio);
                if ox + width <= limits.x {
                    y_start = 0;
                } else {
                    width = limits.x - ox;
                    height = height_for(width, ratio);
                    y_start = center(limits.y, height);
                }
            } else {
                width = limits.x - ox;
                height = height_for(width, ratio);
                y_start = center(limits.y, height);
            }
        }
    }

    Fit {
        rect: FitRect::new(x_start, y_start, width, height),
        corrections,
    }
}
