//! Frame geometry negotiated between decoder, converter and display

use once_cell::sync::OnceCell;
use thiserror::Error;

use super::types::{PixelFormat, Rational};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("{0} size not set")]
    NotSet(&'static str),
    #[error("{0} geometry already published")]
    AlreadySet(&'static str),
    #[error("invalid {label} geometry {width}x{height}")]
    InvalidArea {
        label: &'static str,
        width: i64,
        height: i64,
    },
}

/// Picture dimensions, pixel layout and sample aspect ratio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub sar: Rational,
}

impl Geometry {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            sar: Rational::default(),
        }
    }

    pub fn with_sar(mut self, sar: Rational) -> Self {
        self.sar = sar;
        self
    }

    /// Display aspect ratio, honoring a valid SAR
    pub fn display_aspect(&self) -> f64 {
        let base = self.width as f64 / self.height.max(1) as f64;
        if self.sar.is_valid() {
            base * self.sar.as_f64()
        } else {
            base
        }
    }
}

/// Write-once geometry slot
///
/// The decoder publishes the source side, the display driver the destination
/// side; both happen during initialization and never change afterwards.
#[derive(Debug)]
pub struct GeometryDescriptor {
    label: &'static str,
    slot: OnceCell<Geometry>,
}

impl GeometryDescriptor {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            slot: OnceCell::new(),
        }
    }

    pub fn publish(&self, geometry: Geometry) -> Result<(), GeometryError> {
        if geometry.width == 0 || geometry.height == 0 {
            return Err(GeometryError::InvalidArea {
                label: self.label,
                width: geometry.width as i64,
                height: geometry.height as i64,
            });
        }
        self.slot
            .set(geometry)
            .map_err(|_| GeometryError::AlreadySet(self.label))
    }

    pub fn get(&self) -> Option<&Geometry> {
        self.slot.get()
    }

    /// The published geometry, or `NotSet`
    pub fn require(&self) -> Result<&Geometry, GeometryError> {
        self.slot.get().ok_or(GeometryError::NotSet(self.label))
    }

    pub fn is_set(&self) -> bool {
        self.slot.get().is_some()
    }
}

/// Source and destination descriptors shared by every stage
#[derive(Debug)]
pub struct NegotiatedGeometry {
    pub source: GeometryDescriptor,
    pub destination: GeometryDescriptor,
}

impl NegotiatedGeometry {
    pub fn new() -> Self {
        Self {
            source: GeometryDescriptor::new("source"),
            destination: GeometryDescriptor::new("destination"),
        }
    }
}

impl Default for NegotiatedGeometry {
    fn default() -> Self {
        Self::new()
    }
}
