//! Geometry descriptors
//!
//! A geometry maps a section of the morphology to the three per-segment quantities the
//! discretization needs:
//!
//! - **volume** of each segment's compartment (µm³, or µm² for area-type regions)
//! - **surface area** of each segment lying on the plasma membrane (µm²)
//! - **neighbor area** of each of the `nseg + 1` faces between segments (µm², or µm for
//!   area-type regions)
//!
//! Descriptors are pure functions of morphology. They never look at species.
//!
//! # Volume vs area regions
//!
//! ```text
//!  volume-type (is_volume)          area-type (is_area)
//!  ┌───────────────────┐            ═════════════════════   membrane, border, ER sheet
//!  │   cytosol, shell  │            "volume"   = area
//!  └───────────────────┘            "neighbor" = perimeter
//! ```
//!
//! # 3D
//!
//! In 3D a geometry only scales the voxel quantities produced by a [`Voxelizer`]
//! (see [`Geometry::voxel_scales`]).

pub(crate) mod frustum;
pub mod voxel;

pub use voxel::{CenterlineVoxelizer, VoxelGrid, Voxelizer};

use std::f64::consts::PI;

use crate::error::{Result, RxdError};
use crate::morphology::{Morphology, SectionId};

/// Closed set of geometry descriptors
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// Full cytosol of the cable
    Inside,

    /// Plasma membrane as a 2D region
    Membrane { scale: f64 },

    /// Area-type region distributed through the volume (e.g. ER membrane)
    DistributedBoundary { area_per_volume: f64, perimeter_per_area: f64 },

    /// Fraction of the cytosol
    FractionalVolume {
        volume_fraction: f64,
        surface_fraction: f64,
        neighbor_area_fraction: f64,
    },

    /// Constant cross-section independent of the diameter
    FixedCrossSection { cross_area: f64, surface_area_per_length: f64 },

    /// Area-type region of constant perimeter
    FixedPerimeter { perimeter: f64, on_cell_surface: bool },

    /// Border whose area scales with the cable surface
    ScalableBorder { scale: f64, diam_scale: f64, on_cell_surface: bool },

    /// Annulus between `lo·d/2` and `hi·d/2`
    Shell { lo: f64, hi: f64 },

    /// Extracellular space; only meaningful on voxel boxes
    Extracellular,

    /// Different geometries on different sections
    Multiple(MultipleGeometry),
}

impl Geometry {
    // ======================================= constructors =======================================

    /// Plasma membrane with unit scale
    pub fn membrane() -> Self {
        Geometry::Membrane { scale: 1.0 }
    }

    /// `area_per_volume` µm² of area per µm³ of cytosol
    pub fn distributed_boundary(area_per_volume: f64, perimeter_per_area: f64) -> Result<Self> {
        let geometry = Geometry::DistributedBoundary { area_per_volume, perimeter_per_area };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Fractional volume; the neighbor-area fraction defaults to the volume fraction
    pub fn fractional_volume(
        volume_fraction: f64,
        surface_fraction: f64,
        neighbor_area_fraction: Option<f64>,
    ) -> Result<Self> {
        let geometry = Geometry::FractionalVolume {
            volume_fraction,
            surface_fraction,
            neighbor_area_fraction: neighbor_area_fraction.unwrap_or(volume_fraction),
        };
        geometry.validate()?;
        Ok(geometry)
    }

    pub fn fixed_cross_section(cross_area: f64, surface_area_per_length: f64) -> Result<Self> {
        let geometry = Geometry::FixedCrossSection { cross_area, surface_area_per_length };
        geometry.validate()?;
        Ok(geometry)
    }

    pub fn fixed_perimeter(perimeter: f64, on_cell_surface: bool) -> Result<Self> {
        let geometry = Geometry::FixedPerimeter { perimeter, on_cell_surface };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Either `scale` (replacing π) or `diam_scale` (scaling the diameter), not both
    pub fn scalable_border(scale: Option<f64>, diam_scale: Option<f64>, on_cell_surface: bool) -> Result<Self> {
        let (scale, diam_scale) = match (scale, diam_scale) {
            (Some(_), Some(_)) => {
                return Err(RxdError::InvalidGeometry(
                    "ScalableBorder takes either scale or diam_scale, not both".into(),
                ));
            }
            (Some(scale), None) => (scale, 1.0),
            (None, Some(diam_scale)) => (PI, diam_scale),
            (None, None) => (PI, 1.0),
        };
        let geometry = Geometry::ScalableBorder { scale, diam_scale, on_cell_surface };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Annular shell; `lo` and `hi` are swapped when given in reverse
    pub fn shell(lo: f64, hi: f64) -> Result<Self> {
        let (lo, hi) = if lo > hi { (hi, lo) } else { (lo, hi) };
        let geometry = Geometry::Shell { lo, hi };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Check parameters; called whenever a geometry is attached to a region
    pub fn validate(&self) -> Result<()> {
        let non_negative = |name: &str, value: f64| {
            if value >= 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(RxdError::InvalidGeometry(format!("{name} must be finite and non-negative, got {value}")))
            }
        };
        // parameters that scale node volumes
        let positive = |name: &str, value: f64| {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(RxdError::InvalidGeometry(format!("{name} must be finite and positive, got {value}")))
            }
        };

        match self {
            Geometry::Inside | Geometry::Extracellular => Ok(()),
            Geometry::Membrane { scale } => positive("membrane scale", *scale),
            Geometry::DistributedBoundary { area_per_volume, perimeter_per_area } => {
                positive("area_per_volume", *area_per_volume)?;
                non_negative("perimeter_per_area", *perimeter_per_area)
            }
            Geometry::FractionalVolume { volume_fraction, surface_fraction, neighbor_area_fraction } => {
                positive("volume_fraction", *volume_fraction)?;
                non_negative("surface_fraction", *surface_fraction)?;
                non_negative("neighbor_area_fraction", *neighbor_area_fraction)
            }
            Geometry::FixedCrossSection { cross_area, surface_area_per_length } => {
                positive("cross_area", *cross_area)?;
                non_negative("surface_area", *surface_area_per_length)
            }
            Geometry::FixedPerimeter { perimeter, .. } => positive("perimeter", *perimeter),
            Geometry::ScalableBorder { scale, diam_scale, .. } => {
                positive("scale", *scale)?;
                positive("diam_scale", *diam_scale)
            }
            Geometry::Shell { lo, hi } => {
                non_negative("shell lo", *lo)?;
                non_negative("shell hi", *hi)?;
                if lo > hi {
                    return Err(RxdError::InvalidGeometry("shell lo must not exceed hi".into()));
                }
                if lo == hi {
                    return Err(RxdError::InvalidGeometry("shells must have thickness".into()));
                }
                if *lo < 1.0 && 1.0 < *hi {
                    return Err(RxdError::InvalidGeometry(
                        "shells may not cross the membrane (1 strictly between lo and hi)".into(),
                    ));
                }
                Ok(())
            }
            Geometry::Multiple(multiple) => multiple.validate(),
        }
    }

    // ========================================== Queries ==========================================

    /// Volume-type region (cytosol, shells, ...)
    pub fn is_volume(&self) -> bool {
        match self {
            Geometry::Inside
            | Geometry::FractionalVolume { .. }
            | Geometry::FixedCrossSection { .. }
            | Geometry::Shell { .. }
            | Geometry::Extracellular => true,
            Geometry::Multiple(multiple) => multiple.is_volume(),
            _ => false,
        }
    }

    /// Area-type region (membranes, borders)
    pub fn is_area(&self) -> bool {
        match self {
            Geometry::Membrane { .. }
            | Geometry::DistributedBoundary { .. }
            | Geometry::FixedPerimeter { .. }
            | Geometry::ScalableBorder { .. } => true,
            Geometry::Multiple(multiple) => !multiple.is_volume(),
            _ => false,
        }
    }

    // ========================================= 1D values ==========================================

    /// Compartment size of every segment of `section`
    pub fn volumes1d(&self, morphology: &Morphology, section: SectionId) -> Result<Vec<f64>> {
        let sec = morphology.section(section)?;
        let per_length = |value: f64| vec![value * sec.dx(); sec.nseg()];

        Ok(match self {
            Geometry::Inside => frustum::per_segment(sec, |p| p.volume(1.0)),
            Geometry::Membrane { scale } => frustum::per_segment(sec, |p| scale * p.lateral_area(PI, 1.0)),
            Geometry::DistributedBoundary { area_per_volume, .. } => {
                frustum::per_segment(sec, |p| area_per_volume * p.volume(1.0))
            }
            Geometry::FractionalVolume { volume_fraction, .. } => {
                frustum::per_segment(sec, |p| volume_fraction * p.volume(1.0))
            }
            Geometry::FixedCrossSection { cross_area, .. } => per_length(*cross_area),
            Geometry::FixedPerimeter { perimeter, .. } => per_length(*perimeter),
            Geometry::ScalableBorder { scale, diam_scale, .. } => {
                frustum::per_segment(sec, |p| p.lateral_area(*scale, *diam_scale))
            }
            Geometry::Shell { lo, hi } => frustum::per_segment(sec, |p| p.volume(*hi) - p.volume(*lo)),
            Geometry::Extracellular => return Err(extracellular_in_1d()),
            Geometry::Multiple(multiple) => return multiple.for_section(section)?.volumes1d(morphology, section),
        })
    }

    /// Plasma-membrane area of every segment of `section`
    pub fn surface_areas1d(&self, morphology: &Morphology, section: SectionId) -> Result<Vec<f64>> {
        let sec = morphology.section(section)?;
        let zeros = vec![0.0; sec.nseg()];

        Ok(match self {
            Geometry::Inside => frustum::per_segment(sec, |p| p.lateral_area(PI, 1.0)),
            Geometry::Membrane { .. } | Geometry::DistributedBoundary { .. } => zeros,
            Geometry::FractionalVolume { surface_fraction, .. } => {
                frustum::per_segment(sec, |p| surface_fraction * p.lateral_area(PI, 1.0))
            }
            Geometry::FixedCrossSection { surface_area_per_length, .. } => {
                vec![surface_area_per_length * sec.dx(); sec.nseg()]
            }
            Geometry::FixedPerimeter { on_cell_surface, .. } | Geometry::ScalableBorder { on_cell_surface, .. } => {
                if *on_cell_surface {
                    return self.volumes1d(morphology, section);
                }
                zeros
            }
            Geometry::Shell { lo, hi } => {
                if *lo == 1.0 || *hi == 1.0 {
                    frustum::per_segment(sec, |p| p.lateral_area(PI, 1.0))
                } else {
                    zeros
                }
            }
            Geometry::Extracellular => return Err(extracellular_in_1d()),
            Geometry::Multiple(multiple) => {
                return multiple.for_section(section)?.surface_areas1d(morphology, section);
            }
        })
    }

    /// Area of each of the `nseg + 1` faces of `section`
    pub fn neighbor_areas1d(&self, morphology: &Morphology, section: SectionId) -> Result<Vec<f64>> {
        let sec = morphology.section(section)?;
        let faces = frustum::face_diameters(sec);
        let disc = |d: &f64| PI * 0.25 * d * d;

        Ok(match self {
            Geometry::Inside => faces.iter().map(disc).collect(),
            Geometry::Membrane { scale } => faces.iter().map(|d| scale * PI * d).collect(),
            Geometry::DistributedBoundary { perimeter_per_area, .. } => {
                faces.iter().map(|d| perimeter_per_area * disc(d)).collect()
            }
            Geometry::FractionalVolume { neighbor_area_fraction, .. } => {
                faces.iter().map(|d| neighbor_area_fraction * disc(d)).collect()
            }
            Geometry::FixedCrossSection { cross_area, .. } => vec![*cross_area; faces.len()],
            Geometry::FixedPerimeter { perimeter, .. } => vec![*perimeter; faces.len()],
            Geometry::ScalableBorder { scale, diam_scale, .. } => {
                faces.iter().map(|d| scale * d * diam_scale).collect()
            }
            Geometry::Shell { lo, hi } => faces
                .iter()
                .map(|d| PI * 0.25 * ((d * hi).powi(2) - (d * lo).powi(2)))
                .collect(),
            Geometry::Extracellular => return Err(extracellular_in_1d()),
            Geometry::Multiple(multiple) => {
                return multiple.for_section(section)?.neighbor_areas1d(morphology, section);
            }
        })
    }

    // ========================================= 3D values ==========================================

    /// Scale factors applied to voxelized (volume, surface area, face area)
    pub fn voxel_scales(&self) -> Result<VoxelScales> {
        match self {
            Geometry::Inside => Ok(VoxelScales { volume: 1.0, surface: 1.0, neighbor_area: 1.0 }),
            Geometry::FractionalVolume { volume_fraction, surface_fraction, neighbor_area_fraction } => {
                Ok(VoxelScales {
                    volume: *volume_fraction,
                    surface: *surface_fraction,
                    neighbor_area: *neighbor_area_fraction,
                })
            }
            Geometry::DistributedBoundary { area_per_volume, perimeter_per_area } => Ok(VoxelScales {
                volume: *area_per_volume,
                surface: *area_per_volume,
                neighbor_area: *perimeter_per_area,
            }),
            other => Err(RxdError::InvalidGeometry(format!(
                "{} is not supported on 3D regions",
                other.name()
            ))),
        }
    }

    /// Short variant name (used in diagnostics)
    pub fn name(&self) -> &'static str {
        match self {
            Geometry::Inside => "Inside",
            Geometry::Membrane { .. } => "Membrane",
            Geometry::DistributedBoundary { .. } => "DistributedBoundary",
            Geometry::FractionalVolume { .. } => "FractionalVolume",
            Geometry::FixedCrossSection { .. } => "FixedCrossSection",
            Geometry::FixedPerimeter { .. } => "FixedPerimeter",
            Geometry::ScalableBorder { .. } => "ScalableBorder",
            Geometry::Shell { .. } => "Shell",
            Geometry::Extracellular => "Extracellular",
            Geometry::Multiple(_) => "MultipleGeometry",
        }
    }
}

fn extracellular_in_1d() -> RxdError {
    RxdError::InvalidGeometry("the extracellular geometry has no 1D discretization".into())
}

/// Multipliers applied to raw voxel quantities
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelScales {
    pub volume: f64,
    pub surface: f64,
    pub neighbor_area: f64,
}

// =================================================================================================
// Multiple geometry
// =================================================================================================

/// Per-section geometry; all entries must be volumes or all must be areas
#[derive(Debug, Clone, PartialEq)]
pub struct MultipleGeometry {
    entries: Vec<(Vec<SectionId>, Geometry)>,
    default: Option<Box<Geometry>>,
}

impl MultipleGeometry {
    /// Build from `(sections, geometry)` pairs plus an optional fallback
    pub fn new(entries: Vec<(Vec<SectionId>, Geometry)>, default: Option<Geometry>) -> Result<Self> {
        let multiple = Self { entries, default: default.map(Box::new) };
        multiple.validate()?;
        Ok(multiple)
    }

    fn geometries(&self) -> impl Iterator<Item = &Geometry> {
        self.entries.iter().map(|(_, g)| g).chain(self.default.as_deref())
    }

    fn validate(&self) -> Result<()> {
        if self.geometries().next().is_none() {
            return Err(RxdError::InvalidGeometry("MultipleGeometry needs at least one geometry".into()));
        }
        for geometry in self.geometries() {
            if matches!(geometry, Geometry::Multiple(_) | Geometry::Extracellular) {
                return Err(RxdError::InvalidGeometry(format!(
                    "{} cannot be nested in MultipleGeometry",
                    geometry.name()
                )));
            }
            geometry.validate()?;
        }
        let all_volume = self.geometries().all(Geometry::is_volume);
        let all_area = self.geometries().all(Geometry::is_area);
        if !all_volume && !all_area {
            return Err(RxdError::InvalidGeometry(
                "MultipleGeometry requires all geometries to be areas or all to be volumes".into(),
            ));
        }
        Ok(())
    }

    fn is_volume(&self) -> bool {
        self.geometries().all(Geometry::is_volume)
    }

    /// Geometry governing `section`
    pub fn for_section(&self, section: SectionId) -> Result<&Geometry> {
        self.entries
            .iter()
            .find(|(sections, _)| sections.contains(&section))
            .map(|(_, g)| g)
            .or(self.default.as_deref())
            .ok_or_else(|| RxdError::InvalidGeometry(format!("no geometry given for section {}", section.0)))
    }
}

// =================================================================================================
// Tests
// =================================================================================================
