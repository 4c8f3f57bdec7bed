//! Morphology and host interface
//!
//! The cable solver that owns the neuron is an external collaborator. This module holds the
//! morphology description it shares with the reaction-diffusion engine and the narrow trait
//! ([`CompartmentalHost`]) through which data flows in both directions.
//!
//! # Sections and segments
//!
//! ```text
//!   x = 0                                                 x = 1
//!    ├──────────┼──────────┼──────────┼──────────┤
//!    │  seg 0   │  seg 1   │  seg 2   │  seg 3   │   nseg = 4, dx = L / nseg
//!    └──────────┴──────────┴──────────┴──────────┘
//!    faces:  0          1          2          3          4   (nseg + 1 faces)
//! ```
//!
//! A section is a polyline of 3D points with diameters. A child section attaches its `x = 0`
//! end to a position `parent_x` on its parent.

pub mod host;

pub use host::{CompartmentalHost, IonSide, StaticHost};

use crate::error::{Result, RxdError};

/// Index of a section inside a [`Morphology`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionId(pub usize);

/// One segment of one section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentRef {
    pub section: SectionId,
    pub index: usize,
}

impl SegmentRef {
    pub fn new(section: SectionId, index: usize) -> Self {
        Self { section, index }
    }
}

/// 3D point with diameter (µm)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pt3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub diam: f64,
}

impl Pt3d {
    pub fn new(x: f64, y: f64, z: f64, diam: f64) -> Self {
        Self { x, y, z, diam }
    }

    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    fn distance(&self, other: &Pt3d) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }
}

// =================================================================================================
// Section
// =================================================================================================

/// Unbranched cable
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    name: String,
    nseg: usize,
    points: Vec<Pt3d>,
    parent: Option<(SectionId, f64)>,
}

impl Section {
    /// Build a section from its 3D points
    ///
    /// At least two points and a non-zero total length are required.
    pub fn from_points(name: &str, points: Vec<Pt3d>, nseg: usize) -> Result<Self> {
        if nseg == 0 {
            return Err(RxdError::InvalidGeometry(format!("section {name}: nseg must be positive")));
        }
        if points.len() < 2 {
            return Err(RxdError::InvalidGeometry(format!(
                "section {name}: at least two 3D points are required"
            )));
        }
        if points.iter().any(|p| !(p.diam >= 0.0) || !p.x.is_finite() || !p.y.is_finite() || !p.z.is_finite()) {
            return Err(RxdError::InvalidGeometry(format!(
                "section {name}: points must be finite with non-negative diameters"
            )));
        }

        let section = Self { name: name.to_string(), nseg, points, parent: None };
        if section.length() <= 0.0 {
            return Err(RxdError::InvalidGeometry(format!("section {name}: zero length")));
        }
        Ok(section)
    }

    /// Straight cylinder along +x starting at `origin`
    pub fn cylinder(name: &str, origin: [f64; 3], length: f64, diam: f64, nseg: usize) -> Result<Self> {
        let [x, y, z] = origin;
        Self::from_points(
            name,
            vec![Pt3d::new(x, y, z, diam), Pt3d::new(x + length, y, z, diam)],
            nseg,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nseg(&self) -> usize {
        self.nseg
    }

    pub fn points(&self) -> &[Pt3d] {
        &self.points
    }

    /// Parent section and attachment position on it
    pub fn parent(&self) -> Option<(SectionId, f64)> {
        self.parent
    }

    pub(crate) fn set_nseg(&mut self, nseg: usize) -> Result<()> {
        if nseg == 0 {
            return Err(RxdError::InvalidGeometry(format!("section {}: nseg must be positive", self.name)));
        }
        self.nseg = nseg;
        Ok(())
    }

    pub(crate) fn set_diam(&mut self, diam: f64) -> Result<()> {
        if !(diam >= 0.0) {
            return Err(RxdError::InvalidGeometry(format!("section {}: negative diameter", self.name)));
        }
        self.points.iter_mut().for_each(|p| p.diam = diam);
        Ok(())
    }

    /// Cumulative arc length at every 3D point
    pub fn arc_lengths(&self) -> Vec<f64> {
        let mut arcs = Vec::with_capacity(self.points.len());
        let mut total = 0.0;
        arcs.push(0.0);
        for pair in self.points.windows(2) {
            total += pair[0].distance(&pair[1]);
            arcs.push(total);
        }
        arcs
    }

    /// Total length (µm)
    pub fn length(&self) -> f64 {
        self.arc_lengths().last().copied().unwrap_or(0.0)
    }

    /// Segment length (µm)
    pub fn dx(&self) -> f64 {
        self.length() / self.nseg as f64
    }

    /// Diameter at arc length `arc`, linearly interpolated
    pub fn diam_at_arc(&self, arc: f64) -> f64 {
        let arcs = self.arc_lengths();
        interpolate(&arcs, arc, |i| self.points[i].diam)
    }

    /// Position at arc length `arc`, linearly interpolated
    pub fn position_at_arc(&self, arc: f64) -> [f64; 3] {
        let arcs = self.arc_lengths();
        [
            interpolate(&arcs, arc, |i| self.points[i].x),
            interpolate(&arcs, arc, |i| self.points[i].y),
            interpolate(&arcs, arc, |i| self.points[i].z),
        ]
    }

    /// Position at normalized location `x`
    pub fn position(&self, x: f64) -> [f64; 3] {
        self.position_at_arc(x.clamp(0.0, 1.0) * self.length())
    }

    /// Segment containing normalized position `x`
    pub fn segment_index(&self, x: f64) -> usize {
        let index = (x.clamp(0.0, 1.0) * self.nseg as f64).floor() as usize;
        index.min(self.nseg - 1)
    }

    /// Normalized position of the center of segment `index`
    pub fn segment_center(&self, index: usize) -> f64 {
        (index as f64 + 0.5) / self.nseg as f64
    }

    /// Centerline of segment `index`: end points plus every interior 3D point
    pub fn segment_polyline(&self, index: usize) -> Vec<[f64; 3]> {
        let arcs = self.arc_lengths();
        let dx = self.dx();
        let (lo, hi) = (index as f64 * dx, (index + 1) as f64 * dx);

        let mut polyline = vec![self.position_at_arc(lo)];
        polyline.extend(
            arcs.iter()
                .zip(&self.points)
                .filter(|(arc, _)| **arc > lo && **arc < hi)
                .map(|(_, p)| p.position()),
        );
        polyline.push(self.position_at_arc(hi));
        polyline
    }
}

/// Piecewise-linear interpolation of `value(i)` over the knots `arcs`, clamped at both ends
pub(crate) fn interpolate(arcs: &[f64], at: f64, value: impl Fn(usize) -> f64) -> f64 {
    let last = arcs.len() - 1;
    if at <= arcs[0] {
        return value(0);
    }
    if at >= arcs[last] {
        return value(last);
    }
    let upper = arcs.partition_point(|a| *a <= at).min(last);
    let lower = upper - 1;
    let span = arcs[upper] - arcs[lower];
    if span <= 0.0 {
        return value(upper);
    }
    let t = (at - arcs[lower]) / span;
    value(lower) * (1.0 - t) + value(upper) * t
}

// =================================================================================================
// Morphology
// =================================================================================================

/// Ordered collection of sections with parent connectivity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Morphology {
    sections: Vec<Section>,
}

impl Morphology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unconnected section
    pub fn add_section(&mut self, section: Section) -> SectionId {
        self.sections.push(section);
        SectionId(self.sections.len() - 1)
    }

    /// Attach the `x = 0` end of `child` at `parent_x` on `parent`
    ///
    /// Cycles are rejected.
    pub fn connect(&mut self, child: SectionId, parent: SectionId, parent_x: f64) -> Result<()> {
        self.section(child)?;
        self.section(parent)?;
        if !(0.0..=1.0).contains(&parent_x) {
            return Err(RxdError::InvalidGeometry(format!("attachment position {parent_x} outside [0, 1]")));
        }

        // walking up from the parent must never reach the child
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == child {
                return Err(RxdError::InvalidGeometry(format!(
                    "connecting {} to {} would create a cycle",
                    self.sections[child.0].name, self.sections[parent.0].name
                )));
            }
            cursor = self.sections[current.0].parent.map(|(p, _)| p);
        }

        self.sections[child.0].parent = Some((parent, parent_x));
        Ok(())
    }

    pub fn section(&self, id: SectionId) -> Result<&Section> {
        self.sections
            .get(id.0)
            .ok_or_else(|| RxdError::InvalidGeometry(format!("unknown section {}", id.0)))
    }

    pub(crate) fn section_mut(&mut self, id: SectionId) -> Result<&mut Section> {
        self.sections
            .get_mut(id.0)
            .ok_or_else(|| RxdError::InvalidGeometry(format!("unknown section {}", id.0)))
    }

    pub fn sections(&self) -> impl Iterator<Item = (SectionId, &Section)> {
        self.sections.iter().enumerate().map(|(i, s)| (SectionId(i), s))
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Sections attached to `id`, in section order
    pub fn children(&self, id: SectionId) -> Vec<(SectionId, f64)> {
        self.sections()
            .filter_map(|(child, section)| match section.parent {
                Some((parent, x)) if parent == id => Some((child, x)),
                _ => None,
            })
            .collect()
    }

    /// Every section, roots first, each tree in depth-first preorder
    ///
    /// Roots are visited in section order, children in section order. A parent always precedes
    /// its children.
    pub fn preorder(&self) -> Vec<SectionId> {
        let mut order = Vec::with_capacity(self.sections.len());
        let roots = self.sections().filter(|(_, s)| s.parent.is_none()).map(|(id, _)| id);

        for root in roots {
            let mut stack = vec![root];
            while let Some(current) = stack.pop() {
                order.push(current);
                let children = self.children(current);
                stack.extend(children.into_iter().rev().map(|(child, _)| child));
            }
        }
        order
    }

    /// Every segment in preorder
    pub fn segments(&self) -> Vec<SegmentRef> {
        self.preorder()
            .into_iter()
            .flat_map(|id| (0..self.sections[id.0].nseg).map(move |i| SegmentRef::new(id, i)))
            .collect()
    }
}

// =================================================================================================
// Tests
// =================================================================================================
