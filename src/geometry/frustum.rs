//! Frustum integration over section 3D points
//!
//! A segment `[lo, hi]` (arc length) is cut at every interior 3D point; each piece is a
//! truncated cone whose end diameters are interpolated from the section's points.

use std::f64::consts::PI;

use crate::morphology::{interpolate, Section};

/// Truncated cone between two cut positions
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Piece {
    pub length: f64,
    pub d0: f64,
    pub d1: f64,
}

impl Piece {
    /// π·len/12·(d0² + d0·d1 + d1²), diameters multiplied by `diam_scale`
    pub fn volume(&self, diam_scale: f64) -> f64 {
        let (d0, d1) = (self.d0 * diam_scale, self.d1 * diam_scale);
        PI * self.length / 12.0 * (d0 * d0 + d0 * d1 + d1 * d1)
    }

    /// Lateral area with π replaced by `scale`
    pub fn lateral_area(&self, scale: f64, diam_scale: f64) -> f64 {
        let (d0, d1) = (self.d0 * diam_scale, self.d1 * diam_scale);
        scale * 0.5 * (d0 + d1) * (0.25 * (d0 - d1).powi(2) + self.length * self.length).sqrt()
    }
}

/// Pieces making up segment `index` of `section`
pub(crate) fn segment_pieces(section: &Section, index: usize) -> Vec<Piece> {
    let arcs = section.arc_lengths();
    let dx = section.dx();
    let (lo, hi) = (index as f64 * dx, (index + 1) as f64 * dx);

    let mut cuts = vec![lo];
    cuts.extend(arcs.iter().copied().filter(|a| *a > lo && *a < hi));
    cuts.push(hi);

    let diams: Vec<f64> = cuts
        .iter()
        .map(|&at| interpolate(&arcs, at, |i| section.points()[i].diam))
        .collect();

    cuts.windows(2)
        .zip(diams.windows(2))
        .map(|(c, d)| Piece { length: c[1] - c[0], d0: d[0], d1: d[1] })
        .collect()
}

/// Sum of `f` over the pieces of every segment
pub(crate) fn per_segment(section: &Section, f: impl Fn(&Piece) -> f64) -> Vec<f64> {
    (0..section.nseg())
        .map(|index| segment_pieces(section, index).iter().map(&f).sum())
        .collect()
}

/// Diameter at each of the `nseg + 1` segment faces
pub(crate) fn face_diameters(section: &Section) -> Vec<f64> {
    let dx = section.dx();
    (0..=section.nseg())
        .map(|face| section.diam_at_arc(face as f64 * dx))
        .collect()
}

// =================================================================================================
// Tests
// =================================================================================================
