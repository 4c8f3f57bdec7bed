//! Interface to the compartmental (cable) solver
//!
//! The engine never reaches into the cable solver directly. Everything it needs (morphology,
//! change counters, clock, voltages, ionic currents and concentrations) goes through
//! [`CompartmentalHost`], injected by the caller at every operation.
//!
//! [`StaticHost`] is a self-contained, in-memory implementation used for standalone reaction
//! diffusion models and throughout the tests.

use std::collections::HashMap;

use crate::error::Result;
use crate::morphology::{Morphology, SectionId, SegmentRef};

/// Side of the plasma membrane a classic ion concentration lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IonSide {
    /// Intracellular concentration (`cai`-style)
    Inside,
    /// Extracellular concentration (`cao`-style)
    Outside,
}

impl IonSide {
    /// Sign applied to outward membrane current when converted into a concentration change
    pub fn current_sign(&self) -> f64 {
        match self {
            IonSide::Inside => -1.0,
            IonSide::Outside => 1.0,
        }
    }
}

/// Services consumed from, and results produced to, the cable solver
pub trait CompartmentalHost {
    /// Current morphology
    fn morphology(&self) -> &Morphology;

    /// Monotonic counter bumped on every topology or discretization change
    fn structure_change_count(&self) -> u64;

    /// Monotonic counter bumped on every diameter change
    fn diam_change_count(&self) -> u64;

    /// Simulation time (ms)
    fn t(&self) -> f64;

    /// Cable-solver time step (ms)
    fn dt(&self) -> f64;

    /// Membrane potential of a segment (mV)
    fn membrane_potential(&self, segment: SegmentRef) -> f64;

    /// Outward membrane current density carried by `ion` (mA/cm²)
    fn ion_current(&self, ion: &str, segment: SegmentRef) -> f64;

    /// Classic concentration of `ion`, if the cable solver tracks it
    fn concentration(&self, ion: &str, side: IonSide, segment: SegmentRef) -> Option<f64>;

    /// Overwrite the classic concentration of `ion`
    fn set_concentration(&mut self, ion: &str, side: IonSide, segment: SegmentRef, value: f64);

    /// Add a current density (mA/cm²) induced by membrane-spanning kinetics
    fn add_induced_current(&mut self, ion: &str, segment: SegmentRef, value: f64);

    /// Membrane area of a segment (µm²) used to scale currents
    fn segment_area(&self, segment: SegmentRef) -> f64 {
        crate::geometry::Geometry::Inside
            .surface_areas1d(self.morphology(), segment.section)
            .ok()
            .and_then(|areas| areas.get(segment.index).copied())
            .unwrap_or(0.0)
    }
}

// =================================================================================================
// In-memory host
// =================================================================================================

/// Self-contained host storing everything in hash maps
///
/// Structural edits made through its methods bump the change counters, which is what makes the
/// engine rebuild its node layout and matrices.
#[derive(Debug, Clone)]
pub struct StaticHost {
    morphology: Morphology,
    structure_changes: u64,
    diam_changes: u64,
    t: f64,
    dt: f64,
    resting_potential: f64,
    voltages: HashMap<SegmentRef, f64>,
    currents: HashMap<(String, SegmentRef), f64>,
    concentrations: HashMap<(String, IonSide, SegmentRef), f64>,
    induced: HashMap<(String, SegmentRef), f64>,
}

impl StaticHost {
    pub fn new(morphology: Morphology) -> Self {
        Self {
            morphology,
            structure_changes: 1,
            diam_changes: 1,
            t: 0.0,
            dt: 0.025,
            resting_potential: -65.0,
            voltages: HashMap::new(),
            currents: HashMap::new(),
            concentrations: HashMap::new(),
            induced: HashMap::new(),
        }
    }

    /// Replace the morphology wholesale
    pub fn set_morphology(&mut self, morphology: Morphology) {
        self.morphology = morphology;
        self.structure_changes += 1;
    }

    /// Change the discretization of one section
    pub fn set_nseg(&mut self, section: SectionId, nseg: usize) -> Result<()> {
        self.morphology.section_mut(section)?.set_nseg(nseg)?;
        self.structure_changes += 1;
        Ok(())
    }

    /// Make a section a uniform cylinder of diameter `diam`
    pub fn set_diam(&mut self, section: SectionId, diam: f64) -> Result<()> {
        self.morphology.section_mut(section)?.set_diam(diam)?;
        self.diam_changes += 1;
        Ok(())
    }

    pub fn set_time(&mut self, t: f64) {
        self.t = t;
    }

    pub fn set_dt(&mut self, dt: f64) {
        self.dt = dt;
    }

    /// Potential reported for segments without an explicit voltage
    pub fn set_resting_potential(&mut self, v: f64) {
        self.resting_potential = v;
    }

    pub fn set_voltage(&mut self, segment: SegmentRef, v: f64) {
        self.voltages.insert(segment, v);
    }

    pub fn set_ion_current(&mut self, ion: &str, segment: SegmentRef, value: f64) {
        self.currents.insert((ion.to_string(), segment), value);
    }

    /// Accumulated induced current of `ion` on a segment
    pub fn induced_current(&self, ion: &str, segment: SegmentRef) -> f64 {
        self.induced.get(&(ion.to_string(), segment)).copied().unwrap_or(0.0)
    }

    pub fn clear_induced_currents(&mut self) {
        self.induced.clear();
    }
}

impl CompartmentalHost for StaticHost {
    fn morphology(&self) -> &Morphology {
        &self.morphology
    }

    fn structure_change_count(&self) -> u64 {
        self.structure_changes
    }

    fn diam_change_count(&self) -> u64 {
        self.diam_changes
    }

    fn t(&self) -> f64 {
        self.t
    }

    fn dt(&self) -> f64 {
        self.dt
    }

    fn membrane_potential(&self, segment: SegmentRef) -> f64 {
        self.voltages.get(&segment).copied().unwrap_or(self.resting_potential)
    }

    fn ion_current(&self, ion: &str, segment: SegmentRef) -> f64 {
        self.currents.get(&(ion.to_string(), segment)).copied().unwrap_or(0.0)
    }

    fn concentration(&self, ion: &str, side: IonSide, segment: SegmentRef) -> Option<f64> {
        self.concentrations.get(&(ion.to_string(), side, segment)).copied()
    }

    fn set_concentration(&mut self, ion: &str, side: IonSide, segment: SegmentRef, value: f64) {
        self.concentrations.insert((ion.to_string(), side, segment), value);
    }

    fn add_induced_current(&mut self, ion: &str, segment: SegmentRef, value: f64) {
        *self.induced.entry((ion.to_string(), segment)).or_insert(0.0) += value;
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morphology::Section;

    fn host() -> (StaticHost, SectionId) {
        let mut morphology = Morphology::new();
        let dend = morphology.add_section(Section::cylinder("dend", [0.0; 3], 10.0, 2.0, 2).unwrap());
        (StaticHost::new(morphology), dend)
    }

    #[test]
    fn test_structural_edits_bump_counters() {
        let (mut host, dend) = host();
        let (structure, diam) = (host.structure_change_count(), host.diam_change_count());

        host.set_nseg(dend, 4).unwrap();
        assert_eq!(host.structure_change_count(), structure + 1);
        assert_eq!(host.diam_change_count(), diam);

        host.set_diam(dend, 3.0).unwrap();
        assert_eq!(host.diam_change_count(), diam + 1);
    }

    #[test]
    fn test_induced_currents_accumulate() {
        let (mut host, dend) = host();
        let segment = SegmentRef::new(dend, 1);

        host.add_induced_current("ca", segment, 0.5);
        host.add_induced_current("ca", segment, 0.25);
        assert_eq!(host.induced_current("ca", segment), 0.75);

        host.clear_induced_currents();
        assert_eq!(host.induced_current("ca", segment), 0.0);
    }

    #[test]
    fn test_default_segment_area_is_lateral_area() {
        let (host, dend) = host();
        let area = host.segment_area(SegmentRef::new(dend, 0));
        // cylinder of length 5 and diameter 2
        assert!((area - std::f64::consts::PI * 2.0 * 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_voltage_defaults_to_rest() {
        let (mut host, dend) = host();
        let segment = SegmentRef::new(dend, 0);
        assert_eq!(host.membrane_potential(segment), -65.0);

        host.set_voltage(segment, -20.0);
        assert_eq!(host.membrane_potential(segment), -20.0);
    }
}
