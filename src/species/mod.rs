//! Species, parameters and states
//!
//! A [`Species`] declares a field living on one or more regions. Once added to a context it is
//! discretized into one *instance* per region:
//!
//! ```text
//!  Species ca on [cyt (1D), er (3D), ecs]
//!     │
//!     ├── OneDInstance        ghosts + one node per segment, canonical section order
//!     ├── Intracellular3D     one node per occupied voxel
//!     └── ExtracellularInstance  one node per lattice voxel
//! ```
//!
//! Each instance owns a contiguous node range.
//!
//! # Field kinds
//!
//! | Kind        | Diffuses | Evolves through reactions |
//! |-------------|----------|---------------------------|
//! | `Species`   | yes      | yes                       |
//! | `State`     | no       | yes                       |
//! | `Parameter` | no       | no                        |

pub mod extracellular;
pub mod intracellular3d;
pub mod section1d;

pub use extracellular::ExtracellularInstance;
pub use intracellular3d::Intracellular3D;
pub use section1d::{OneDInstance, Section1D};

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::arena::Handle;
use crate::error::{Result, RxdError};
use crate::node::NodeRef;
use crate::region::RegionId;

/// Stable handle of a species inside a context
pub type SpeciesId = Handle<Species>;

/// What kind of field a [`Species`] declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldKind {
    #[default]
    Species,
    /// Non-diffusing, changed by reactions only
    State,
    /// Constant in time
    Parameter,
}

/// Diffusion coefficient (µm²/ms)
#[derive(Clone)]
pub enum DiffusionCoefficient {
    Scalar(f64),
    /// Per-axis coefficients; 3D only
    Anisotropic([f64; 3]),
    /// Function of the node position
    Function(Arc<dyn Fn([f64; 3]) -> f64 + Send + Sync>),
}

impl DiffusionCoefficient {
    /// Per-axis value at `position`
    ///
    /// Function coefficients are only known here, so this is where a negative or non-finite
    /// value is caught.
    pub fn at(&self, position: [f64; 3]) -> Result<[f64; 3]> {
        let d = match self {
            DiffusionCoefficient::Scalar(d) => [*d; 3],
            DiffusionCoefficient::Anisotropic(d) => *d,
            DiffusionCoefficient::Function(f) => [f(position); 3],
        };
        if d.iter().all(|x| *x >= 0.0 && x.is_finite()) {
            Ok(d)
        } else {
            Err(RxdError::InvalidSpecies(format!(
                "diffusion coefficient at {position:?} must be non-negative and finite, got {d:?}"
            )))
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            DiffusionCoefficient::Scalar(d) => *d == 0.0,
            DiffusionCoefficient::Anisotropic(d) => d.iter().all(|x| *x == 0.0),
            DiffusionCoefficient::Function(_) => false,
        }
    }

    fn validate(&self) -> Result<()> {
        let check = |d: f64| {
            if d >= 0.0 && d.is_finite() {
                Ok(())
            } else {
                Err(RxdError::InvalidSpecies(format!("diffusion coefficient must be non-negative, got {d}")))
            }
        };
        match self {
            DiffusionCoefficient::Scalar(d) => check(*d),
            DiffusionCoefficient::Anisotropic(d) => d.iter().try_for_each(|x| check(*x)),
            DiffusionCoefficient::Function(_) => Ok(()),
        }
    }
}

impl From<f64> for DiffusionCoefficient {
    fn from(d: f64) -> Self {
        DiffusionCoefficient::Scalar(d)
    }
}

impl From<[f64; 3]> for DiffusionCoefficient {
    fn from(d: [f64; 3]) -> Self {
        DiffusionCoefficient::Anisotropic(d)
    }
}

impl fmt::Debug for DiffusionCoefficient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffusionCoefficient::Scalar(d) => write!(f, "Scalar({d})"),
            DiffusionCoefficient::Anisotropic(d) => write!(f, "Anisotropic({d:?})"),
            DiffusionCoefficient::Function(_) => write!(f, "Function(..)"),
        }
    }
}

/// How node states are set by `initialize`
#[derive(Clone, Default)]
pub enum InitialValue {
    /// Host concentration when the species is named and the region tagged, 0 otherwise
    #[default]
    Default,
    Constant(f64),
    /// Host concentration of the ion on the region's side (0 when the host has none)
    FromHost,
    Function(Arc<dyn Fn(&NodeRef) -> f64 + Send + Sync>),
}

impl fmt::Debug for InitialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitialValue::Default => write!(f, "Default"),
            InitialValue::Constant(value) => write!(f, "Constant({value})"),
            InitialValue::FromHost => write!(f, "FromHost"),
            InitialValue::Function(_) => write!(f, "Function(..)"),
        }
    }
}

// =================================================================================================
// Species declaration
// =================================================================================================

/// Field declaration: where it lives and how it moves
#[derive(Debug, Clone)]
pub struct Species {
    name: Option<String>,
    regions: Vec<RegionId>,
    kind: FieldKind,
    diffusion: DiffusionCoefficient,
    charge: i32,
    initial: InitialValue,
    atol_scale: f64,
}

impl Species {
    /// Diffusing species (`d = 0` until set)
    pub fn new(regions: Vec<RegionId>) -> Self {
        Self {
            name: None,
            regions,
            kind: FieldKind::Species,
            diffusion: DiffusionCoefficient::Scalar(0.0),
            charge: 0,
            initial: InitialValue::Default,
            atol_scale: 1.0,
        }
    }

    /// Field changed only by reactions
    pub fn state(regions: Vec<RegionId>) -> Self {
        Self { kind: FieldKind::State, ..Self::new(regions) }
    }

    /// Constant field
    pub fn parameter(regions: Vec<RegionId>) -> Self {
        Self { kind: FieldKind::Parameter, ..Self::new(regions) }
    }

    /// Ion name; links the species to host concentrations and currents
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_diffusion(mut self, d: impl Into<DiffusionCoefficient>) -> Self {
        self.diffusion = d.into();
        self
    }

    pub fn with_charge(mut self, charge: i32) -> Self {
        self.charge = charge;
        self
    }

    pub fn with_initial(mut self, initial: InitialValue) -> Self {
        self.initial = initial;
        self
    }

    /// Scale of the absolute tolerance used by variable-step integration
    pub fn with_atol_scale(mut self, scale: f64) -> Self {
        self.atol_scale = scale;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(RxdError::InvalidSpecies("a species must live on at least one region".into()));
        }
        if let Some(name) = &self.name
            && name.trim().is_empty()
        {
            return Err(RxdError::InvalidSpecies("species names must not be blank".into()));
        }
        self.diffusion.validate()?;
        if self.kind != FieldKind::Species && !self.diffusion.is_zero() {
            return Err(RxdError::InvalidSpecies(format!("{:?} fields do not diffuse", self.kind)));
        }
        if !(self.atol_scale > 0.0 && self.atol_scale.is_finite()) {
            return Err(RxdError::InvalidSpecies(format!("atol scale must be positive, got {}", self.atol_scale)));
        }
        Ok(())
    }

    // ========================================= Accessors =========================================

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn regions(&self) -> &[RegionId] {
        &self.regions
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn diffusion(&self) -> &DiffusionCoefficient {
        &self.diffusion
    }

    pub fn charge(&self) -> i32 {
        self.charge
    }

    pub fn initial(&self) -> &InitialValue {
        &self.initial
    }

    pub fn atol_scale(&self) -> f64 {
        self.atol_scale
    }

    pub(crate) fn set_diffusion(&mut self, d: DiffusionCoefficient) -> Result<()> {
        let previous = std::mem::replace(&mut self.diffusion, d);
        if let Err(e) = self.validate() {
            self.diffusion = previous;
            return Err(e);
        }
        Ok(())
    }

    pub(crate) fn set_charge(&mut self, charge: i32) {
        self.charge = charge;
    }
}

// =================================================================================================
// Instances
// =================================================================================================

/// Discretization of one species on one region
#[derive(Debug, Clone)]
pub enum Instance {
    OneD(OneDInstance),
    ThreeD(Intracellular3D),
    Extracellular(ExtracellularInstance),
}

impl Instance {
    pub fn species(&self) -> SpeciesId {
        match self {
            Instance::OneD(instance) => instance.species,
            Instance::ThreeD(instance) => instance.species,
            Instance::Extracellular(instance) => instance.species,
        }
    }

    pub fn region(&self) -> RegionId {
        match self {
            Instance::OneD(instance) => instance.region,
            Instance::ThreeD(instance) => instance.region,
            Instance::Extracellular(instance) => instance.region,
        }
    }

    pub fn range(&self) -> Range<usize> {
        match self {
            Instance::OneD(instance) => instance.range.clone(),
            Instance::ThreeD(instance) => instance.range.clone(),
            Instance::Extracellular(instance) => instance.range.clone(),
        }
    }

    /// Move every node index down by `count` (after an earlier range was removed)
    pub(crate) fn shift_down(&mut self, count: usize) {
        match self {
            Instance::OneD(instance) => instance.shift_down(count),
            Instance::ThreeD(instance) => instance.range = shift(&instance.range, count),
            Instance::Extracellular(instance) => instance.range = shift(&instance.range, count),
        }
    }
}

pub(crate) fn shift(range: &Range<usize>, count: usize) -> Range<usize> {
    range.start - count..range.end - count
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::region::Region;
    use crate::geometry::Geometry;
    use crate::morphology::SectionId;

    fn region() -> RegionId {
        let mut arena = Arena::new("region");
        arena.insert(Region::new("cyt", vec![SectionId(0)], Geometry::Inside).unwrap())
    }

    #[test]
    fn test_builder_defaults() {
        let species = Species::new(vec![region()]).named("ca").with_diffusion(0.6).with_charge(2);

        assert_eq!(species.name(), Some("ca"));
        assert_eq!(species.kind(), FieldKind::Species);
        assert_eq!(species.diffusion().at([0.0; 3]).unwrap(), [0.6; 3]);
        assert_eq!(species.atol_scale(), 1.0);
        assert!(species.validate().is_ok());
    }

    #[test]
    fn test_parameters_do_not_diffuse() {
        assert!(Species::parameter(vec![region()]).validate().is_ok());
        assert!(Species::parameter(vec![region()]).with_diffusion(1.0).validate().is_err());
        assert!(Species::state(vec![region()]).with_diffusion([0.0, 1.0, 0.0]).validate().is_err());
    }

    #[test]
    fn test_invalid_declarations() {
        assert!(Species::new(vec![]).validate().is_err());
        assert!(Species::new(vec![region()]).with_diffusion(-1.0).validate().is_err());
        assert!(Species::new(vec![region()]).named(" ").validate().is_err());
    }

    #[test]
    fn test_set_diffusion_keeps_previous_on_error() {
        let mut species = Species::new(vec![region()]).with_diffusion(1.0);
        assert!(species.set_diffusion(DiffusionCoefficient::Scalar(f64::NAN)).is_err());
        assert_eq!(species.diffusion().at([0.0; 3]).unwrap(), [1.0; 3]);
    }

    #[test]
    fn test_function_coefficient() {
        let d = DiffusionCoefficient::Function(Arc::new(|p| 1.0 + p[0]));
        assert_eq!(d.at([2.0, 0.0, 0.0]).unwrap(), [3.0; 3]);
        assert!(!d.is_zero());
    }

    #[test]
    fn test_function_coefficient_rejects_negative_values() {
        let d = DiffusionCoefficient::Function(Arc::new(|p| 1.0 - p[0]));
        assert!(d.at([0.5, 0.0, 0.0]).is_ok());
        assert!(matches!(d.at([2.0, 0.0, 0.0]), Err(RxdError::InvalidSpecies(_))));

        let nan = DiffusionCoefficient::Function(Arc::new(|_| f64::NAN));
        assert!(nan.at([0.0; 3]).is_err());
    }
}
