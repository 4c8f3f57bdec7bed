//! Reaction shapes
//!
//! | Shape | Contributes |
//! |---|---|
//! | [`Rate`] | `d[s]/dt += expr` |
//! | [`Reaction`] | `rate = kf·Π[lhs]^ν − kb·Π[rhs]^ν`, reactants `−ν·rate`, products `+ν·rate` |
//! | [`MultiCompartmentReaction`] | same rate in molecules/µm²/ms across a membrane region |

use crate::arena::Handle;
use crate::error::{Result, RxdError};
use crate::region::RegionId;
use crate::species::SpeciesId;

use super::expr::{Expr, SpeciesRef};

pub type ReactionId = Handle<Kinetics>;

/// Stoichiometry list with repeated species merged
pub type Side = Vec<(SpeciesRef, u32)>;

fn merge<S: Into<SpeciesRef>>(side: impl IntoIterator<Item = (S, u32)>) -> Side {
    let mut merged: Side = Vec::new();
    for (species, count) in side {
        let species = species.into();
        match merged.iter_mut().find(|(s, _)| *s == species) {
            Some((_, total)) => *total += count,
            None => merged.push((species, count)),
        }
    }
    merged.retain(|(_, count)| *count > 0);
    merged
}

/// Mass-action product `k · Π [s]^ν`
pub(crate) fn mass_action(k: &Expr, side: &Side) -> Expr {
    side.iter().fold(k.clone(), |acc, (species, count)| match count {
        1 => acc * Expr::Species(*species),
        n => acc * Expr::Species(*species).pow(*n as f64),
    })
}

/// Net change of each species per unit rate
pub(crate) fn net_stoichiometry(lhs: &Side, rhs: &Side) -> Vec<(SpeciesRef, f64)> {
    let mut net: Vec<(SpeciesRef, f64)> = Vec::new();
    let changes = lhs.iter().map(|(s, n)| (*s, -(*n as f64))).chain(rhs.iter().map(|(s, n)| (*s, *n as f64)));
    for (species, change) in changes {
        match net.iter_mut().find(|(s, _)| *s == species) {
            Some((_, total)) => *total += change,
            None => net.push((species, change)),
        }
    }
    net.retain(|(_, change)| *change != 0.0);
    net
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rate {
    pub species: SpeciesRef,
    pub rate: Expr,
    pub regions: Option<Vec<RegionId>>,
    /// The rate also drives a transmembrane current on the species' ion
    pub membrane_flux: bool,
}

impl Rate {
    pub fn new(species: impl Into<SpeciesRef>, rate: impl Into<Expr>) -> Self {
        Self { species: species.into(), rate: rate.into(), regions: None, membrane_flux: false }
    }

    pub fn on_regions(mut self, regions: Vec<RegionId>) -> Self {
        self.regions = Some(regions);
        self
    }

    pub fn with_membrane_flux(mut self) -> Self {
        self.membrane_flux = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reaction {
    pub lhs: Side,
    pub rhs: Side,
    pub kf: Expr,
    pub kb: Option<Expr>,
    pub regions: Option<Vec<RegionId>>,
    /// `kf` and `kb` are full rates instead of mass-action constants
    pub custom_dynamics: bool,
}

impl Reaction {
    pub fn new<L, R>(
        lhs: impl IntoIterator<Item = (L, u32)>,
        rhs: impl IntoIterator<Item = (R, u32)>,
        kf: impl Into<Expr>,
    ) -> Self
    where
        L: Into<SpeciesRef>,
        R: Into<SpeciesRef>,
    {
        Self { lhs: merge(lhs), rhs: merge(rhs), kf: kf.into(), kb: None, regions: None, custom_dynamics: false }
    }

    pub fn with_backward(mut self, kb: impl Into<Expr>) -> Self {
        self.kb = Some(kb.into());
        self
    }

    pub fn on_regions(mut self, regions: Vec<RegionId>) -> Self {
        self.regions = Some(regions);
        self
    }

    pub fn custom_dynamics(mut self) -> Self {
        self.custom_dynamics = true;
        self
    }

    /// Net rate expression
    pub fn rate(&self) -> Expr {
        rate_expression(&self.lhs, &self.rhs, &self.kf, self.kb.as_ref(), self.custom_dynamics)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiCompartmentReaction {
    pub lhs: Side,
    pub rhs: Side,
    pub kf: Expr,
    pub kb: Option<Expr>,
    pub membrane: RegionId,
    pub membrane_flux: bool,
    /// Rate is per membrane area (molecules/µm²/ms) rather than a concentration rate
    pub scale_by_area: bool,
    pub custom_dynamics: bool,
}

impl MultiCompartmentReaction {
    pub fn new<L, R>(
        lhs: impl IntoIterator<Item = (L, u32)>,
        rhs: impl IntoIterator<Item = (R, u32)>,
        kf: impl Into<Expr>,
        membrane: RegionId,
    ) -> Self
    where
        L: Into<SpeciesRef>,
        R: Into<SpeciesRef>,
    {
        Self {
            lhs: merge(lhs),
            rhs: merge(rhs),
            kf: kf.into(),
            kb: None,
            membrane,
            membrane_flux: false,
            scale_by_area: true,
            custom_dynamics: false,
        }
    }

    pub fn with_backward(mut self, kb: impl Into<Expr>) -> Self {
        self.kb = Some(kb.into());
        self
    }

    pub fn with_membrane_flux(mut self) -> Self {
        self.membrane_flux = true;
        self
    }

    pub fn without_area_scaling(mut self) -> Self {
        self.scale_by_area = false;
        self
    }

    pub fn custom_dynamics(mut self) -> Self {
        self.custom_dynamics = true;
        self
    }

    pub fn rate(&self) -> Expr {
        rate_expression(&self.lhs, &self.rhs, &self.kf, self.kb.as_ref(), self.custom_dynamics)
    }
}

fn rate_expression(lhs: &Side, rhs: &Side, kf: &Expr, kb: Option<&Expr>, custom: bool) -> Expr {
    let forward = if custom { kf.clone() } else { mass_action(kf, lhs) };
    match kb {
        Some(kb) if custom => forward - kb.clone(),
        Some(kb) => forward - mass_action(kb, rhs),
        None => forward,
    }
}

/// Any kinetic scheme the compiler understands
#[derive(Debug, Clone, PartialEq)]
pub enum Kinetics {
    Rate(Rate),
    Reaction(Reaction),
    MultiCompartment(MultiCompartmentReaction),
}

impl Kinetics {
    /// Check the scheme on its own, without looking at species or regions
    pub fn validate(&self) -> Result<()> {
        match self {
            Kinetics::Rate(rate) => rate.rate.validate(),
            Kinetics::Reaction(Reaction { lhs, rhs, kf, kb, regions, .. }) => {
                if lhs.is_empty() && rhs.is_empty() {
                    return Err(RxdError::InvalidReaction("reaction has no reactants and no products".into()));
                }
                if regions.as_ref().is_some_and(|r| r.is_empty()) {
                    return Err(RxdError::InvalidReaction("empty region restriction".into()));
                }
                kf.validate()?;
                kb.as_ref().map_or(Ok(()), Expr::validate)
            }
            Kinetics::MultiCompartment(mcr) => {
                if mcr.lhs.is_empty() && mcr.rhs.is_empty() {
                    return Err(RxdError::InvalidReaction("reaction has no reactants and no products".into()));
                }
                if let Some((species, _)) = mcr.lhs.iter().chain(&mcr.rhs).find(|(s, _)| s.region.is_none()) {
                    return Err(RxdError::InvalidReaction(format!(
                        "multi-compartment reaction species {:?} must name its region",
                        species.species
                    )));
                }
                mcr.kf.validate()?;
                mcr.kb.as_ref().map_or(Ok(()), Expr::validate)
            }
        }
    }

    /// Every species the scheme reads or changes
    pub fn species(&self) -> Vec<SpeciesId> {
        let (mut refs, sides): (Vec<SpeciesRef>, Vec<&Side>) = match self {
            Kinetics::Rate(rate) => {
                let mut refs = rate.rate.species_refs();
                refs.push(rate.species);
                (refs, Vec::new())
            }
            Kinetics::Reaction(reaction) => (reaction.rate().species_refs(), vec![&reaction.lhs, &reaction.rhs]),
            Kinetics::MultiCompartment(mcr) => (mcr.rate().species_refs(), vec![&mcr.lhs, &mcr.rhs]),
        };
        refs.extend(sides.into_iter().flatten().map(|(s, _)| *s));
        let mut species: Vec<SpeciesId> = refs.into_iter().map(|r| r.species).collect();
        species.sort();
        species.dedup();
        species
    }

    pub fn membrane_flux(&self) -> bool {
        match self {
            Kinetics::Rate(rate) => rate.membrane_flux,
            Kinetics::Reaction(_) => false,
            Kinetics::MultiCompartment(mcr) => mcr.membrane_flux,
        }
    }
}

impl From<Rate> for Kinetics {
    fn from(rate: Rate) -> Self {
        Kinetics::Rate(rate)
    }
}

impl From<Reaction> for Kinetics {
    fn from(reaction: Reaction) -> Self {
        Kinetics::Reaction(reaction)
    }
}

impl From<MultiCompartmentReaction> for Kinetics {
    fn from(reaction: MultiCompartmentReaction) -> Self {
        Kinetics::MultiCompartment(reaction)
    }
}
