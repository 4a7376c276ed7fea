//! The trellis-convolution engine that turns a chemical formula into an
//! isotopologue distribution.
//!
//! Starting from a single `{mass: 0, abundance: 1}` state, the engine
//! convolves the running state set with each element's isotopes one atom at a
//! time, fusing states that land on the same mass, merging states closer than
//! the merge distance, and pruning to a bounded number of states so the
//! combinatorial growth stays under control.

use std::fmt;

use chemical_elements::ChemicalComposition;
use mzpeaks::coordinate::SimpleInterval;
use thiserror::Error;
use tracing::{debug, trace};

use crate::chem::{self, IsotopeSpec};
use crate::peaks::{AbundancePoint, IsotopeDistribution};
use crate::progress::ProgressToken;
use crate::render::{ContinuousSpectrum, RenderParams, SpectrumRenderer};

/// The default minimum resolvable mass gap between isotopologue states.
pub const DEFAULT_MERGE_DISTANCE: f64 = 0.1;

/// An error that might occur while computing an isotope distribution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistributionError {
    #[error("No known isotopes for element {0}")]
    NoKnownIsotopes(String),
}

/// A package of parameters controlling a distribution calculation
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DistributionParams {
    /// The number of states to keep after each convolution step. `0` keeps
    /// every state.
    pub max_states: usize,
    /// The minimum resolvable mass gap. Values `<= 0` are coerced to
    /// [`DEFAULT_MERGE_DISTANCE`]; a negative value additionally selects
    /// nominal mass numbers instead of real isotope masses.
    pub merge_distance: f64,
    /// The minimum abundance percentage a state must retain to survive the
    /// final filter.
    pub minimum_abundance: f64,
    /// Weight every isotope of an element equally instead of by natural
    /// abundance.
    pub uniform_isotopes: bool,
}

impl Default for DistributionParams {
    fn default() -> Self {
        Self {
            max_states: 0,
            merge_distance: DEFAULT_MERGE_DISTANCE,
            minimum_abundance: 0.0,
            uniform_isotopes: false,
        }
    }
}

impl DistributionParams {
    pub fn new(
        max_states: usize,
        merge_distance: f64,
        minimum_abundance: f64,
        uniform_isotopes: bool,
    ) -> Self {
        Self {
            max_states,
            merge_distance,
            minimum_abundance,
            uniform_isotopes,
        }
    }
}

/// Computes and holds an isotopologue distribution for a chemical formula.
///
/// The point collection is always sorted by mass with no two points closer
/// than the current merge distance after a completed
/// [`calculate`](IsotopeDistributionEngine::calculate). The rendered spectrum
/// and the average mass are cached and invalidated by any data change.
pub struct IsotopeDistributionEngine {
    points: IsotopeDistribution,
    merge_distance: f64,
    relative_abundance: f64,
    base_peak: Option<AbundancePoint>,
    average_mass: Option<f64>,
    spectrum: Option<(RenderParams, ContinuousSpectrum)>,
    progress: ProgressToken,
    on_progress: Option<Box<dyn Fn(u8) + Send>>,
}

impl fmt::Debug for IsotopeDistributionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsotopeDistributionEngine")
            .field("points", &self.points)
            .field("merge_distance", &self.merge_distance)
            .field("relative_abundance", &self.relative_abundance)
            .field("base_peak", &self.base_peak)
            .field("average_mass", &self.average_mass)
            .field("progress", &self.progress)
            .finish()
    }
}

impl Default for IsotopeDistributionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl IsotopeDistributionEngine {
    pub fn new() -> Self {
        Self {
            points: IsotopeDistribution::new(),
            merge_distance: DEFAULT_MERGE_DISTANCE,
            relative_abundance: 1.0,
            base_peak: None,
            average_mass: None,
            spectrum: None,
            progress: ProgressToken::new(),
            on_progress: None,
        }
    }

    pub fn with_merge_distance(merge_distance: f64) -> Self {
        let mut this = Self::new();
        this.set_merge_distance(merge_distance);
        this
    }

    /// The computed distribution.
    pub fn distribution(&self) -> &IsotopeDistribution {
        &self.points
    }

    /// Replace the distribution wholesale, e.g. with externally loaded
    /// samples.
    pub fn set_distribution(&mut self, points: IsotopeDistribution) {
        self.points = points;
        self.commit();
    }

    pub fn merge_distance(&self) -> f64 {
        self.merge_distance
    }

    /// Values `<= 0` are coerced to [`DEFAULT_MERGE_DISTANCE`].
    pub fn set_merge_distance(&mut self, merge_distance: f64) {
        self.merge_distance = if merge_distance <= 0.0 {
            DEFAULT_MERGE_DISTANCE
        } else {
            merge_distance
        };
        self.invalidate();
    }

    pub fn relative_abundance(&self) -> f64 {
        self.relative_abundance
    }

    pub fn set_relative_abundance(&mut self, relative_abundance: f64) {
        self.relative_abundance = relative_abundance;
    }

    /// A shared handle for cancelling the running calculation and observing
    /// its progress from another thread.
    pub fn progress_token(&self) -> ProgressToken {
        self.progress.clone()
    }

    /// Register an observer fired on every whole-percent progress change.
    pub fn set_progress_callback<F: Fn(u8) + Send + 'static>(&mut self, callback: F) {
        self.on_progress = Some(Box::new(callback));
    }

    /// The single most abundant point of the distribution.
    pub fn base_peak(&self) -> Option<&AbundancePoint> {
        self.base_peak.as_ref()
    }

    /// The abundance-weighted mean mass, cached across calls.
    pub fn average_mass(&self) -> Option<f64> {
        self.average_mass
    }

    pub fn total(&self) -> f64 {
        self.points.total()
    }

    fn invalidate(&mut self) {
        self.spectrum = None;
    }

    fn commit(&mut self) {
        self.base_peak = self.points.base_peak().copied();
        self.average_mass = self.points.average_mass();
        self.invalidate();
    }

    fn emit_progress(&self, done: usize, total: usize) {
        if self.progress.set_fraction(done, total) {
            if let Some(callback) = self.on_progress.as_ref() {
                callback(self.progress.percent());
            }
        }
    }

    /// Compute the isotopologue distribution of `formula`.
    ///
    /// Natural-element entries branch over their isotope sets one atom at a
    /// time; specific-isotope entries contribute a single deterministic mass
    /// shift per atom. After each convolution step the state set is merged at
    /// the configured merge distance and pruned to `max_states` survivors.
    ///
    /// Returns `Ok(true)` when the result was committed and `Ok(false)` when
    /// the calculation was cancelled, in which case the engine is left
    /// exactly as it was before the call. An element without any usable
    /// isotope aborts the whole calculation with
    /// [`DistributionError::NoKnownIsotopes`].
    pub fn calculate(
        &mut self,
        formula: &ChemicalComposition<'_>,
        params: DistributionParams,
    ) -> Result<bool, DistributionError> {
        let nominal = params.merge_distance < 0.0;
        let merge_distance = if params.merge_distance <= 0.0 {
            DEFAULT_MERGE_DISTANCE
        } else {
            params.merge_distance
        };
        self.progress.reset();

        let formula_entries = chem::entries(formula);
        let total_units: usize = formula_entries
            .iter()
            .map(|(_, count)| (*count).max(0) as usize)
            .sum();
        let mut done_units = 0usize;

        debug!(
            "Calculating distribution over {total_units} atoms, merge distance {merge_distance}"
        );

        let mut working =
            IsotopeDistribution::from_points(vec![AbundancePoint::new(0.0, 1.0, 0.0, 0.0)]);

        for (spec, count) in formula_entries {
            if count <= 0 {
                continue;
            }
            if spec.isotope == 0 {
                let isotopes = if params.uniform_isotopes {
                    chem::uniform_isotopes(spec.element)
                } else {
                    chem::natural_isotopes(spec.element)
                };
                if isotopes.is_empty() {
                    return Err(DistributionError::NoKnownIsotopes(
                        spec.element.symbol.clone(),
                    ));
                }
                for _ in 0..count {
                    working = match self.convolve_step(&working, &isotopes, nominal) {
                        Some(next) => next,
                        None => {
                            trace!("Calculation cancelled after {done_units}/{total_units} atoms");
                            return Ok(false);
                        }
                    };
                    working.merge_closer_than(merge_distance);
                    prune(&mut working, params.max_states);
                    done_units += 1;
                    self.emit_progress(done_units, total_units);
                }
            } else {
                let isotope_mass = chem::isotope_mass(&spec).ok_or_else(|| {
                    DistributionError::NoKnownIsotopes(format!(
                        "{}[{}]",
                        spec.element.symbol, spec.isotope
                    ))
                })?;
                if self.progress.is_cancelled() {
                    trace!("Calculation cancelled after {done_units}/{total_units} atoms");
                    return Ok(false);
                }
                let per_atom = if nominal {
                    spec.isotope as f64
                } else {
                    isotope_mass
                };
                working.shift_by(per_atom * count as f64);
                done_units += count as usize;
                self.emit_progress(done_units, total_units);
            }
        }

        let threshold = params.minimum_abundance / 100.0;
        if threshold > 0.0 {
            working.discard_below(threshold);
        }
        if let Some(base) = working.base_peak().copied() {
            if base.abundance > 0.0 {
                working.scale_by(1.0 / base.abundance);
            }
        }

        debug!("Committing {} states", working.len());
        self.points = working;
        self.merge_distance = merge_distance;
        self.commit();
        self.emit_progress(total_units, total_units);
        Ok(true)
    }

    /// Expand every current state by every isotope of the next atom, fusing
    /// states that land on the same mass. Returns `None` on cancellation.
    fn convolve_step(
        &self,
        working: &IsotopeDistribution,
        isotopes: &[IsotopeSpec],
        nominal: bool,
    ) -> Option<IsotopeDistribution> {
        let mut next = IsotopeDistribution::new();
        for point in working.iter() {
            for iso in isotopes.iter() {
                if self.progress.is_cancelled() {
                    return None;
                }
                let abundance = point.abundance * iso.weight;
                if abundance == 0.0 {
                    continue;
                }
                let mass = point.mass
                    + if nominal {
                        iso.mass_number as f64
                    } else {
                        iso.mass
                    };
                next.add(AbundancePoint::new(
                    mass,
                    abundance,
                    point.mass_variance,
                    point.abundance_variance,
                ));
            }
        }
        Some(next)
    }

    /// Re-merge the committed distribution at `distance`.
    pub fn merge(&mut self, distance: f64) {
        self.points.merge_closer_than(distance);
        self.commit();
    }

    /// Restrict the committed distribution to `interval` in place.
    pub fn clip_to_range(&mut self, interval: SimpleInterval<f64>) {
        self.points.clip(interval);
        self.commit();
    }

    /// A new distribution holding only the points inside `interval`.
    pub fn extract(&self, interval: SimpleInterval<f64>) -> IsotopeDistribution {
        self.points.extract(interval)
    }

    /// Fold another engine's distribution into this one, rescaling the
    /// incoming abundances by the ratio of the two relative-abundance scales,
    /// then re-merging at the current merge distance.
    pub fn merge_from(&mut self, other: &IsotopeDistributionEngine) {
        let factor = if self.relative_abundance > 0.0 && other.relative_abundance > 0.0 {
            other.relative_abundance / self.relative_abundance
        } else {
            1.0
        };
        for point in other.points.iter() {
            self.points.add(point.scaled_by(factor));
        }
        self.points.merge_closer_than(self.merge_distance);
        self.commit();
    }

    /// Remove the point at `index`, if present.
    pub fn remove_index(&mut self, index: usize) -> Option<AbundancePoint> {
        let removed = self.points.remove(index);
        if removed.is_some() {
            self.commit();
        }
        removed
    }

    /// Remove the point nearest `mass` within the merge distance, if present.
    pub fn remove_mass(&mut self, mass: f64) -> Option<AbundancePoint> {
        let removed = self.points.remove_nearest(mass, self.merge_distance);
        if removed.is_some() {
            self.commit();
        }
        removed
    }

    /// A display-oriented simplification of the distribution; the committed
    /// points are untouched.
    pub fn filter_to_resolution(&self, visible_resolution: f64) -> IsotopeDistribution {
        self.points.filter_to_resolution(visible_resolution)
    }

    /// Render the continuous spectrum for the committed distribution, caching
    /// the result until the data or the parameters change.
    pub fn spectrum(&mut self, params: RenderParams) -> &ContinuousSpectrum {
        let stale = match self.spectrum.as_ref() {
            Some((cached_params, _)) => *cached_params != params,
            None => true,
        };
        if stale {
            let rendered = SpectrumRenderer::new(params).render(&self.points, None, None);
            self.spectrum = Some((params, rendered));
        }
        &self.spectrum.as_ref().unwrap().1
    }
}

/// Keep the `max_states` most abundant states and normalize every survivor by
/// the highest abundance observed this step. `max_states == 0` keeps all
/// states.
///
/// The abundance comparator never reports equality, so states tied on
/// abundance fall wherever the unstable sort puts them.
fn prune(dist: &mut IsotopeDistribution, max_states: usize) {
    if dist.is_empty() {
        return;
    }
    if max_states == 0 || dist.len() <= max_states {
        let highest = dist.base_peak().map(|p| p.abundance).unwrap_or(1.0);
        if highest > 0.0 {
            dist.scale_by(1.0 / highest);
        }
        return;
    }
    let mut points: Vec<AbundancePoint> = dist.iter().copied().collect();
    points.sort_unstable_by(|a, b| b.abundance.total_cmp(&a.abundance));
    points.truncate(max_states);
    let highest = points[0].abundance;
    if highest > 0.0 {
        for p in points.iter_mut() {
            *p = p.scaled_by(1.0 / highest);
        }
    }
    *dist = IsotopeDistribution::from_points(points);
}
