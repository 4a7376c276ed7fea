//! Conversion of discrete isotopologue distributions into continuous,
//! instrument-resolution-broadened intensity curves.
//!
//! Each distribution point is broadened into a Gaussian whose width combines
//! the instrumental peak width at that mass with the point's own mass
//! variance in quadrature. Samples are taken on an adaptive grid over a
//! sliding 4σ active set, with explicit zero samples bounding every non-zero
//! region so sparse spectra stay compact.

use itertools::{Itertools, MinMaxResult};
use mzpeaks::coordinate::{SimpleInterval, Span1D};
use tracing::{debug, trace};

use crate::peaks::{AbundancePoint, IsotopeDistribution};

/// `0.5 / sqrt(2 ln 2)`, the coefficient converting a full width at half
/// maximum into a Gaussian standard deviation.
pub const FWHM_TO_SIGMA: f64 = 0.42466090014400953;

/// `sqrt(2 π)`
const SQRT_TAU: f64 = 2.5066282746310002;

/// One stored sample of a continuous spectrum
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpectrumSample {
    pub mass: f64,
    pub intensity: f64,
}

impl SpectrumSample {
    #[inline]
    pub fn new(mass: f64, intensity: f64) -> Self {
        Self { mass, intensity }
    }
}

/// A package of parameters controlling spectrum rendering
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RenderParams {
    /// The resolving power `mass / Δmass` governing instrumental broadening
    pub effective_resolution: f64,
    /// The sample step size. `None` derives `0.2 ×` the minimal peak width.
    pub step: Option<f64>,
    /// Divide the finished curve by an estimate of the tallest true peak
    /// height so the tallest peak reads as `1.0`.
    pub normalise: bool,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            effective_resolution: 10_000.0,
            step: None,
            normalise: true,
        }
    }
}

impl RenderParams {
    pub fn new(effective_resolution: f64, step: Option<f64>, normalise: bool) -> Self {
        Self {
            effective_resolution,
            step,
            normalise,
        }
    }
}

/// A mass-ordered, mass-unique mapping from sample mass to intensity.
///
/// Samples increase monotonically in mass and every non-zero region is
/// bounded on both sides by explicit zero-intensity samples, so area and
/// interpolation over the stored points alone are well-defined. Derived
/// spectra are new objects.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ContinuousSpectrum {
    samples: Vec<SpectrumSample>,
    /// The resolving power `mass / Δmass` the curve was rendered at
    pub effective_resolution: f64,
    /// The formula this spectrum was rendered from, when known
    pub source_formula: Option<String>,
    /// The scale relating stored relative intensities to absolute ones
    pub relative_abundance: f64,
    average_step: f64,
}

impl ContinuousSpectrum {
    pub fn new(mut samples: Vec<SpectrumSample>, effective_resolution: f64) -> Self {
        samples.sort_unstable_by(|a, b| a.mass.total_cmp(&b.mass));
        samples.dedup_by(|b, a| {
            if a.mass.total_cmp(&b.mass) == std::cmp::Ordering::Equal {
                a.intensity = a.intensity.max(b.intensity);
                true
            } else {
                false
            }
        });
        let average_step = if samples.len() > 1 {
            (samples.last().unwrap().mass - samples.first().unwrap().mass)
                / (samples.len() - 1) as f64
        } else {
            0.0
        };
        Self {
            samples,
            effective_resolution,
            source_formula: None,
            relative_abundance: 1.0,
            average_step,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SpectrumSample> {
        self.samples.iter()
    }

    pub fn as_slice(&self) -> &[SpectrumSample] {
        &self.samples
    }

    pub fn min_mass(&self) -> Option<f64> {
        self.samples.first().map(|s| s.mass)
    }

    pub fn max_mass(&self) -> Option<f64> {
        self.samples.last().map(|s| s.mass)
    }

    /// The sum of all stored intensities.
    pub fn total(&self) -> f64 {
        self.samples.iter().map(|s| s.intensity).sum()
    }

    /// The single most intense stored sample.
    pub fn base_sample(&self) -> Option<&SpectrumSample> {
        self.samples
            .iter()
            .max_by(|a, b| a.intensity.total_cmp(&b.intensity))
    }

    /// The reciprocal of the sum of all stored intensities, or `0` for an
    /// empty or all-zero spectrum.
    pub fn normalising_constant(&self) -> f64 {
        let total = self.total();
        if total > 0.0 {
            1.0 / total
        } else {
            0.0
        }
    }

    /// Linear interpolation between the floor and ceiling stored samples.
    ///
    /// The interpolation fraction divides by the global average step size
    /// rather than the true local gap, reproducing a legacy approximation.
    /// An exact stored mass returns that sample's value exactly; masses
    /// outside the stored range return `0`.
    pub fn interpolated_abundance(&self, mass: f64) -> f64 {
        match self
            .samples
            .binary_search_by(|s| s.mass.total_cmp(&mass))
        {
            Ok(i) => self.samples[i].intensity,
            Err(i) => {
                if i == 0 || i >= self.samples.len() {
                    return 0.0;
                }
                let floor = &self.samples[i - 1];
                let ceil = &self.samples[i];
                if self.average_step <= 0.0 {
                    return floor.intensity;
                }
                let fraction = (mass - floor.mass) / self.average_step;
                floor.intensity + (ceil.intensity - floor.intensity) * fraction
            }
        }
    }

    /// The minimum and maximum stored intensity over masses in `[lo, hi)`.
    pub fn abundance_range_between(&self, lo: f64, hi: f64) -> Option<(f64, f64)> {
        let start = self.samples.partition_point(|s| s.mass < lo);
        let end = self.samples.partition_point(|s| s.mass < hi);
        match self.samples[start..end]
            .iter()
            .map(|s| s.intensity)
            .minmax_by(|a, b| a.total_cmp(b))
        {
            MinMaxResult::NoElements => None,
            MinMaxResult::OneElement(v) => Some((v, v)),
            MinMaxResult::MinMax(low, high) => Some((low, high)),
        }
    }

    /// The scale factor to apply to this spectrum's intensities to best match
    /// `other` over the domain intersection, weighting each sample by the
    /// geometric mean of the paired intensities so mutually significant peaks
    /// dominate the fit. Returns `1` when the intersection is empty or the
    /// weighted sum is zero.
    pub fn best_fit_scale(&self, other: &ContinuousSpectrum) -> f64 {
        let (lo, hi) = match (
            self.min_mass(),
            self.max_mass(),
            other.min_mass(),
            other.max_mass(),
        ) {
            (Some(a0), Some(a1), Some(b0), Some(b1)) => (a0.max(b0), a1.min(b1)),
            _ => return 1.0,
        };
        if lo > hi {
            return 1.0;
        }
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        let start = self.samples.partition_point(|s| s.mass < lo);
        let end = self.samples.partition_point(|s| s.mass <= hi);
        for s in &self.samples[start..end] {
            let paired = other.interpolated_abundance(s.mass);
            let weight = (s.intensity * paired).sqrt();
            numerator += weight * s.intensity * paired;
            denominator += weight * s.intensity * s.intensity;
        }
        if denominator > 0.0 {
            numerator / denominator
        } else {
            1.0
        }
    }

    /// Restrict the spectrum to `interval` in place.
    pub fn clip(&mut self, interval: SimpleInterval<f64>) {
        self.samples.retain(|s| interval.contains(&s.mass));
    }

    /// A new spectrum holding only the samples inside `interval`.
    pub fn extract(&self, interval: SimpleInterval<f64>) -> Self {
        let mut out = Self::new(
            self.samples
                .iter()
                .filter(|s| interval.contains(&s.mass))
                .copied()
                .collect(),
            self.effective_resolution,
        );
        out.source_formula = self.source_formula.clone();
        out.relative_abundance = self.relative_abundance;
        out
    }

    fn scale_intensities(&mut self, factor: f64) {
        for s in self.samples.iter_mut() {
            s.intensity *= factor;
        }
    }
}

/// A distribution point broadened to a Gaussian at a given resolving power.
#[derive(Debug, Clone, Copy)]
struct BroadenedPeak {
    mass: f64,
    abundance: f64,
    sigma: f64,
    /// `σ sqrt(2π)`, the Gaussian normalization constant
    norm: f64,
    enter: f64,
    leave: f64,
}

impl BroadenedPeak {
    fn new(point: &AbundancePoint, effective_resolution: f64) -> Self {
        let width = instrumental_width(point.mass, effective_resolution);
        let sigma = (point.mass_variance + width * width).sqrt().max(1e-12);
        Self {
            mass: point.mass,
            abundance: point.abundance,
            sigma,
            norm: sigma * SQRT_TAU,
            enter: point.mass - 4.0 * sigma,
            leave: point.mass + 4.0 * sigma,
        }
    }

    /// The Gaussian contribution at `x`, linearly tapered from full value at
    /// 3σ down to zero at 4σ so hard truncation never leaves a step in the
    /// curve.
    fn evaluate(&self, x: f64) -> f64 {
        let distance = (x - self.mass).abs();
        if distance >= 4.0 * self.sigma {
            return 0.0;
        }
        let gaussian =
            self.abundance * (-(distance * distance) / (2.0 * self.sigma * self.sigma)).exp()
                / self.norm;
        if distance > 3.0 * self.sigma {
            gaussian * ((4.0 * self.sigma - distance) / self.sigma)
        } else {
            gaussian
        }
    }
}

#[inline]
fn instrumental_width(mass: f64, effective_resolution: f64) -> f64 {
    mass / effective_resolution * FWHM_TO_SIGMA
}

fn profile_value(peaks: &[BroadenedPeak], total: f64, x: f64) -> f64 {
    peaks.iter().map(|p| p.evaluate(x)).sum::<f64>() / total
}

/// Renders an [`IsotopeDistribution`] into a [`ContinuousSpectrum`] on an
/// adaptive grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpectrumRenderer {
    pub params: RenderParams,
}

impl SpectrumRenderer {
    pub fn new(params: RenderParams) -> Self {
        Self { params }
    }

    /// Render `distribution` over `mass_range`, or over the distribution's
    /// own padded extent when no range is given.
    ///
    /// When `reference` is supplied, any extremum the reference recorded
    /// within the trailing step window that falls outside the band between
    /// the previous and current samples is reinserted at the 1/4 and 3/4
    /// step offsets, so re-rendering at a coarser step keeps peaks a denser
    /// render made visible.
    pub fn render(
        &self,
        distribution: &IsotopeDistribution,
        reference: Option<&ContinuousSpectrum>,
        mass_range: Option<SimpleInterval<f64>>,
    ) -> ContinuousSpectrum {
        let resolution = self.params.effective_resolution;
        if distribution.is_empty() {
            return ContinuousSpectrum::new(Vec::new(), resolution);
        }

        let peaks: Vec<BroadenedPeak> = distribution
            .iter()
            .map(|p| BroadenedPeak::new(p, resolution))
            .collect();
        let total = distribution.total().max(f64::MIN_POSITIVE);

        let minimal_width = distribution
            .iter()
            .map(|p| instrumental_width(p.mass, resolution))
            .fold(f64::INFINITY, f64::min);
        let largest_variance = distribution
            .iter()
            .map(|p| p.mass_variance)
            .fold(0.0, f64::max);

        let (start, end) = match mass_range {
            Some(iv) => (iv.start, iv.end),
            None => {
                let padding = 4.0 * (largest_variance.sqrt() + minimal_width);
                (
                    distribution.min_mass().unwrap_or_default() - padding,
                    distribution.max_mass().unwrap_or_default() + padding,
                )
            }
        };
        let mut step = self.params.step.unwrap_or(0.2 * minimal_width);
        if !(step > 0.0) {
            step = 0.001;
        }
        trace!("Rendering over [{start}, {end}] at step {step}");

        // peaks enter the active set ordered by their lower 4σ bound
        let mut entry_order: Vec<usize> = (0..peaks.len()).collect();
        entry_order.sort_unstable_by(|a, b| peaks[*a].enter.total_cmp(&peaks[*b].enter));
        let mut pending = entry_order.into_iter().peekable();
        let mut active: Vec<BroadenedPeak> = Vec::new();

        let mut samples: Vec<SpectrumSample> = Vec::new();
        let mut previous_mass = start;
        let mut previous_value = 0.0f64;

        let mut index = 0usize;
        loop {
            let x = start + step * index as f64;
            if x > end + step * 0.5 {
                break;
            }
            index += 1;

            while let Some(i) = pending.peek().copied() {
                if peaks[i].enter <= x {
                    active.push(peaks[i]);
                    pending.next();
                } else {
                    break;
                }
            }
            active.retain(|p| p.leave >= x);

            let value = active.iter().map(|p| p.evaluate(x)).sum::<f64>() / total;

            if let Some(reference) = reference {
                if let Some((low, high)) = reference.abundance_range_between(x - step, x) {
                    let band_low = previous_value.min(value);
                    let band_high = previous_value.max(value);
                    if high > band_high {
                        samples.push(SpectrumSample::new(x - 0.75 * step, high));
                        samples.push(SpectrumSample::new(x - 0.25 * step, high));
                    } else if low < band_low {
                        samples.push(SpectrumSample::new(x - 0.75 * step, low));
                        samples.push(SpectrumSample::new(x - 0.25 * step, low));
                    }
                }
            }

            if value != 0.0 {
                if previous_value == 0.0 && x > start {
                    // opening boundary of a non-zero region
                    samples.push(SpectrumSample::new(previous_mass, 0.0));
                }
                samples.push(SpectrumSample::new(x, value));
            } else if previous_value != 0.0 {
                // closing boundary of a non-zero region
                samples.push(SpectrumSample::new(x, 0.0));
            }

            previous_mass = x;
            previous_value = value;
        }

        debug!("Rendered {} samples from {} states", samples.len(), peaks.len());
        let mut spectrum = ContinuousSpectrum::new(samples, resolution);
        if self.params.normalise {
            let height = self.peak_height_estimate(distribution, &peaks, total);
            if height > 0.0 {
                spectrum.scale_intensities(1.0 / height);
            }
        }
        spectrum
    }

    /// Estimate the tallest true peak height: merge a copy of the
    /// distribution into isotope clusters at a quarter of the instrumental
    /// peak width, then evaluate the full profile at each of the five most
    /// abundant cluster centroids and keep the largest value. The adaptive
    /// grid rarely lands exactly on a peak's maximum, so the grid maximum
    /// alone would understate it.
    fn peak_height_estimate(
        &self,
        distribution: &IsotopeDistribution,
        peaks: &[BroadenedPeak],
        total: f64,
    ) -> f64 {
        let pivot = distribution.average_mass().unwrap_or_default();
        let mut clusters = distribution.clone();
        clusters.merge_closer_than(pivot / self.params.effective_resolution * 0.25);

        let mut centroids: Vec<AbundancePoint> = clusters.iter().copied().collect();
        centroids.sort_unstable_by(|a, b| b.abundance.total_cmp(&a.abundance));
        centroids
            .iter()
            .take(5)
            .map(|c| profile_value(peaks, total, c.mass))
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod test {
    use chemical_elements::{ChemicalComposition, ElementSpecification};

    use super::*;
    use crate::distribution::{DistributionParams, IsotopeDistributionEngine};

    macro_rules! assert_is_close {
        ($t1:expr, $t2:expr, $tol:expr, $label:literal) => {
            assert!(
                ($t1 - $t2).abs() < $tol,
                "Observed {} {}, expected {}, difference {}",
                $label,
                $t1,
                $t2,
                $t1 - $t2,
            );
        };
    }

    fn water_distribution() -> IsotopeDistribution {
        let mut formula = ChemicalComposition::new();
        formula.set(ElementSpecification::parse("H").unwrap(), 2);
        formula.set(ElementSpecification::parse("O").unwrap(), 1);
        let mut engine = IsotopeDistributionEngine::new();
        engine
            .calculate(&formula, DistributionParams::default())
            .unwrap();
        engine.distribution().clone()
    }

    #[test_log::test]
    fn test_render_water() {
        let distribution = water_distribution();
        // effective resolution such that Δmass = 0.1 at the monoisotopic peak
        let resolution = 18.011 / 0.1;
        let renderer = SpectrumRenderer::new(RenderParams::new(resolution, None, true));
        let spectrum = renderer.render(&distribution, None, None);
        assert!(!spectrum.is_empty());

        let step = 0.2 * instrumental_width(distribution.min_mass().unwrap(), resolution);
        let base = spectrum.base_sample().copied().unwrap();
        assert_is_close!(base.mass, 18.011, step + 0.01, "base sample mass");
        assert_is_close!(base.intensity, 1.0, 0.01, "normalized base intensity");

        // monotone masses, zero-bounded regions
        assert!(spectrum
            .as_slice()
            .windows(2)
            .all(|w| w[0].mass < w[1].mass));
        assert_eq!(spectrum.as_slice().first().unwrap().intensity, 0.0);
        assert_eq!(spectrum.as_slice().last().unwrap().intensity, 0.0);
    }

    #[test]
    fn test_interpolation_is_exact_at_stored_samples() {
        let distribution = water_distribution();
        let renderer = SpectrumRenderer::new(RenderParams::new(18.011 / 0.1, None, true));
        let spectrum = renderer.render(&distribution, None, None);
        for s in spectrum.iter().step_by(7) {
            assert_eq!(spectrum.interpolated_abundance(s.mass), s.intensity);
        }
        assert_eq!(
            spectrum.interpolated_abundance(spectrum.min_mass().unwrap() - 1.0),
            0.0
        );
        assert_eq!(
            spectrum.interpolated_abundance(spectrum.max_mass().unwrap() + 1.0),
            0.0
        );
    }

    #[test]
    fn test_zero_boundaries_are_explicit() {
        // two far-apart sticks leave a zero gap that must be bounded on both sides
        let distribution = IsotopeDistribution::from_points(vec![
            AbundancePoint::new(100.0, 1.0, 0.0, 0.0),
            AbundancePoint::new(200.0, 1.0, 0.0, 0.0),
        ]);
        let renderer = SpectrumRenderer::new(RenderParams::new(10_000.0, None, false));
        let spectrum = renderer.render(&distribution, None, None);
        let slice = spectrum.as_slice();
        for w in slice.windows(2) {
            if w[0].intensity == 0.0 && w[1].intensity == 0.0 {
                // inside a zero run nothing is stored, so consecutive zero
                // samples must be region boundaries, not grid neighbors
                assert!(w[1].mass - w[0].mass > 1.0);
            }
        }
        // far fewer samples than the dense grid over [100, 200] would hold
        assert!(spectrum.len() < 2_000);
    }

    #[test]
    fn test_reference_extrema_are_preserved() {
        let distribution = IsotopeDistribution::from_points(vec![AbundancePoint::new(
            100.0, 1.0, 0.0, 0.0,
        )]);
        let fine = SpectrumRenderer::new(RenderParams::new(10_000.0, None, false))
            .render(&distribution, None, None);
        let peak = fine.base_sample().copied().unwrap();

        // a step far coarser than the peak width, on a grid that never lands
        // on the peak, would miss it entirely without the reference
        let coarse = SpectrumRenderer::new(RenderParams::new(10_000.0, Some(0.5), false)).render(
            &distribution,
            Some(&fine),
            Some(SimpleInterval::new(99.1, 101.1)),
        );
        let recovered = coarse.base_sample().copied().unwrap();
        assert_is_close!(recovered.intensity, peak.intensity, 1e-12, "recovered extremum");
    }

    #[test]
    fn test_best_fit_scale() {
        let distribution = water_distribution();
        let renderer = SpectrumRenderer::new(RenderParams::new(18.011 / 0.1, None, true));
        let spectrum = renderer.render(&distribution, None, None);
        let mut doubled = spectrum.clone();
        doubled.scale_intensities(2.0);
        assert_is_close!(spectrum.best_fit_scale(&doubled), 2.0, 1e-9, "scale");
        assert_is_close!(doubled.best_fit_scale(&spectrum), 0.5, 1e-9, "inverse scale");

        let empty = ContinuousSpectrum::default();
        assert_eq!(spectrum.best_fit_scale(&empty), 1.0);
    }

    #[test]
    fn test_clip_and_extract() {
        let distribution = water_distribution();
        let renderer = SpectrumRenderer::new(RenderParams::new(18.011 / 0.1, None, true));
        let spectrum = renderer.render(&distribution, None, None);
        let iv = SimpleInterval::new(17.5, 18.5);
        let sub = spectrum.extract(iv);
        assert!(!sub.is_empty());
        assert!(sub.min_mass().unwrap() >= 17.5);
        assert!(sub.max_mass().unwrap() <= 18.5);

        let mut clipped = spectrum.clone();
        clipped.clip(iv);
        assert_eq!(clipped.len(), sub.len());
    }
}
