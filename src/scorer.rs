//! Similarity scoring between continuous spectra and identification of
//! observed spectra against constrained formula searches.

use chemical_elements::ChemicalComposition;
use tracing::debug;

use crate::distribution::{DistributionParams, IsotopeDistributionEngine};
use crate::render::{ContinuousSpectrum, RenderParams, SpectrumRenderer};
use crate::search::CompositionSearch;

pub type ScoreType = f64;

/// A Bhattacharyya-style log distance between two spectra.
///
/// Both spectra are treated as probability densities over their domain
/// intersection and the distance is `-ln Σ sqrt(iA · iB · c)` where `c`
/// normalizes by the two spectra's totals. Identical spectra score `0`,
/// diverging spectra grow without bound, and spectra with no overlap at
/// all score infinite.
pub fn distance(a: &ContinuousSpectrum, b: &ContinuousSpectrum) -> ScoreType {
    if a.is_empty() || b.is_empty() {
        return ScoreType::INFINITY;
    }
    let cross = a.normalising_constant() * b.normalising_constant();
    if cross <= 0.0 {
        return ScoreType::INFINITY;
    }

    // iterate the more densely sampled spectrum so no feature of either
    // side falls between evaluation points
    let (dense, sparse) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let lo = match (dense.min_mass(), sparse.min_mass()) {
        (Some(x), Some(y)) => x.max(y),
        _ => return ScoreType::INFINITY,
    };
    let hi = match (dense.max_mass(), sparse.max_mass()) {
        (Some(x), Some(y)) => x.min(y),
        _ => return ScoreType::INFINITY,
    };
    if lo > hi {
        return ScoreType::INFINITY;
    }

    let mut overlap = 0.0;
    for sample in dense.iter() {
        if sample.mass < lo || sample.mass > hi {
            continue;
        }
        let paired = sparse.interpolated_abundance(sample.mass);
        overlap += (sample.intensity * paired * cross).sqrt();
    }
    if overlap <= 0.0 {
        return ScoreType::INFINITY;
    }
    -overlap.ln()
}

/// A candidate formula with its distance to an observed spectrum
#[derive(Debug, Clone)]
pub struct IdentifyMatch<'a> {
    pub formula: ChemicalComposition<'a>,
    pub score: ScoreType,
}

const IDENTIFY_MAX_STATES: usize = 500;

/// Score every formula a search enumerates against `observed` and keep the
/// closest one, if the search produced any candidates at all.
///
/// Each candidate distribution is rendered at the observed spectrum's own
/// resolving power before scoring so the comparison is like against like.
pub fn best_match<'a>(
    observed: &ContinuousSpectrum,
    search: &CompositionSearch<'a>,
) -> Option<IdentifyMatch<'a>> {
    let params = DistributionParams {
        max_states: IDENTIFY_MAX_STATES,
        ..Default::default()
    };
    let render_params = RenderParams::new(observed.effective_resolution, None, false);
    let renderer = SpectrumRenderer::new(render_params);

    let mut engine = IsotopeDistributionEngine::new();
    let mut best: Option<IdentifyMatch<'a>> = None;
    for formula in search.enumerate() {
        match engine.calculate(&formula, params) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                debug!("Skipping candidate {formula:?}: {e}");
                continue;
            }
        }
        let rendered = renderer.render(engine.distribution(), None, None);
        let score = distance(observed, &rendered);
        if best.as_ref().map(|b| score < b.score).unwrap_or(true) {
            best = Some(IdentifyMatch { formula, score });
        }
    }
    if let Some(b) = best.as_ref() {
        debug!("Best match {:?} at distance {}", b.formula, b.score);
    }
    best
}

/// Run every search independently against `observed`, one result slot per
/// search. No attempt is made to reconcile the per-search winners into a
/// single joint assignment, so when searches overlap the caller must choose
/// between the returned candidates itself.
pub fn identify<'a>(
    observed: &ContinuousSpectrum,
    searches: &[CompositionSearch<'a>],
) -> Vec<Option<IdentifyMatch<'a>>> {
    searches
        .iter()
        .map(|search| best_match(observed, search))
        .collect()
}

/// Collapse per-search results into a single pick by taking the first search
/// that produced any match at all.
///
/// The choice is deliberately arbitrary: overlapping searches are scored
/// independently and nothing here weighs one search's winner against
/// another's, so the caller should prefer the per-search results when the
/// searches are not mutually exclusive.
pub fn combined_pick<'m, 'a>(
    matches: &'m [Option<IdentifyMatch<'a>>],
) -> Option<&'m IdentifyMatch<'a>> {
    matches.iter().flatten().next()
}
