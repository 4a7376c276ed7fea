//! Thin helpers over the `chemical_elements` reference data.
//!
//! The periodic table and the composition type are consumed as-is; this
//! module only derives the per-element isotope tables and mass summaries the
//! rest of the crate needs.

use chemical_elements::{ChemicalComposition, Element, ElementSpecification};

/// One isotope of an element as the convolution engine consumes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsotopeSpec {
    /// The nucleon count, e.g. 13 for C[13]
    pub mass_number: u16,
    /// The isotope's mass in atomic mass units
    pub mass: f64,
    /// The convolution weight, either the natural abundance or a uniform 1/N
    pub weight: f64,
}

/// The naturally occurring isotopes of `element`, weighted by abundance and
/// ordered by mass number.
pub fn natural_isotopes(element: &Element) -> Vec<IsotopeSpec> {
    let mut isotopes: Vec<IsotopeSpec> = element
        .isotopes
        .iter()
        .filter(|(_, iso)| iso.abundance > 0.0)
        .map(|(mass_number, iso)| IsotopeSpec {
            mass_number: *mass_number,
            mass: iso.mass,
            weight: iso.abundance,
        })
        .collect();
    isotopes.sort_unstable_by_key(|i| i.mass_number);
    isotopes
}

/// Every known isotope of `element` with a uniform `1/N` weight, ordered by
/// mass number.
pub fn uniform_isotopes(element: &Element) -> Vec<IsotopeSpec> {
    let n = element.isotopes.len();
    if n == 0 {
        return Vec::new();
    }
    let weight = 1.0 / n as f64;
    let mut isotopes: Vec<IsotopeSpec> = element
        .isotopes
        .iter()
        .map(|(mass_number, iso)| IsotopeSpec {
            mass_number: *mass_number,
            mass: iso.mass,
            weight,
        })
        .collect();
    isotopes.sort_unstable_by_key(|i| i.mass_number);
    isotopes
}

/// The entries of a composition as owned pairs, for callers that need to walk
/// a formula more than once.
pub fn entries<'transient, 'lifespan: 'transient>(
    formula: &'transient ChemicalComposition<'lifespan>,
) -> Vec<(ElementSpecification<'lifespan>, i32)> {
    formula.iter().map(|(spec, count)| (*spec, *count)).collect()
}

/// The abundance-weighted mean mass of `element` over its natural isotopes,
/// falling back to the most abundant isotope's mass when none are tabulated.
pub fn element_average_mass(element: &Element) -> f64 {
    let isotopes = natural_isotopes(element);
    let total: f64 = isotopes.iter().map(|i| i.weight).sum();
    if total <= 0.0 {
        return element.most_abundant_mass;
    }
    isotopes.iter().map(|i| i.mass * i.weight).sum::<f64>() / total
}

/// The average mass of a formula: natural-element entries contribute their
/// element's abundance-weighted mean, specific-isotope entries contribute the
/// isotope's exact mass.
pub fn average_mass(formula: &ChemicalComposition<'_>) -> f64 {
    entries(formula)
        .into_iter()
        .map(|(spec, count)| {
            let per_atom = if spec.isotope == 0 {
                element_average_mass(spec.element)
            } else {
                isotope_mass(&spec).unwrap_or_default()
            };
            per_atom * count as f64
        })
        .sum()
}

/// The tabulated mass of the specific isotope a specification names, or
/// `None` for a natural-element specification or an unknown mass number.
pub fn isotope_mass(spec: &ElementSpecification<'_>) -> Option<f64> {
    if spec.isotope == 0 {
        return None;
    }
    spec.element.isotopes.get(&spec.isotope).map(|iso| iso.mass)
}

/// The monoisotopic mass of a formula, built from each element's most
/// abundant isotope.
pub fn monoisotopic_mass(formula: &ChemicalComposition<'_>) -> f64 {
    formula.mass()
}

/// A canonical text key for a composition, independent of entry order. Used
/// to deduplicate formulas produced by the composition search.
pub fn canonical_key(formula: &ChemicalComposition<'_>) -> String {
    let mut parts: Vec<String> = entries(formula)
        .into_iter()
        .filter(|(_, count)| *count != 0)
        .map(|(spec, count)| format!("{}[{}]{}", spec.element.symbol, spec.isotope, count))
        .collect();
    parts.sort_unstable();
    parts.join(" ")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_natural_isotopes_of_oxygen() {
        let spec = ElementSpecification::parse("O").unwrap();
        let isotopes = natural_isotopes(spec.element);
        assert_eq!(isotopes.len(), 3);
        assert_eq!(isotopes[0].mass_number, 16);
        assert!(isotopes[0].weight > 0.99);
        let total: f64 = isotopes.iter().map(|i| i.weight).sum();
        assert!((total - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_uniform_isotopes_weigh_equally() {
        let spec = ElementSpecification::parse("H").unwrap();
        let isotopes = uniform_isotopes(spec.element);
        assert!(!isotopes.is_empty());
        let expected = 1.0 / isotopes.len() as f64;
        assert!(isotopes.iter().all(|i| (i.weight - expected).abs() < 1e-12));
    }

    #[test]
    fn test_water_masses() {
        let mut water = ChemicalComposition::new();
        water.set(ElementSpecification::parse("H").unwrap(), 2);
        water.set(ElementSpecification::parse("O").unwrap(), 1);
        assert!((monoisotopic_mass(&water) - 18.0106).abs() < 1e-3);
        assert!((average_mass(&water) - 18.015).abs() < 1e-2);
    }

    #[test]
    fn test_canonical_key_ignores_order() {
        let mut a = ChemicalComposition::new();
        a.set(ElementSpecification::parse("H").unwrap(), 2);
        a.set(ElementSpecification::parse("O").unwrap(), 1);
        let mut b = ChemicalComposition::new();
        b.set(ElementSpecification::parse("O").unwrap(), 1);
        b.set(ElementSpecification::parse("H").unwrap(), 2);
        assert_eq!(canonical_key(&a), canonical_key(&b));
    }
}
