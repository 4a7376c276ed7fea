//! Constrained enumeration of elemental compositions.
//!
//! A search combines hard per-element count ranges with a budget of
//! "unknown" slots that may be filled by any candidate element, and
//! yields every composition whose monoisotopic and average masses fall
//! inside the requested windows.

use chemical_elements::{ChemicalComposition, ElementSpecification};
use mzpeaks::coordinate::{SimpleInterval, Span1D};
use tracing::debug;

use crate::chem::{average_mass, monoisotopic_mass};

/// An inclusive count range for one element or isotope
#[derive(Debug, Clone)]
pub struct CountConstraint<'a> {
    pub spec: ElementSpecification<'a>,
    pub counts: SimpleInterval<i32>,
}

impl<'a> CountConstraint<'a> {
    pub fn new(spec: ElementSpecification<'a>, counts: SimpleInterval<i32>) -> Self {
        Self { spec, counts }
    }

    pub fn fixed(spec: ElementSpecification<'a>, count: i32) -> Self {
        Self::new(spec, SimpleInterval::new(count, count))
    }
}

/// The complete constraint set for one search
#[derive(Debug, Clone)]
pub struct CompositionConstraints<'a> {
    /// Per-element count ranges. Elements not listed here may only enter a
    /// composition through the unknown slot budget.
    pub counts: Vec<CountConstraint<'a>>,
    /// How many atoms in total may be drawn from the candidate pool
    pub unknown_slots: SimpleInterval<i32>,
    /// The acceptable average mass window
    pub average_mass: SimpleInterval<f64>,
    /// The acceptable monoisotopic mass window
    pub monoisotopic_mass: SimpleInterval<f64>,
}

impl Default for CompositionConstraints<'_> {
    fn default() -> Self {
        Self {
            counts: Vec::new(),
            unknown_slots: SimpleInterval::new(0, 0),
            average_mass: SimpleInterval::new(0.0, f64::INFINITY),
            monoisotopic_mass: SimpleInterval::new(0.0, f64::INFINITY),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SlotBudget {
    /// Draws against the shared unknown slot budget
    Unknown,
    /// At most this many atoms beyond the constraint's lower bound
    Extra(i32),
}

#[derive(Debug, Clone)]
struct Slot<'a> {
    spec: ElementSpecification<'a>,
    budget: SlotBudget,
}

/// Enumerates every composition satisfying a [`CompositionConstraints`],
/// drawing unknown-slot atoms from a candidate element pool.
#[derive(Debug, Clone)]
pub struct CompositionSearch<'a> {
    pub constraints: CompositionConstraints<'a>,
    slots: Vec<Slot<'a>>,
}

impl<'a> CompositionSearch<'a> {
    /// Candidates already named by a count constraint are dropped from the
    /// pool so the count range stays authoritative for that element.
    pub fn new(
        constraints: CompositionConstraints<'a>,
        mut candidates: Vec<ElementSpecification<'a>>,
    ) -> Self {
        candidates.retain(|c| !constraints.counts.iter().any(|k| k.spec == *c));
        // heaviest first, so branches that overshoot the mass windows die early
        candidates.sort_unstable_by(|a, b| {
            b.element
                .most_abundant_mass
                .total_cmp(&a.element.most_abundant_mass)
        });

        let mut slots: Vec<Slot<'a>> = candidates
            .into_iter()
            .map(|spec| Slot {
                spec,
                budget: SlotBudget::Unknown,
            })
            .collect();
        slots.extend(constraints.counts.iter().map(|k| Slot {
            spec: k.spec,
            budget: SlotBudget::Extra(k.counts.end - k.counts.start),
        }));
        Self { constraints, slots }
    }

    /// All satisfying compositions. Each composition appears exactly once;
    /// the slot order is advanced monotonically during recursion so no
    /// multiset of atoms is ever reached twice.
    pub fn enumerate(&self) -> Vec<ChemicalComposition<'a>> {
        let mut base = ChemicalComposition::new();
        // every slot gets an explicit entry up front so incrementing through
        // the index operator always addresses an existing key
        for slot in &self.slots {
            base.set(slot.spec, 0);
        }
        let mut atoms = 0;
        for k in &self.constraints.counts {
            base.set(k.spec, k.counts.start.max(0));
            atoms += k.counts.start.max(0);
        }
        let mut results = Vec::new();
        if monoisotopic_mass(&base) > self.constraints.monoisotopic_mass.end
            || average_mass(&base) > self.constraints.average_mass.end
        {
            debug!("Count lower bounds already exceed the mass windows");
            return results;
        }
        self.visit(&base, 0, 0, 0, atoms, &mut results);
        debug!("Enumerated {} satisfying compositions", results.len());
        results
    }

    fn visit(
        &self,
        formula: &ChemicalComposition<'a>,
        slot_index: usize,
        used_in_slot: i32,
        unknown_used: i32,
        atoms: i32,
        results: &mut Vec<ChemicalComposition<'a>>,
    ) {
        if atoms > 0 && self.satisfies(formula, unknown_used) {
            results.push(formula.clone());
        }
        for i in slot_index..self.slots.len() {
            let used = if i == slot_index { used_in_slot } else { 0 };
            let slot = &self.slots[i];
            let (remaining, draws_unknown) = match slot.budget {
                SlotBudget::Unknown => (self.constraints.unknown_slots.end - unknown_used, true),
                SlotBudget::Extra(cap) => (cap - used, false),
            };
            if remaining <= 0 {
                continue;
            }
            let mut child = formula.clone();
            child[&slot.spec] += 1;
            // adding atoms only raises both masses, so an overshoot here can
            // never recover deeper down this branch
            if monoisotopic_mass(&child) > self.constraints.monoisotopic_mass.end
                || average_mass(&child) > self.constraints.average_mass.end
            {
                continue;
            }
            self.visit(
                &child,
                i,
                used + 1,
                unknown_used + draws_unknown as i32,
                atoms + 1,
                results,
            );
        }
    }

    fn satisfies(&self, formula: &ChemicalComposition<'a>, unknown_used: i32) -> bool {
        unknown_used >= self.constraints.unknown_slots.start
            && self
                .constraints
                .monoisotopic_mass
                .contains(&monoisotopic_mass(formula))
            && self.constraints.average_mass.contains(&average_mass(formula))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chem::canonical_key;

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

    #[test_log::test]
    fn test_counts_and_mass_window_pin_water() {
        let h = ElementSpecification::parse("H").unwrap();
        let o = ElementSpecification::parse("O").unwrap();
        let constraints = CompositionConstraints {
            counts: vec![
                CountConstraint::new(h, SimpleInterval::new(0, 2)),
                CountConstraint::new(o, SimpleInterval::new(1, 1)),
            ],
            monoisotopic_mass: SimpleInterval::new(18.0, 18.02),
            ..Default::default()
        };
        let results = CompositionSearch::new(constraints, Vec::new()).enumerate();
        assert_eq!(results.len(), 1);
        assert_eq!(canonical_key(&results[0]), "H[0]2 O[0]1");
        assert_is_close!(results[0].mass(), 18.0106, 0.001, "monoisotopic mass");
    }

    #[test]
    fn test_no_slots_means_no_results() {
        let constraints = CompositionConstraints {
            monoisotopic_mass: SimpleInterval::new(10.0, 20.0),
            ..Default::default()
        };
        let results = CompositionSearch::new(constraints, Vec::new()).enumerate();
        assert!(results.is_empty());
    }

    #[test]
    fn test_unknown_slots_draw_from_candidates() {
        let h = ElementSpecification::parse("H").unwrap();
        let constraints = CompositionConstraints {
            unknown_slots: SimpleInterval::new(0, 4),
            monoisotopic_mass: SimpleInterval::new(2.0, 2.1),
            ..Default::default()
        };
        let results = CompositionSearch::new(constraints, vec![h]).enumerate();
        assert_eq!(results.len(), 1);
        assert_is_close!(results[0].mass(), 2.0157, 0.001, "monoisotopic mass");
    }

    #[test]
    fn test_minimum_unknown_slots_are_required() {
        let h = ElementSpecification::parse("H").unwrap();
        let o = ElementSpecification::parse("O").unwrap();
        // water's oxygen is fixed; two unknown slots must both be spent
        let constraints = CompositionConstraints {
            counts: vec![CountConstraint::fixed(o, 1)],
            unknown_slots: SimpleInterval::new(2, 2),
            monoisotopic_mass: SimpleInterval::new(15.0, 19.0),
            ..Default::default()
        };
        let results = CompositionSearch::new(constraints, vec![h]).enumerate();
        assert_eq!(results.len(), 1);
        assert_eq!(canonical_key(&results[0]), "H[0]2 O[0]1");
    }

    #[test]
    fn test_candidate_overlapping_a_count_constraint_is_dropped() {
        let h = ElementSpecification::parse("H").unwrap();
        let constraints = CompositionConstraints {
            counts: vec![CountConstraint::fixed(h, 2)],
            unknown_slots: SimpleInterval::new(0, 10),
            monoisotopic_mass: SimpleInterval::new(2.0, 2.1),
            ..Default::default()
        };
        // H may not be drawn as an unknown on top of its fixed count
        let results = CompositionSearch::new(constraints, vec![h]).enumerate();
        assert_eq!(results.len(), 1);
        assert_is_close!(results[0].mass(), 2.0157, 0.001, "monoisotopic mass");
    }
}
