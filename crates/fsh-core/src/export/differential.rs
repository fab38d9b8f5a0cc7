//! Differential generation (spec §4.6 step 4): the differential contains
//! only elements actually modified by a rule, plus the root element.

use std::collections::BTreeSet;

use super::fhir_types::ElementDefinition;

/// Build the differential element array from a snapshot and the set of
/// element indices any rule touched. The root element (index 0) is
/// always included even if no rule happened to touch it.
pub fn build_differential(snapshot: &[ElementDefinition], touched: &BTreeSet<usize>) -> Vec<ElementDefinition> {
    let mut indices: BTreeSet<usize> = touched.clone();
    indices.insert(0);
    indices
        .into_iter()
        .filter_map(|i| snapshot.get(i).cloned())
        .collect()
}
