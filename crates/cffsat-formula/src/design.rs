//! Decoding witnesses into block families and checking the cover-free property.

use std::collections::BTreeSet;

use itertools::Itertools;

use crate::formula::Witness;

/// A family of blocks, each a sorted list of 1-based ground-set elements.
pub type Blocks = Vec<Vec<u32>>;

/// Read the `t x n` incidence matrix out of a witness.
///
/// Block `c` holds every row `r + 1` whose variable `x(r, c)` is true. Blocks
/// are ordered by element sum, ties broken lexicographically, so equal
/// families decode to equal values.
pub fn blocks_from_witness(witness: &Witness, t: u32, n: u32) -> Blocks {
    let mut blocks: Blocks = vec![Vec::new(); n as usize];
    for row in 0..t {
        for column in 0..n {
            let var = row * n + column + 1;
            if witness.value(var) == Some(true) {
                blocks[column as usize].push(row + 1);
            }
        }
    }
    blocks.sort_by(|a, b| {
        let sa: u64 = a.iter().map(|&x| u64::from(x)).sum();
        let sb: u64 = b.iter().map(|&x| u64::from(x)).sum();
        sa.cmp(&sb).then_with(|| a.cmp(b))
    });
    blocks
}

/// True when no block is contained in the union of any `d` other blocks.
pub fn is_cover_free(blocks: &[Vec<u32>], d: u32) -> bool {
    for (i, block) in blocks.iter().enumerate() {
        let others = (0..blocks.len()).filter(|&j| j != i);
        for covering in others.combinations(d as usize) {
            let union: BTreeSet<u32> = covering
                .iter()
                .flat_map(|&j| blocks[j].iter().copied())
                .collect();
            if block.iter().all(|x| union.contains(x)) {
                return false;
            }
        }
    }
    true
}
