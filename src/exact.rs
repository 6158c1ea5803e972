use crate::models::{ExpAlign, PairState};
use crate::Result;

/// Brute-force exact joint posterior over the two directional models.
///
/// Enumerates, by backtracking, every assignment consistent with a
/// one-to-one-or-null correspondence in both directions simultaneously,
/// weights each by the product of the two directional likelihoods of that
/// exact configuration, and returns two normalized expectation tables whose
/// weights sum to 1. Exponential in sentence length; this is a correctness
/// oracle for the approximate merge, kept behind a length guard by the
/// trainer, not a production path.
pub(crate) fn compute_exact_exp_align(
    sps1: &dyn PairState,
    sps2: &dyn PairState,
) -> Result<(ExpAlign, ExpAlign)> {
    // We work in the frame of sps1: e -> f; sps2 is f -> e.
    let j_len = sps1.j_len();
    let i_len = sps1.i_len();

    let mut search = Search {
        sps1,
        sps2,
        // j2i[j] = i (I means null), i2j[i] = j (J means null).
        j2i: vec![i_len; j_len],
        i2j: vec![j_len; i_len],
        table1: vec![vec![0.0; i_len + 1]; j_len],
        table2: vec![vec![0.0; j_len + 1]; i_len],
        total: 0.0,
    };
    search.run(0)?;

    let Search {
        mut table1,
        mut table2,
        total,
        ..
    } = search;

    if total > 0.0 {
        for row in table1.iter_mut().chain(table2.iter_mut()) {
            row.iter_mut().for_each(|cell| *cell /= total);
        }
    } else {
        log::warn!(
            "exact joint posterior has zero total mass (I={}, J={})",
            i_len,
            j_len
        );
    }

    Ok((ExpAlign::new(i_len, table1), ExpAlign::new(j_len, table2)))
}

struct Search<'a> {
    sps1: &'a dyn PairState,
    sps2: &'a dyn PairState,
    j2i: Vec<usize>,
    i2j: Vec<usize>,
    table1: Vec<Vec<f64>>,
    table2: Vec<Vec<f64>>,
    total: f64,
}

impl Search<'_> {
    fn run(&mut self, j: usize) -> Result<()> {
        let j_len = self.j2i.len();
        let i_len = self.i2j.len();

        if j == j_len {
            let l1 = self.sps1.path_likelihood(&self.j2i)?;
            let l2 = self.sps2.path_likelihood(&self.i2j)?;
            let weight = l1 * l2;
            self.total += weight;
            for (j, &i) in self.j2i.iter().enumerate() {
                self.table1[j][i] += weight;
            }
            for (i, &j) in self.i2j.iter().enumerate() {
                self.table2[i][j] += weight;
            }
            return Ok(());
        }

        for i in 0..=i_len {
            if i < i_len && self.i2j[i] != j_len {
                continue; // i already aligned
            }
            self.j2i[j] = i;
            if i < i_len {
                self.i2j[i] = j;
            }
            self.run(j + 1)?;
            self.j2i[j] = i_len;
            if i < i_len {
                self.i2j[i] = j_len;
            }
        }
        Ok(())
    }
}
