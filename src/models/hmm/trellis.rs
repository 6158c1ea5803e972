use crate::distortion::DistortProbTable;
use crate::models::hmm::state::{StateFamily, WaState};

// Convention: emit the symbol at position j and then transition.

/// The lattice of hidden states for one English sentence length, with the
/// legal transitions and their weights precomputed per time-zone. Weights
/// depend only on the distortion table and the sentence length, so a trellis
/// can be shared by every sentence of the same length until the parameters
/// change.
#[derive(Debug)]
pub struct WaTrellis {
    states: Vec<WaState>,
    init_state: usize,
    final_state: usize,
    i_len: usize,
    family: StateFamily,
    null_prob: f64,
    // zone, state -> list of successor states and their weights.
    next_states: Vec<Vec<Vec<usize>>>,
    trans_weights: Vec<Vec<Vec<f64>>>,
}

impl WaTrellis {
    /// Build the trellis for English length `i_len`. `null_prob` is the raw
    /// option value: 1 is a sentinel for `1/(I+1)`.
    pub fn new(
        family: StateFamily,
        i_len: usize,
        null_prob: f64,
        distort: &DistortProbTable,
    ) -> Self {
        let null_prob = if null_prob == 1.0 {
            1.0 / (i_len + 1) as f64
        } else {
            null_prob
        };

        let mut states = Vec::with_capacity(2 * i_len + 3);
        for i in -1..=(i_len as isize) {
            for curr_aligned in [false, true] {
                if WaState::is_valid(i, curr_aligned, i_len) {
                    states.push(WaState::new(i, curr_aligned));
                }
            }
        }

        let num_states = states.len();
        let num_zones = family.num_zones();
        let mut trellis = Self {
            states,
            init_state: 0,
            final_state: 0,
            i_len,
            family,
            null_prob,
            next_states: vec![vec![Vec::new(); num_states]; num_zones],
            trans_weights: vec![vec![Vec::new(); num_states]; num_zones],
        };
        trellis.init_state = trellis.state_index(&WaState::init_state());
        trellis.final_state = trellis.state_index(&WaState::final_state(i_len));
        trellis.create_transitions(distort);

        log::debug!(
            "Created trellis for length I={} with {} states",
            i_len,
            trellis.num_states()
        );
        trellis
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn states(&self) -> &[WaState] {
        &self.states
    }

    pub fn state(&self, index: usize) -> WaState {
        self.states[index]
    }

    pub fn init_state(&self) -> usize {
        self.init_state
    }

    pub fn final_state(&self) -> usize {
        self.final_state
    }

    pub fn i_len(&self) -> usize {
        self.i_len
    }

    pub fn family(&self) -> StateFamily {
        self.family
    }

    // States are enumerated in (i, curr_aligned) order with the impossible
    // (I, false) combination skipped, so the final state sits last and every
    // other index is arithmetic.
    fn state_index(&self, state: &WaState) -> usize {
        let index = if state.i == self.i_len as isize {
            self.states.len() - 1
        } else {
            (2 * (state.i + 1) + state.curr_aligned as isize) as usize
        };
        debug_assert_eq!(self.states[index], *state);
        index
    }

    fn create_transitions(&mut self, distort: &DistortProbTable) {
        for zone in 0..self.family.num_zones() {
            for s1 in 0..self.states.len() {
                let from = self.states[s1];
                let mut trans_sum = 0.0;
                for s2 in 0..self.states.len() {
                    let to = self.states[s2];
                    if from.valid_transition(&to, self.i_len) {
                        let weight = self.transition_prob(zone, &from, &to, distort);
                        self.next_states[zone][s1].push(s2);
                        self.trans_weights[zone][s1].push(weight);
                        trans_sum += weight;
                    }
                }
                // Outgoing weights form a distribution over the successors
                // whenever the state has any.
                if trans_sum != 0.0 && (trans_sum - 1.0).abs() > 1e-10 {
                    log::error!(
                        "transition weights for zone={} state={:?} sum to {}",
                        zone,
                        from,
                        trans_sum
                    );
                }
            }
        }
    }

    // state1(h, *) -> state2(i, b)
    // P(a_j = i,1 | a_{j-1} = h,*) = (1-p0) * P(i-h | I)
    // P(a_j = i,0 | a_{j-1} = h,*) = p0 * delta(i = h)
    fn transition_prob(
        &self,
        zone: usize,
        state1: &WaState,
        state2: &WaState,
        distort: &DistortProbTable,
    ) -> f64 {
        if !state2.curr_aligned {
            debug_assert_eq!(state1.i, state2.i);
            self.null_prob
        } else {
            (1.0 - self.null_prob)
                * distort.get(
                    self.family.distortion_group(zone),
                    state1.i,
                    state2.i,
                    self.i_len,
                )
        }
    }

    /// Forward probabilities: `alpha[j][s] = P(obs_0, .., obs_{j-1}, s_j)`.
    /// `emission[j][s] = P(obs_j | s_j = s)`. A value drifting above 1 is a
    /// floating-point symptom of a degenerate model; it is logged and
    /// clamped rather than propagated.
    pub fn forward(&self, emission: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let j_len = emission.len();
        let num_states = self.num_states();
        let mut alpha = vec![vec![0.0; num_states]; j_len];

        for j in -1..(j_len as isize - 1) {
            let zone = self.family.zone(j, j_len);
            for s1 in 0..num_states {
                let base = if j == -1 {
                    if s1 == self.init_state {
                        1.0
                    } else {
                        0.0
                    }
                } else {
                    alpha[j as usize][s1] * emission[j as usize][s1]
                };
                if base == 0.0 {
                    continue;
                }
                for (q, &s2) in self.next_states[zone][s1].iter().enumerate() {
                    let weight = self.trans_weights[zone][s1][q];
                    let cell = &mut alpha[(j + 1) as usize][s2];
                    *cell += base * weight;
                    if *cell > 1.0 {
                        log::error!(
                            "alpha(j={}, state={:?}) = {} > 1",
                            j + 1,
                            self.states[s2],
                            *cell
                        );
                        *cell = 1.0;
                    }
                }
            }
        }
        alpha
    }

    /// Backward probabilities: `beta[j][s] = P(obs_j, .., obs_{J-1} | s_j)`,
    /// with the same clamp-on-overflow policy as the forward pass.
    pub fn backward(&self, emission: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let j_len = emission.len();
        let num_states = self.num_states();
        let mut beta = vec![vec![0.0; num_states]; j_len];

        for j in (0..j_len).rev() {
            let zone = self.family.zone(j as isize, j_len);
            let (head, tail) = beta.split_at_mut(j + 1);
            let row = &mut head[j];
            let next = tail.first();
            for s1 in 0..num_states {
                for (q, &s2) in self.next_states[zone][s1].iter().enumerate() {
                    let weight = self.trans_weights[zone][s1][q];
                    let successor = match next {
                        // j = J-1: defined directly by the transitions into
                        // the final state.
                        None => {
                            if s2 == self.final_state {
                                1.0
                            } else {
                                0.0
                            }
                        }
                        Some(next_row) => next_row[s2],
                    };
                    row[s1] += successor * emission[j][s1] * weight;
                    if row[s1] > 1.0 {
                        log::error!(
                            "beta(j={}, state={:?}) = {} > 1",
                            j,
                            self.states[s1],
                            row[s1]
                        );
                        row[s1] = 1.0;
                    }
                }
            }
        }
        beta
    }

    /// Sentence likelihood, evaluated at a fixed timestep (they all agree up
    /// to floating error). Non-finite values are logged and reported as 0 so
    /// the caller can discard the sentence instead of crashing.
    pub fn likelihood(&self, alpha: &[Vec<f64>], beta: &[Vec<f64>]) -> f64 {
        if alpha.is_empty() {
            return 1.0;
        }
        let any_index = 0;
        let mut likelihood = 0.0;
        for s in 0..self.num_states() {
            likelihood += alpha[any_index][s] * beta[any_index][s];
        }
        if !likelihood.is_finite() {
            log::error!("bad likelihood: {}", likelihood);
            return 0.0;
        }
        likelihood
    }

    /// Single best state sequence, computed backwards so the trace-back can
    /// start from the initial state's best outgoing transition. Ties break
    /// towards the first state found in enumeration order.
    pub fn viterbi_path(&self, emission: &[Vec<f64>]) -> Vec<usize> {
        let j_len = emission.len();
        if j_len == 0 {
            return vec![];
        }
        let num_states = self.num_states();

        // best[j][s] = (p, s2) where p is the maximum probability of a state
        // sequence from s at position j to the final state and s2 the
        // successor achieving it.
        let mut best = vec![vec![Rec::default(); num_states]; j_len];
        let mut best_init = Rec::default();

        for j in (-1..=(j_len as isize - 1)).rev() {
            let zone = self.family.zone(j, j_len);
            for s1 in 0..num_states {
                let mut rec = Rec::default();
                for (q, &s2) in self.next_states[zone][s1].iter().enumerate() {
                    let weight = self.trans_weights[zone][s1][q];
                    let tail = if j == j_len as isize - 1 {
                        if s2 == self.final_state {
                            1.0
                        } else {
                            0.0
                        }
                    } else {
                        best[(j + 1) as usize][s2].p
                    };
                    let emit = if j == -1 {
                        if s1 == self.init_state {
                            1.0
                        } else {
                            0.0
                        }
                    } else {
                        emission[j as usize][s1]
                    };
                    rec.improve(tail * emit * weight, s2);
                }
                if j >= 0 {
                    best[j as usize][s1] = rec;
                } else if s1 == self.init_state {
                    best_init = rec;
                }
            }
        }

        // Trace out the best path.
        let mut path = Vec::with_capacity(j_len);
        let mut rec = best_init;
        for j in 0..j_len {
            let state = rec.state.unwrap_or_else(|| {
                log::error!("viterbi record at j={} has no successor, using state 0", j);
                0
            });
            path.push(state);
            rec = best[j][state];
        }
        if rec.state != Some(self.final_state) {
            log::error!(
                "viterbi trace-back ended in {:?} instead of the final state",
                rec.state.map(|s| self.states[s])
            );
        }
        path
    }

    /// M-step contribution of one sentence to the distortion table: the edge
    /// posterior of every realized transition with an aligned successor is
    /// added at the successor's distortion group and offset.
    pub fn update_transition_probs(
        &self,
        output: &TrellisOutput,
        distort: &mut DistortProbTable,
    ) {
        let j_len = output.emission.len();
        if j_len == 0 {
            return;
        }
        for j in -1..(j_len as isize) {
            let zone = self.family.zone(j, j_len);
            for s1 in 0..self.num_states() {
                for (q, &s2) in self.next_states[zone][s1].iter().enumerate() {
                    let weight = self.trans_weights[zone][s1][q];
                    let to = self.states[s2];
                    if !to.curr_aligned {
                        continue;
                    }
                    let mut posterior = output.edge_posterior(self, j, s1, s2, weight);
                    if !posterior.is_finite() {
                        log::error!(
                            "edge posterior for j={}/{}, {:?} -> {:?}: {}",
                            j,
                            j_len,
                            self.states[s1],
                            to,
                            posterior
                        );
                        posterior = 1.0;
                    }
                    distort.add(
                        self.family.distortion_group(zone),
                        self.states[s1].i,
                        to.i,
                        posterior,
                    );
                }
            }
        }
    }
}

// A Viterbi record: best achievable path probability and the successor
// chosen to achieve it.
#[derive(Debug, Clone, Copy)]
struct Rec {
    p: f64,
    state: Option<usize>,
}

impl Default for Rec {
    fn default() -> Self {
        Self {
            p: f64::MIN_POSITIVE,
            state: None,
        }
    }
}

impl Rec {
    fn improve(&mut self, p: f64, state: usize) {
        if p > self.p {
            self.p = p;
            self.state = Some(state);
        }
    }
}

/// The forward/backward quantities of one sentence against one trellis.
#[derive(Debug)]
pub struct TrellisOutput {
    pub emission: Vec<Vec<f64>>,
    pub alpha: Vec<Vec<f64>>,
    pub beta: Vec<Vec<f64>>,
    pub likelihood: f64,
}

impl TrellisOutput {
    pub fn new(trellis: &WaTrellis, emission: Vec<Vec<f64>>) -> Self {
        let alpha = trellis.forward(&emission);
        let beta = trellis.backward(&emission);
        let likelihood = trellis.likelihood(&alpha, &beta);
        Self {
            emission,
            alpha,
            beta,
            likelihood,
        }
    }

    /// `P(s_j = s | obs)`, assuming a non-degenerate likelihood.
    pub fn node_posterior(&self, j: usize, state: usize) -> f64 {
        self.alpha[j][state] * self.beta[j][state] / self.likelihood
    }

    /// Posterior of the transition `s1 -> s2` taken between positions `j`
    /// and `j+1`, with the boundary cases at `j = -1` and `j = J-1`
    /// substituted by the initial/final indicators.
    pub fn edge_posterior(
        &self,
        trellis: &WaTrellis,
        j: isize,
        s1: usize,
        s2: usize,
        trans_weight: f64,
    ) -> f64 {
        let j_len = self.emission.len() as isize;
        let from = if j == -1 {
            if s1 == trellis.init_state() {
                1.0
            } else {
                0.0
            }
        } else {
            self.alpha[j as usize][s1]
        };
        let to = if j == j_len - 1 {
            if s2 == trellis.final_state() {
                1.0
            } else {
                0.0
            }
        } else {
            self.beta[(j + 1) as usize][s2]
        };
        let emit = if j == -1 || j == j_len - 1 {
            1.0
        } else {
            self.emission[j as usize][s1]
        };
        from * to * trans_weight * emit / self.likelihood
    }
}
