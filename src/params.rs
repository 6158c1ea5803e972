use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use crate::core::{SentencePair, NULL_WORD};
use crate::distortion::DistortProbTable;
use crate::models::StateFamily;
use crate::stats::WordPairStats;
use crate::utils::normalize_force;
use crate::{Error, Result};

/// Conditional translation table `P(f | e)`, one row per English word (plus
/// the null word), one entry per French word ever observed with it.
///
/// The key set is fixed before training: rows are pre-allocated from the
/// training corpus and the table is then locked, so that an unseen pair is a
/// configuration error rather than a silent allocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransProbTable {
    rows: FnvHashMap<String, FnvHashMap<String, f64>>,
    #[serde(default)]
    locked: bool,
}

impl TransProbTable {
    /// Allocate the key set for a corpus: every co-occurring `(en, fr)` pair
    /// and a null row over all French words. With `stats` given, pairs whose
    /// Dice coefficient falls below `dice_threshold` are pruned.
    pub fn allocate(
        pairs: &[SentencePair],
        reverse: bool,
        stats: Option<&WordPairStats>,
        dice_threshold: f64,
    ) -> Self {
        let mut table = TransProbTable::default();
        let mut num_pruned = 0usize;
        for pair in pairs {
            let (en_words, fr_words) = if !reverse {
                (&pair.english, &pair.french)
            } else {
                (&pair.french, &pair.english)
            };
            for fr in fr_words {
                for en in en_words {
                    let (real_en, real_fr) = if reverse { (fr, en) } else { (en, fr) };
                    let keep = match stats {
                        Some(stats) if dice_threshold > 1e-10 => {
                            stats.dice(real_en, real_fr) >= dice_threshold
                        }
                        _ => true,
                    };
                    if keep {
                        table
                            .rows
                            .entry(en.clone())
                            .or_default()
                            .insert(fr.clone(), 0.0);
                    } else {
                        num_pruned += 1;
                    }
                }
                table
                    .rows
                    .entry(NULL_WORD.to_string())
                    .or_default()
                    .insert(fr.clone(), 0.0);
            }
        }
        if num_pruned > 0 {
            log::info!("Pruned {} word pairs below dice threshold", num_pruned);
        }
        table
    }

    /// Freeze the key set. Later updates to unknown keys are dropped with an
    /// error log instead of growing the table.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn contains(&self, en: &str, fr: &str) -> bool {
        self.rows.get(en).map_or(false, |row| row.contains_key(fr))
    }

    pub fn get(&self, en: &str, fr: &str, default: f64) -> f64 {
        self.rows
            .get(en)
            .and_then(|row| row.get(fr))
            .copied()
            .unwrap_or(default)
    }

    pub fn get_checked(&self, en: &str, fr: &str) -> Result<f64> {
        self.rows
            .get(en)
            .and_then(|row| row.get(fr))
            .copied()
            .ok_or_else(|| Error::UnknownWordPair(en.to_string(), fr.to_string()))
    }

    pub fn set(&mut self, en: &str, fr: &str, p: f64) {
        if let Some(value) = self.entry(en, fr) {
            *value = p;
        }
    }

    pub fn incr(&mut self, en: &str, fr: &str, count: f64) {
        if let Some(value) = self.entry(en, fr) {
            *value += count;
        }
    }

    fn entry(&mut self, en: &str, fr: &str) -> Option<&mut f64> {
        if self.locked {
            match self.rows.get_mut(en).and_then(|row| row.get_mut(fr)) {
                Some(value) => Some(value),
                None => {
                    log::error!("update to unallocated word pair ({:?}, {:?})", en, fr);
                    None
                }
            }
        } else {
            Some(
                self.rows
                    .entry(en.to_string())
                    .or_default()
                    .entry(fr.to_string())
                    .or_insert(0.0),
            )
        }
    }

    /// Normalize every row to sum to 1. A row with no mass falls back to a
    /// uniform distribution over its allocated keys.
    pub fn normalize(&mut self) {
        for (en, row) in self.rows.iter_mut() {
            let mut values: Vec<f64> = row.values().copied().collect();
            if !normalize_force(&mut values) {
                log::warn!("normalize(): row {:?} has sum 0, using uniform", en);
            }
            for (value, normalized) in row.values_mut().zip(values) {
                *value = normalized;
            }
        }
    }

    pub fn init_uniform(&mut self) {
        for row in self.rows.values_mut() {
            let uniform = 1.0 / row.len().max(1) as f64;
            row.values_mut().for_each(|v| *v = uniform);
        }
    }

    pub fn init_zero(&mut self) {
        for row in self.rows.values_mut() {
            row.values_mut().for_each(|v| *v = 0.0);
        }
    }

    /// Mean absolute difference against another table with the same key
    /// set, used to report parameter movement between iterations.
    pub fn diff(&self, other: &TransProbTable) -> f64 {
        let mut total = 0.0;
        let mut count = 0usize;
        for (en, row) in &self.rows {
            for (fr, &p) in row {
                total += (p - other.get(en, fr, 0.0)).abs();
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, f64)> + '_ {
        self.rows.iter().flat_map(|(en, row)| {
            row.iter()
                .map(move |(fr, &p)| (en.as_str(), fr.as_str(), p))
        })
    }
}

const SNAPSHOT_VERSION: &str = "1.0";

/// One full parameter snapshot: a translation table, a distortion table and
/// the orientation it was trained under. Training keeps exactly two of
/// these alive, the active one (read during the E-step) and the candidate
/// (accumulated into during the E-step and promoted at iteration end).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Params {
    pub name: String,
    pub reverse: bool,
    /// The hidden-state family the distortion table was sized for; `None`
    /// for the position-independent models.
    pub state_family: Option<StateFamily>,
    pub trans_probs: TransProbTable,
    pub distort_probs: DistortProbTable,
}

impl Params {
    pub fn new(
        name: impl Into<String>,
        reverse: bool,
        num_distortion_groups: usize,
        state_family: Option<StateFamily>,
    ) -> Self {
        Self {
            name: name.into(),
            reverse,
            state_family,
            trans_probs: TransProbTable::default(),
            distort_probs: DistortProbTable::new(num_distortion_groups),
        }
    }

    /// Normalize both tables. Called once per iteration, after the last
    /// sentence's counts have been accumulated.
    pub fn finish(&mut self) {
        self.trans_probs.normalize();
        self.distort_probs.normalize();
    }

    pub fn init_zero(&mut self) {
        self.trans_probs.init_zero();
        self.distort_probs.init_zero();
    }

    pub fn init_uniform(&mut self) {
        self.trans_probs.init_uniform();
        self.distort_probs.init_uniform();
    }

    pub fn diff(&self, other: &Params) -> f64 {
        self.trans_probs.diff(&other.trans_probs)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let file = SnapshotFile {
            version: SNAPSHOT_VERSION.to_string(),
            params: self.clone(),
        };
        std::fs::write(path, serde_json::to_string(&file)?)?;
        log::info!("Saved parameter snapshot {:?} to {:?}", self.name, path);
        Ok(())
    }

    /// Load a snapshot, checking it against the hidden-state family the
    /// caller is configured with. A snapshot from a position-independent run
    /// gets a fresh uniform distortion table sized for `expected_family`; a
    /// snapshot from a different HMM family is rejected.
    pub fn load(path: &str, expected_family: Option<StateFamily>) -> Result<Params> {
        let contents = std::fs::read_to_string(path)?;
        let file: SnapshotFile = serde_json::from_str(&contents)?;
        if file.version != SNAPSHOT_VERSION {
            return Err(Error::Config(format!(
                "unsupported snapshot version: {}",
                file.version
            )));
        }
        let mut params = file.params;
        match (params.state_family, expected_family) {
            (stored, expected) if stored == expected => {}
            (None, Some(family)) => {
                params.distort_probs = DistortProbTable::new(family.num_distortion_groups());
                params.distort_probs.init_uniform();
                params.state_family = Some(family);
            }
            (stored, expected) => {
                return Err(Error::StateFamilyMismatch {
                    stored,
                    current: expected,
                });
            }
        }
        params.trans_probs.lock();
        log::info!("Loaded parameter snapshot {:?} from {:?}", params.name, path);
        Ok(params)
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    version: String,
    #[serde(flatten)]
    params: Params,
}
