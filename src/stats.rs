use fnv::FnvHashMap;

use crate::core::SentencePair;

/// Co-occurrence statistics over a parallel corpus.
///
/// Knows about every English/French word pair that appears in the same
/// sentence, which is exactly the key set the translation table needs, and
/// provides Dice scores usable for pruning that set.
#[derive(Debug, Clone, Default)]
pub struct WordPairStats {
    en_counts: FnvHashMap<String, f64>,
    fr_counts: FnvHashMap<String, f64>,
    pair_counts: FnvHashMap<String, FnvHashMap<String, f64>>,
}

impl WordPairStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count sentence-level occurrences and co-occurrences. A word pair is
    /// counted once per sentence pair it appears in.
    pub fn compute_stats(&mut self, pairs: &[SentencePair]) {
        for pair in pairs {
            let mut en_words: Vec<&str> = pair.english.iter().map(|w| w.as_str()).collect();
            let mut fr_words: Vec<&str> = pair.french.iter().map(|w| w.as_str()).collect();
            en_words.sort_unstable();
            en_words.dedup();
            fr_words.sort_unstable();
            fr_words.dedup();

            for &en in &en_words {
                *self.en_counts.entry(en.to_string()).or_insert(0.0) += 1.0;
            }
            for &fr in &fr_words {
                *self.fr_counts.entry(fr.to_string()).or_insert(0.0) += 1.0;
            }
            for &en in &en_words {
                let row = self.pair_counts.entry(en.to_string()).or_default();
                for &fr in &fr_words {
                    *row.entry(fr.to_string()).or_insert(0.0) += 1.0;
                }
            }
        }
        log::info!(
            "Computed word pair statistics over {} sentences ({} English words, {} French words)",
            pairs.len(),
            self.num_en(),
            self.num_fr()
        );
    }

    pub fn num_en(&self) -> usize {
        self.en_counts.len()
    }

    pub fn num_fr(&self) -> usize {
        self.fr_counts.len()
    }

    pub fn has_stats(&self) -> bool {
        !self.pair_counts.is_empty()
    }

    pub fn en_count(&self, en: &str) -> f64 {
        self.en_counts.get(en).copied().unwrap_or(0.0)
    }

    pub fn fr_count(&self, fr: &str) -> f64 {
        self.fr_counts.get(fr).copied().unwrap_or(0.0)
    }

    pub fn count(&self, en: &str, fr: &str) -> f64 {
        self.pair_counts
            .get(en)
            .and_then(|row| row.get(fr))
            .copied()
            .unwrap_or(0.0)
    }

    /// Dice coefficient of an English/French word pair.
    pub fn dice(&self, en: &str, fr: &str) -> f64 {
        let denominator = self.en_count(en) + self.fr_count(fr);
        if denominator == 0.0 {
            return 0.0;
        }
        2.0 * self.count(en, fr) / denominator
    }
}
