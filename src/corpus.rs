use std::collections::HashMap;
use std::io::Write;

use regex::Regex;

use crate::core::{Alignment, SentencePair};
use crate::{Error, Result};

/// Read a parallel corpus from two whitespace-tokenized files, one sentence
/// per line. Sentence IDs are assigned from `first_id` in file order.
pub fn read_parallel_corpus(
    english_path: &str,
    french_path: &str,
    max_sentences: usize,
    first_id: usize,
) -> Result<Vec<SentencePair>> {
    let english = std::fs::read_to_string(english_path)?;
    let french = std::fs::read_to_string(french_path)?;

    let english_lines: Vec<&str> = english.lines().collect();
    let french_lines: Vec<&str> = french.lines().collect();
    if english_lines.len() != french_lines.len() {
        return Err(Error::Config(format!(
            "corpus line counts differ: {} has {}, {} has {}",
            english_path,
            english_lines.len(),
            french_path,
            french_lines.len()
        )));
    }

    let pairs: Vec<SentencePair> = english_lines
        .iter()
        .zip(&french_lines)
        .take(max_sentences)
        .enumerate()
        .map(|(idx, (en, fr))| {
            SentencePair::new(
                first_id + idx,
                en.split_whitespace().map(str::to_string).collect(),
                fr.split_whitespace().map(str::to_string).collect(),
            )
        })
        .collect();

    log::info!(
        "Read {} sentence pairs from {:?} / {:?}",
        pairs.len(),
        english_path,
        french_path
    );
    Ok(pairs)
}

/// Parse gold alignments in Pharaoh format, one line per sentence: pairs of
/// `{english}-{french}` positions for sure alignments and
/// `{english}?{french}` for possible-only ones. Line order must match the
/// test corpus; sentence IDs are assigned from `first_id`.
pub fn read_gold_alignments(path: &str, first_id: usize) -> Result<HashMap<usize, Alignment>> {
    let contents = std::fs::read_to_string(path)?;
    parse_gold_alignments(&contents, first_id)
}

pub fn parse_gold_alignments(contents: &str, first_id: usize) -> Result<HashMap<usize, Alignment>> {
    let pair_re = Regex::new(r"^(\d+)([-?])(\d+)$").expect("valid regex");
    let mut alignments = HashMap::new();

    for (idx, line) in contents.lines().enumerate() {
        let mut alignment = Alignment::new();
        for token in line.split_whitespace() {
            let captures = pair_re.captures(token).ok_or_else(|| {
                Error::Config(format!(
                    "malformed alignment token {:?} on line {}",
                    token,
                    idx + 1
                ))
            })?;
            let parse = |s: &str| {
                s.parse::<usize>().map_err(|_| {
                    Error::Config(format!("position out of range in token {:?}", token))
                })
            };
            let i = parse(&captures[1])?;
            let j = parse(&captures[3])?;
            alignment.add(i, j, &captures[2] == "-");
        }
        alignments.insert(first_id + idx, alignment);
    }
    Ok(alignments)
}

/// Write sure alignments in Pharaoh format, one line per sentence in corpus
/// order.
pub fn write_alignments(
    out: &mut impl Write,
    pairs: &[SentencePair],
    alignments: &HashMap<usize, Alignment>,
) -> Result<()> {
    for pair in pairs {
        let mut links: Vec<(usize, usize)> = alignments
            .get(&pair.id)
            .map(|a| a.sure_pairs().collect())
            .unwrap_or_default();
        links.sort_unstable();
        let line = links
            .iter()
            .map(|(i, j)| format!("{}-{}", i, j))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(out, "{}", line)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gold_alignments() {
        let alignments = parse_gold_alignments("0-0 1?1 2-1\n\n0-1\n", 0).unwrap();
        assert_eq!(alignments.len(), 3);

        let first = &alignments[&0];
        assert!(first.contains_sure(0, 0));
        assert!(!first.contains_sure(1, 1));
        assert!(first.contains_possible(1, 1));
        assert!(first.contains_sure(2, 1));

        assert_eq!(alignments[&1].num_sure(), 0);
        assert!(alignments[&2].contains_sure(0, 1));
    }

    #[test]
    fn test_parse_rejects_malformed_tokens() {
        assert!(parse_gold_alignments("0-0 nonsense\n", 0).is_err());
    }

    #[test]
    fn test_write_alignments_round_trip() {
        let pairs = vec![SentencePair::new(
            0,
            vec!["a".into(), "b".into()],
            vec!["x".into(), "y".into()],
        )];
        let mut alignment = Alignment::new();
        alignment.add(1, 0, true);
        alignment.add(0, 1, true);
        let mut alignments = HashMap::new();
        alignments.insert(0, alignment);

        let mut buffer = Vec::new();
        write_alignments(&mut buffer, &pairs, &alignments).unwrap();
        let written = String::from_utf8(buffer).unwrap();
        assert_eq!(written, "0-1 1-0\n");

        let parsed = parse_gold_alignments(&written, 0).unwrap();
        assert!(parsed[&0].contains_sure(1, 0));
        assert!(parsed[&0].contains_sure(0, 1));
    }
}
