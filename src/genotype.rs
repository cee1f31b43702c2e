//! Genotype likelihood engine
//!
//! Computes the probability of the alleles observed in one sample at one site under each
//! candidate genotype. All probabilities are handled as natural logs.
//!

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;

use crate::allele::{Allele, AlleleKey};
use crate::prob_utils::{LN3, floor_ln_prob, ln_complement, ln_sum_exp, phred_to_ln_error_prob};

/// Genotype ln probabilities within this distance are treated as tied
pub const GENOTYPE_LN_PROB_EPSILON: f64 = 1e-9;

/// An unordered multiset of candidate alleles of size ploidy
///
/// Alleles are stored as sorted indexes into the candidate allele list of the site, where index 0
/// is always the reference allele.
///
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Genotype(pub Vec<usize>);

impl Genotype {
    pub fn ploidy(&self) -> usize {
        self.0.len()
    }

    /// Distinct alleles of the genotype with their multiplicities
    pub fn allele_counts(&self) -> Vec<(usize, usize)> {
        self.0
            .iter()
            .copied()
            .dedup_with_count()
            .map(|(count, allele_index)| (allele_index, count))
            .collect()
    }

    pub fn distinct_non_ref_count(&self) -> usize {
        self.0.iter().filter(|&&x| x != 0).dedup().count()
    }

    pub fn is_hom_ref(&self) -> bool {
        self.0.iter().all(|&x| x == 0)
    }
}

impl fmt::Display for Genotype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.iter().join("/"))
    }
}

impl fmt::Debug for Genotype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "GT({self})")
    }
}

/// Enumerate every multiset of size ploidy drawn from allele_count alleles
///
/// Genotypes are returned in lexical order.
///
pub fn enumerate_genotypes(allele_count: usize, ploidy: usize) -> Vec<Genotype> {
    if allele_count == 0 || ploidy == 0 {
        return Vec::new();
    }
    (0..allele_count)
        .combinations_with_replacement(ploidy)
        .map(Genotype)
        .collect()
}

/// Number of genotypes that `enumerate_genotypes` will produce, ie. C(n + p - 1, p)
///
pub fn genotype_count(allele_count: usize, ploidy: usize) -> usize {
    if allele_count == 0 || ploidy == 0 {
        return 0;
    }
    let mut count = 1usize;
    for i in 0..ploidy {
        count = count.saturating_mul(allele_count + i) / (i + 1);
    }
    count
}

/// Select the candidate alleles for a site
///
/// The reference allele is always first. Distinct observed non-reference alleles follow, ranked
/// by decreasing observation count with ties broken by allele order, up to max_candidate_alleles
/// total.
///
pub fn get_candidate_alleles<'a>(
    ref_allele: AlleleKey,
    observations: impl IntoIterator<Item = &'a Allele>,
    max_candidate_alleles: usize,
) -> Vec<AlleleKey> {
    let mut counts: HashMap<AlleleKey, usize> = HashMap::new();
    for allele in observations {
        let key = allele.key();
        if key != ref_allele {
            *counts.entry(key).or_default() += 1;
        }
    }
    let alts = counts
        .into_iter()
        .sorted_by(|(k1, c1), (k2, c2)| c2.cmp(c1).then_with(|| k1.cmp(k2)))
        .map(|(k, _)| k)
        .take(max_candidate_alleles.saturating_sub(1));

    std::iter::once(ref_allele).chain(alts).collect()
}

/// ln P(observed | true allele is hypothesis)
///
/// A matching observation is correct with probability 1-e, where e is the base-call error
/// probability of the observation. Any other observation requires an error, which is split
/// uniformly over the 3 alternative bases.
///
fn ln_prob_observation_given_allele(observed: &Allele, hypothesis: &AlleleKey) -> f64 {
    let ln_error = phred_to_ln_error_prob(observed.quality);
    if hypothesis.matches(observed) {
        ln_complement(ln_error)
    } else {
        ln_error - LN3
    }
}

/// ln P(observed | genotype) for a single observation
///
/// The observation is assumed to be drawn from each genotype allele in proportion to its
/// multiplicity.
///
fn ln_prob_observation_given_genotype(
    observed: &Allele,
    genotype: &Genotype,
    candidates: &[AlleleKey],
) -> f64 {
    let ploidy = genotype.ploidy() as f64;
    let terms = genotype
        .allele_counts()
        .into_iter()
        .map(|(allele_index, count)| {
            (count as f64 / ploidy).ln()
                + ln_prob_observation_given_allele(observed, &candidates[allele_index])
        })
        .collect::<Vec<_>>();
    ln_sum_exp(&terms)
}

/// ln P(allele_combo | genotype), where allele_combo is the set of alleles observed in one sample
///
/// Each observation's ln likelihood is scaled by read_dependence_factor before the terms are
/// summed. A factor of 1 treats observations as independent, lower values discount the evidence
/// of correlated reads.
///
/// Non-finite observation terms are replaced by the probability floor, with the second return
/// value set when that happened. An empty observation set returns the floor. Finite sums are
/// returned unchanged, however small.
///
pub fn prob_allele_combo_given_genotype(
    allele_combo: &[&Allele],
    genotype: &Genotype,
    candidates: &[AlleleKey],
    read_dependence_factor: f64,
) -> (f64, bool) {
    if allele_combo.is_empty() {
        return floor_ln_prob(f64::NAN);
    }
    let mut floored = false;
    let ln_prob = allele_combo
        .iter()
        .map(|x| {
            let ln_prob = ln_prob_observation_given_genotype(x, genotype, candidates);
            let (ln_prob, is_floored) = floor_ln_prob(ln_prob * read_dependence_factor);
            floored |= is_floored;
            ln_prob
        })
        .sum::<f64>();
    (ln_prob, floored)
}

/// Observation likelihoods over a set of genotypes
///
#[derive(Clone, Debug)]
pub struct GenotypeLikelihoods {
    /// Each genotype paired with ln P(observed alleles | genotype)
    pub values: Vec<(Genotype, f64)>,

    /// Number of likelihoods with a term replaced by the probability floor
    pub floored_count: usize,
}

impl GenotypeLikelihoods {
    pub fn ln_probs(&self) -> Vec<f64> {
        self.values.iter().map(|(_, x)| *x).collect()
    }
}

/// Compute the observation likelihood for each of the given genotypes
///
pub fn prob_observed_alleles_given_genotypes(
    observed_alleles: &[&Allele],
    genotypes: &[Genotype],
    candidates: &[AlleleKey],
    read_dependence_factor: f64,
) -> GenotypeLikelihoods {
    let mut floored_count = 0;
    let values = genotypes
        .iter()
        .map(|genotype| {
            let (ln_prob, floored) =
                prob_allele_combo_given_genotype(
                    observed_alleles,
                    genotype,
                    candidates,
                    read_dependence_factor,
                );
            if floored {
                floored_count += 1;
            }
            (genotype.clone(), ln_prob)
        })
        .collect();
    GenotypeLikelihoods {
        values,
        floored_count,
    }
}

/// Compute the observation likelihood for every genotype of the given ploidy which can be formed
/// from the candidate alleles
///
pub fn prob_observed_alleles_given_possible_genotypes(
    observed_alleles: &[&Allele],
    candidates: &[AlleleKey],
    ploidy: usize,
    read_dependence_factor: f64,
) -> GenotypeLikelihoods {
    let genotypes = enumerate_genotypes(candidates.len(), ploidy);
    prob_observed_alleles_given_genotypes(
        observed_alleles,
        &genotypes,
        candidates,
        read_dependence_factor,
    )
}

/// Compare two scored genotypes, with the better genotype ordered first
///
/// Scores within GENOTYPE_LN_PROB_EPSILON are tied. Ties prefer the genotype with fewer distinct
/// non-reference alleles, then the lower genotype in lexical order.
///
pub fn cmp_scored_genotypes(g1: &Genotype, score1: f64, g2: &Genotype, score2: f64) -> Ordering {
    if (score1 - score2).abs() > GENOTYPE_LN_PROB_EPSILON {
        return score2.total_cmp(&score1);
    }
    g1.distinct_non_ref_count()
        .cmp(&g2.distinct_non_ref_count())
        .then_with(|| g1.cmp(g2))
}

/// Index of the best scoring genotype, using the deterministic tie-break of `cmp_scored_genotypes`
///
pub fn best_genotype_index(genotypes: &[Genotype], scores: &[f64]) -> Option<usize> {
    assert_eq!(genotypes.len(), scores.len());
    let mut best: Option<usize> = None;
    for index in 0..genotypes.len() {
        best = match best {
            Some(b)
                if cmp_scored_genotypes(&genotypes[b], scores[b], &genotypes[index], scores[index])
                    != Ordering::Greater =>
            {
                Some(b)
            }
            _ => Some(index),
        };
    }
    best
}
