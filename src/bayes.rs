//! Bayesian aggregation of per-sample genotype likelihoods
//!
//! All methods take per-sample genotype likelihood vectors which are indexed in the same genotype
//! order, and only include samples with observations at the site.
//!

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::genotype::{Genotype, best_genotype_index, cmp_scored_genotypes};
use crate::prob_utils::ln_sum_exp;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum GenotypePrior {
    /// Every genotype is equally likely
    Flat,

    /// Genotype prior is proportional to theta^d, where d is the number of distinct
    /// non-reference alleles in the genotype
    Theta(f64),
}

impl GenotypePrior {
    /// Normalized ln prior of each genotype
    pub fn ln_priors(&self, genotypes: &[Genotype]) -> Vec<f64> {
        let weights = match self {
            GenotypePrior::Flat => vec![0.0; genotypes.len()],
            GenotypePrior::Theta(theta) => {
                let ln_theta = theta.ln();
                genotypes
                    .iter()
                    .map(|x| x.distinct_non_ref_count() as f64 * ln_theta)
                    .collect()
            }
        };
        let ln_total = ln_sum_exp(&weights);
        weights.into_iter().map(|x| x - ln_total).collect()
    }
}

/// ln of the unnormalized posterior score of each genotype for one sample
fn get_sample_scores(ln_likelihoods: &[f64], ln_priors: &[f64]) -> Vec<f64> {
    assert_eq!(ln_likelihoods.len(), ln_priors.len());
    ln_likelihoods
        .iter()
        .zip(ln_priors)
        .map(|(l, p)| l + p)
        .collect()
}

/// Exact ln marginal probability of the observed data across all samples
///
/// Every joint assignment of one genotype per sample is enumerated. The joint prior of an
/// assignment is the product of the per-sample genotype priors. Cost is exponential in the
/// number of samples.
///
/// Returns 0 (ie. ln(1)) when no sample has data.
///
pub fn bayesian_normalization_factor(ln_priors: &[f64], probs_by_sample: &[Vec<f64>]) -> f64 {
    if probs_by_sample.is_empty() {
        return 0.0;
    }
    let sample_scores = probs_by_sample
        .iter()
        .map(|x| get_sample_scores(x, ln_priors))
        .collect::<Vec<_>>();

    let joint_scores = sample_scores
        .iter()
        .map(|x| x.iter().copied())
        .multi_cartesian_product()
        .map(|combo| combo.into_iter().sum::<f64>())
        .collect::<Vec<_>>();
    ln_sum_exp(&joint_scores)
}

/// Approximate ln marginal probability of the observed data across all samples
///
/// The sum is restricted to joint assignments drawn from the top_k highest scoring genotypes of
/// each sample. Because the restricted assignments are a subset of the exact sum, the result
/// never exceeds `bayesian_normalization_factor`, and it does not decrease as top_k increases.
/// The restricted sum factorizes over samples, so the cost is linear in sample count.
///
pub fn approximate_bayesian_normalization_factor(
    genotypes: &[Genotype],
    ln_priors: &[f64],
    probs_by_sample: &[Vec<f64>],
    top_k: usize,
) -> f64 {
    probs_by_sample
        .iter()
        .map(|x| {
            let scores = get_sample_scores(x, ln_priors);
            let top_scores = (0..scores.len())
                .sorted_by(|&a, &b| {
                    cmp_scored_genotypes(&genotypes[a], scores[a], &genotypes[b], scores[b])
                })
                .take(top_k)
                .map(|i| scores[i])
                .collect::<Vec<_>>();
            ln_sum_exp(&top_scores)
        })
        .sum()
}

/// ln posterior probability of each genotype for one sample
///
pub fn sample_genotype_posteriors(ln_likelihoods: &[f64], ln_priors: &[f64]) -> Vec<f64> {
    let scores = get_sample_scores(ln_likelihoods, ln_priors);
    let ln_total = ln_sum_exp(&scores);
    scores.into_iter().map(|x| x - ln_total).collect()
}

/// Find the most likely genotype of each sample
///
/// Returns, for each sample, the index of its best genotype and the genotype's ln score. When
/// normalize is true the score is the sample's genotype posterior probability. Otherwise it is
/// the unnormalized ln(likelihood * prior), which can't be compared across different
/// observation sets.
///
/// The joint assignment of these per-sample genotypes is the most likely joint genotype, since
/// the joint prior factorizes over samples.
///
pub fn most_likely_genotypes_given_observations(
    genotypes: &[Genotype],
    ln_priors: &[f64],
    probs_by_sample: &[Vec<f64>],
    normalize: bool,
) -> Vec<(usize, f64)> {
    probs_by_sample
        .iter()
        .filter_map(|x| {
            let scores = if normalize {
                sample_genotype_posteriors(x, ln_priors)
            } else {
                get_sample_scores(x, ln_priors)
            };
            best_genotype_index(genotypes, &scores).map(|i| (i, scores[i]))
        })
        .collect()
}
