//! Per-position variant calling from the observations of all samples
//!

use serde::{Deserialize, Serialize};

use crate::allele::{Allele, AlleleArena, AlleleKey};
use crate::bayes::{
    GenotypePrior, approximate_bayesian_normalization_factor, bayesian_normalization_factor,
    most_likely_genotypes_given_observations, sample_genotype_posteriors,
};
use crate::genotype::{
    Genotype, enumerate_genotypes, get_candidate_alleles, prob_observed_alleles_given_genotypes,
};
use crate::prob_utils::{ln_complement, ln_error_prob_to_phred, ln_error_prob_to_qphred};
use crate::traversal::PositionAlleles;

pub const MAX_SITE_QUAL: f64 = 999.0;
pub const MAX_GENOTYPE_QUAL: i32 = 99;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SiteCallSettings {
    pub ploidy: usize,
    pub prior: GenotypePrior,

    /// Minimum site alt probability for a variant call
    pub min_alt_prob: f64,

    /// Maximum joint reference probability for a variant call
    pub max_site_pvalue: f64,

    /// Candidate allele limit per site, including the reference allele
    pub max_candidate_alleles: usize,

    /// Genotypes per sample included in the approximate normalization
    pub approx_top_genotypes: usize,

    /// Largest joint genotype combination count evaluated exactly
    pub max_exact_joint_combos: usize,

    /// Evaluate every covered position instead of only positions with non-reference evidence
    pub report_all_sites: bool,

    /// Scale applied to each observation's ln likelihood, 1 for independent reads
    pub read_dependence_factor: f64,

    /// Minimum mapping quality of a non-reference observation for the position to be evaluated
    pub min_alt_mapq: u8,

    /// Minimum base quality of a non-reference observation for the position to be evaluated
    pub min_alt_base_quality: u8,
}

impl Default for SiteCallSettings {
    fn default() -> Self {
        Self {
            ploidy: 2,
            prior: GenotypePrior::Theta(1e-3),
            min_alt_prob: 0.5,
            max_site_pvalue: 0.05,
            max_candidate_alleles: 4,
            approx_top_genotypes: 3,
            max_exact_joint_combos: 100_000,
            report_all_sites: false,
            read_dependence_factor: 1.0,
            min_alt_mapq: 30,
            min_alt_base_quality: 20,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SampleCall {
    pub genotype: Genotype,

    /// Phred-scaled probability that the genotype is wrong
    pub gq: i32,

    /// Number of observations from the sample at this site
    pub depth: usize,
}

#[derive(Clone, Debug)]
pub struct SiteCall {
    pub chrom_index: usize,
    pub pos: i64,
    pub ref_base: u8,

    /// Reference allele first, followed by the alternate alleles
    pub candidates: Vec<AlleleKey>,

    /// Indexed by sample, None for samples without observations
    pub samples: Vec<Option<SampleCall>>,

    /// ln probability that every sample is homozygous reference
    pub ln_joint_ref_prob: f64,

    pub alt_prob: f64,

    /// Phred-scaled joint reference probability
    pub qual: f64,

    pub ln_normalization: f64,

    /// False if the normalization factor was approximated
    pub exact_normalization: bool,

    /// ln posterior probability of the reported joint genotype
    pub ln_best_joint_posterior: f64,

    /// Number of genotype likelihoods with a term replaced by the probability floor
    pub floored_count: usize,

    pub is_variant: bool,
}

/// Test whether the joint combination count genotype_count^sample_count is within limit
fn is_exact_tractable(genotype_count: usize, sample_count: usize, limit: usize) -> bool {
    let Ok(sample_count) = u32::try_from(sample_count) else {
        return false;
    };
    genotype_count
        .checked_pow(sample_count)
        .is_some_and(|x| x <= limit)
}

/// Genotype every sample at one position and evaluate the site for a variant call
///
/// Returns None when the position is not evaluated: no sample has observations, or no
/// non-reference observation passes the alt evidence quality thresholds and all-site reporting
/// is off.
///
pub fn call_site(
    site: &PositionAlleles,
    arena: &AlleleArena,
    sample_count: usize,
    settings: &SiteCallSettings,
) -> Option<SiteCall> {
    let observations = site
        .sample_groups
        .iter()
        .map(|(&sample_index, ids)| {
            let alleles = ids.iter().map(|&id| &arena[id]).collect::<Vec<&Allele>>();
            (sample_index, alleles)
        })
        .filter(|(_, alleles)| !alleles.is_empty())
        .collect::<Vec<_>>();

    if observations.is_empty() {
        return None;
    }

    let ref_allele = AlleleKey::reference(site.pos, site.ref_base);
    let has_alt_evidence = observations
        .iter()
        .flat_map(|(_, alleles)| alleles.iter())
        .any(|x| {
            !ref_allele.matches(x)
                && x.map_quality >= settings.min_alt_mapq
                && x.quality >= settings.min_alt_base_quality
        });
    if !has_alt_evidence && !settings.report_all_sites {
        return None;
    }

    let candidates = get_candidate_alleles(
        ref_allele,
        observations.iter().flat_map(|(_, alleles)| alleles.iter().copied()),
        settings.max_candidate_alleles,
    );
    let genotypes = enumerate_genotypes(candidates.len(), settings.ploidy);
    let ln_priors = settings.prior.ln_priors(&genotypes);

    let mut floored_count = 0;
    let probs_by_sample = observations
        .iter()
        .map(|(_, alleles)| {
            let lhoods = prob_observed_alleles_given_genotypes(
                alleles,
                &genotypes,
                &candidates,
                settings.read_dependence_factor,
            );
            floored_count += lhoods.floored_count;
            lhoods.ln_probs()
        })
        .collect::<Vec<_>>();

    let exact_normalization = is_exact_tractable(
        genotypes.len(),
        probs_by_sample.len(),
        settings.max_exact_joint_combos,
    );
    let ln_normalization = if exact_normalization {
        bayesian_normalization_factor(&ln_priors, &probs_by_sample)
    } else {
        approximate_bayesian_normalization_factor(
            &genotypes,
            &ln_priors,
            &probs_by_sample,
            settings.approx_top_genotypes,
        )
    };

    let best =
        most_likely_genotypes_given_observations(&genotypes, &ln_priors, &probs_by_sample, false);
    let ln_best_joint_posterior =
        (best.iter().map(|(_, score)| score).sum::<f64>() - ln_normalization).min(0.0);

    // The hom-ref genotype is always first in enumeration order
    debug_assert!(genotypes[0].is_hom_ref());
    let mut ln_joint_ref_prob = 0.0;
    let mut samples = vec![None; sample_count];
    for (((sample_index, alleles), probs), (best_index, _)) in
        observations.iter().zip(probs_by_sample.iter()).zip(best)
    {
        let posteriors = sample_genotype_posteriors(probs, &ln_priors);
        ln_joint_ref_prob += posteriors[0];
        if *sample_index >= samples.len() {
            samples.resize(*sample_index + 1, None);
        }
        let gq = ln_error_prob_to_qphred(ln_complement(posteriors[best_index]));
        samples[*sample_index] = Some(SampleCall {
            genotype: genotypes[best_index].clone(),
            gq: gq.min(MAX_GENOTYPE_QUAL),
            depth: alleles.len(),
        });
    }
    let ln_joint_ref_prob = ln_joint_ref_prob.min(0.0);

    let alt_prob = -ln_joint_ref_prob.exp_m1();
    let qual = if ln_joint_ref_prob < 0.0 {
        ln_error_prob_to_phred(ln_joint_ref_prob).min(MAX_SITE_QUAL)
    } else {
        0.0
    };
    let is_variant =
        alt_prob >= settings.min_alt_prob && ln_joint_ref_prob.exp() <= settings.max_site_pvalue;

    Some(SiteCall {
        chrom_index: site.chrom_index,
        pos: site.pos,
        ref_base: site.ref_base,
        candidates,
        samples,
        ln_joint_ref_prob,
        alt_prob,
        qual,
        ln_normalization,
        exact_normalization,
        ln_best_joint_posterior,
        floored_count,
        is_variant,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allele::{AlleleType, get_test_allele};
    use crate::registration::SampleGroups;

    /// Add observations to the arena, as (sample_index, base) pairs at position 10
    fn get_test_site(arena: &mut AlleleArena, observations: &[(usize, u8)]) -> PositionAlleles {
        let mut sample_groups = SampleGroups::new();
        for (alignment_id, &(sample_index, base)) in observations.iter().enumerate() {
            let allele_type = if base == b'A' {
                AlleleType::Reference
            } else {
                AlleleType::Substitution
            };
            let mut allele = get_test_allele(allele_type, 10, 1, &[base]);
            allele.sample_index = sample_index;
            allele.alignment_id = alignment_id as u64;
            let id = arena.insert(allele);
            sample_groups.entry(sample_index).or_default().push(id);
        }
        PositionAlleles {
            chrom_index: 0,
            pos: 10,
            ref_base: b'A',
            sample_groups,
        }
    }

    fn get_het_observations() -> Vec<(usize, u8)> {
        let mut observations = vec![(0, b'A'); 10];
        observations.extend(vec![(1, b'A'); 5]);
        observations.extend(vec![(1, b'C'); 5]);
        observations
    }

    #[test]
    fn test_het_site_call() {
        let mut arena = AlleleArena::default();
        let site = get_test_site(&mut arena, &get_het_observations());
        let call = call_site(&site, &arena, 3, &SiteCallSettings::default()).unwrap();

        assert_eq!(call.candidates.len(), 2);
        assert_eq!(call.candidates[1].to_string(), "C");
        assert!(call.exact_normalization);
        assert!(call.is_variant);
        assert!(call.alt_prob > 0.99);
        assert!(call.qual > 50.0 && call.qual <= MAX_SITE_QUAL);
        assert_eq!(call.floored_count, 0);

        let s0 = call.samples[0].as_ref().unwrap();
        assert_eq!(s0.genotype.to_string(), "0/0");
        assert_eq!(s0.depth, 10);
        let s1 = call.samples[1].as_ref().unwrap();
        assert_eq!(s1.genotype.to_string(), "0/1");
        assert_eq!(s1.depth, 10);
        assert!(s1.gq > 20 && s1.gq <= MAX_GENOTYPE_QUAL);
        assert!(call.samples[2].is_none());

        assert!(call.ln_best_joint_posterior <= 0.0);
        approx::assert_relative_eq!(call.ln_joint_ref_prob.exp(), 1.0 - call.alt_prob, epsilon = 1e-12);
    }

    #[test]
    fn test_high_depth_het_site_call() {
        let mut arena = AlleleArena::default();
        let observations = (0..1200)
            .map(|i| (0, if i % 2 == 0 { b'A' } else { b'C' }))
            .collect::<Vec<_>>();
        let site = get_test_site(&mut arena, &observations);
        let call = call_site(&site, &arena, 1, &SiteCallSettings::default()).unwrap();

        assert_eq!(call.floored_count, 0);
        assert!(call.is_variant);
        approx::assert_relative_eq!(call.qual, MAX_SITE_QUAL);

        let s0 = call.samples[0].as_ref().unwrap();
        assert_eq!(s0.genotype.to_string(), "0/1");
        assert_eq!(s0.depth, 1200);
        assert_eq!(s0.gq, MAX_GENOTYPE_QUAL);
        approx::assert_abs_diff_eq!(call.ln_best_joint_posterior, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_alt_evidence_thresholds() {
        let mut arena = AlleleArena::default();
        let site = get_test_site(&mut arena, &get_het_observations());

        // Test alleles have base quality 30 and mapping quality 60
        let settings = SiteCallSettings {
            min_alt_base_quality: 31,
            ..Default::default()
        };
        assert!(call_site(&site, &arena, 2, &settings).is_none());

        let settings = SiteCallSettings {
            min_alt_mapq: 61,
            ..Default::default()
        };
        assert!(call_site(&site, &arena, 2, &settings).is_none());

        let settings = SiteCallSettings {
            min_alt_mapq: 61,
            report_all_sites: true,
            ..Default::default()
        };
        let call = call_site(&site, &arena, 2, &settings).unwrap();
        assert_eq!(call.samples[1].as_ref().unwrap().genotype.to_string(), "0/1");
    }

    #[test]
    fn test_approximate_normalization() {
        let mut arena = AlleleArena::default();
        let site = get_test_site(&mut arena, &get_het_observations());
        let exact = call_site(&site, &arena, 2, &SiteCallSettings::default()).unwrap();

        let settings = SiteCallSettings {
            max_exact_joint_combos: 1,
            ..Default::default()
        };
        let approx_call = call_site(&site, &arena, 2, &settings).unwrap();
        assert!(!approx_call.exact_normalization);
        assert!(approx_call.ln_normalization <= exact.ln_normalization + 1e-12);

        // Genotype calls don't depend on the normalization method
        for (a, b) in approx_call.samples.iter().zip(exact.samples.iter()) {
            assert_eq!(a.as_ref().unwrap().genotype, b.as_ref().unwrap().genotype);
        }
    }

    #[test]
    fn test_reference_only_site() {
        let mut arena = AlleleArena::default();
        let site = get_test_site(&mut arena, &[(0, b'A'), (0, b'A'), (0, b'A')]);
        assert!(call_site(&site, &arena, 1, &SiteCallSettings::default()).is_none());

        let settings = SiteCallSettings {
            report_all_sites: true,
            ..Default::default()
        };
        let call = call_site(&site, &arena, 1, &settings).unwrap();
        assert_eq!(call.candidates.len(), 1);
        assert!(!call.is_variant);
        approx::assert_abs_diff_eq!(call.ln_joint_ref_prob, 0.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(call.alt_prob, 0.0, epsilon = 1e-12);
        assert_eq!(call.samples[0].as_ref().unwrap().genotype.to_string(), "0/0");
    }

    #[test]
    fn test_empty_site() {
        let arena = AlleleArena::default();
        let site = PositionAlleles {
            chrom_index: 0,
            pos: 10,
            ref_base: b'A',
            sample_groups: SampleGroups::new(),
        };
        let settings = SiteCallSettings {
            report_all_sites: true,
            ..Default::default()
        };
        assert!(call_site(&site, &arena, 1, &settings).is_none());
    }

    #[test]
    fn test_is_exact_tractable() {
        assert!(is_exact_tractable(3, 2, 9));
        assert!(!is_exact_tractable(3, 3, 9));
        assert!(!is_exact_tractable(usize::MAX, 2, usize::MAX));
    }
}
