//! Counting genotypes.

use crate::{FormatError, Result};

/// Exact binomial coefficient `C(n, k)`, or `None` if it does not fit in a `u64`.
pub fn n_choose_k(n: u64, k: u64) -> Option<u64> {
    if k > n {
        return Some(0);
    }
    let k = k.min(n - k);
    let mut result: u64 = 1;
    for i in 1..=k {
        // result holds C(n - k + i - 1, i - 1); the product is divisible by i
        result = result.checked_mul(n - k + i)? / i;
    }
    Some(result)
}

/// Number of distinct unordered genotypes of a sample with the given ploidy
/// at a variant with `number_of_alleles` alleles, i.e.
/// `C(ploidy + number_of_alleles - 1, number_of_alleles - 1)`.
///
/// ```
/// use bgen_codec::genotype_count;
/// assert_eq!(genotype_count(2, 2).unwrap(), 3);
/// assert_eq!(genotype_count(1, 2).unwrap(), 2);
/// assert_eq!(genotype_count(2, 3).unwrap(), 6);
/// assert!(genotype_count(2, 0).is_err());
/// ```
pub fn genotype_count(ploidy: u32, number_of_alleles: u32) -> Result<u32> {
    if number_of_alleles == 0 {
        Err(FormatError::AlleleCount {
            number_of_alleles,
        })?;
    }
    let n = ploidy as u64 + number_of_alleles as u64 - 1;
    let k = number_of_alleles as u64 - 1;
    let count = n_choose_k(n, k)
        .and_then(|c| u32::try_from(c).ok())
        .ok_or(FormatError::GenotypeCountOverflow {
            ploidy,
            number_of_alleles,
        })?;
    Ok(count)
}

/// Number of probabilities carried by one sample: `ploidy * K` for phased
/// data, the number of unordered genotypes otherwise.
pub fn value_count(ploidy: u32, number_of_alleles: u32, phased: bool) -> Result<u32> {
    if phased {
        ploidy
            .checked_mul(number_of_alleles)
            .ok_or(FormatError::GenotypeCountOverflow {
                ploidy,
                number_of_alleles,
            })
            .map_err(Into::into)
    } else {
        genotype_count(ploidy, number_of_alleles)
    }
}
