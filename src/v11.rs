//! Probability data of layouts 1.0 and 1.1: three little-endian u16 per
//! sample, one for each genotype of a diploid biallelic variant.

use byteorder::{ByteOrder, LittleEndian};

use crate::setter::{OrderType, Setter, Value, ValueType};
use crate::{Context, FormatError, Result};

const PLOIDY: u32 = 2;
const VALUES_PER_SAMPLE: usize = 3;
const BYTES_PER_SAMPLE: usize = 2 * VALUES_PER_SAMPLE;

/// Size in bytes of an uncompressed block for `number_of_samples` samples.
pub fn block_size(number_of_samples: u32) -> usize {
    BYTES_PER_SAMPLE * number_of_samples as usize
}

pub fn convert_from_integer_representation(number: u16, factor: f64) -> f64 {
    number as f64 / factor
}

/// Scale, clamp to the u16 range and round half away from zero.
pub fn convert_to_integer_representation(number: f64, factor: f64) -> u16 {
    (number * factor).clamp(0.0, 65535.0).round() as u16
}

/// Decode a block of layout 1.0 or 1.1 probability data.
///
/// The block must hold exactly six bytes per sample; otherwise nothing is
/// reported to the setter.
pub fn parse_probability_data<S>(buffer: &[u8], context: &Context, setter: &mut S) -> Result<()>
where
    S: Setter + ?Sized,
{
    let expected = block_size(context.number_of_samples);
    if buffer.len() != expected {
        Err(FormatError::BlockLength {
            expected,
            found: buffer.len(),
        })?;
    }
    let factor = context.probability_conversion_factor()?;

    setter.initialise(context.number_of_samples, 2)?;
    setter.set_min_max_ploidy(PLOIDY, PLOIDY, 3, 3)?;
    for (i, chunk) in buffer.chunks_exact(BYTES_PER_SAMPLE).enumerate() {
        if !setter.set_sample(i as u32)? {
            continue;
        }
        setter.set_number_of_entries(
            PLOIDY,
            VALUES_PER_SAMPLE as u32,
            OrderType::PerUnorderedGenotype,
            ValueType::Probability,
        )?;
        for g in 0..VALUES_PER_SAMPLE {
            let stored = LittleEndian::read_u16(&chunk[2 * g..2 * g + 2]);
            let value = convert_from_integer_representation(stored, factor);
            setter.set_value(g as u32, Value::Probability(value))?;
        }
    }
    setter.finalise()
}

/// Encode one triple of genotype probabilities per sample, appending
/// `6 * number_of_samples` bytes to `buffer`.
pub fn write_uncompressed_snp_probability_data<AA, AB, BB>(
    buffer: &mut Vec<u8>,
    context: &Context,
    get_aa_probability: AA,
    get_ab_probability: AB,
    get_bb_probability: BB,
) -> Result<()>
where
    AA: Fn(usize) -> f64,
    AB: Fn(usize) -> f64,
    BB: Fn(usize) -> f64,
{
    let factor = context.probability_conversion_factor()?;
    let start = buffer.len();
    buffer.resize(start + block_size(context.number_of_samples), 0u8);
    for (i, chunk) in buffer[start..]
        .chunks_exact_mut(BYTES_PER_SAMPLE)
        .enumerate()
    {
        let probs = [
            get_aa_probability(i),
            get_ab_probability(i),
            get_bb_probability(i),
        ];
        for (g, p) in probs.iter().enumerate() {
            LittleEndian::write_u16(
                &mut chunk[2 * g..2 * g + 2],
                convert_to_integer_representation(*p, factor),
            );
        }
    }
    Ok(())
}
