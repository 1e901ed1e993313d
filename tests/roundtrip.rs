use bgen_codec::v12::ProbabilityDataWriter;
use bgen_codec::*;
use std::io::Cursor;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn variant(position: u32, alleles: &[&str]) -> VariantIdentifyingData {
    VariantIdentifyingData {
        snpid: format!("SNPID_{position}"),
        rsid: format!("RSID_{position}"),
        chromosome: "01".into(),
        position,
        alleles: alleles.iter().map(|a| a.to_string()).collect(),
    }
}

/// Deterministic genotype probabilities that sum to one.
fn probabilities(variant: usize, sample: usize) -> [f64; 3] {
    let x = ((variant * 31 + sample * 17) % 101) as f64 / 100.0;
    let y = (1.0 - x) * (((variant + sample) % 7) as f64 / 7.0);
    [x, y, 1.0 - x - y]
}

fn write_file(context: Context, n_variants: usize, bits: u8) -> Vec<u8> {
    let n = context.number_of_samples as usize;
    let ids: Vec<String> = (0..n).map(|i| format!("sample_{i:03}")).collect();
    let mut writer = BgenWriter::new(Vec::new(), context, &ids).unwrap();
    for v in 0..n_variants {
        writer
            .write_diploid_variant(
                &variant(1000 + v as u32, &["A", "G"]),
                |i| probabilities(v, i)[0],
                |i| probabilities(v, i)[1],
                |i| probabilities(v, i)[2],
                bits,
            )
            .unwrap();
    }
    writer.into_inner().unwrap()
}

#[test]
fn whole_file_roundtrip_for_every_layout() {
    init_logging();
    for layout in [Layout::V10, Layout::V11, Layout::V12] {
        for compression in [Compression::None, Compression::Zlib] {
            let mut context = Context::new(25, layout, compression).with_sample_identifiers();
            context.number_of_variants = 8;
            context.free_data = b"roundtrip".to_vec();
            let bytes = write_file(context.clone(), 8, 16);

            let mut reader = BgenReader::from_reader(Cursor::new(bytes));
            assert_eq!(reader.read_header().unwrap(), &context);
            assert_eq!(reader.sample_ids()[24], "sample_024");

            // 16 bits in layout 1.2, a full u16 before
            let tolerance = 1.0 / 65535.0;
            let mut id = VariantIdentifyingData::default();
            let mut probs = GenotypeProbabilities::default();
            let mut v = 0;
            while reader.read_variant(&mut id).unwrap() {
                assert_eq!(id, variant(1000 + v as u32, &["A", "G"]));
                reader.read_probabilities(&mut probs).unwrap();
                assert_eq!(probs.number_of_samples(), 25);
                for i in 0..25 {
                    let got = probs.sample(i).unwrap();
                    for (g, want) in got.iter().zip(probabilities(v, i)) {
                        assert!((g - want).abs() <= tolerance, "{layout:?} {v} {i}");
                    }
                }
                v += 1;
            }
            assert_eq!(v, 8);
        }
    }
}

#[test]
fn batches_match_sequential_reads() {
    init_logging();
    let mut context = Context::new(40, Layout::V12, Compression::Zlib);
    context.number_of_variants = 11;
    let bytes = write_file(context, 11, 10);

    let mut sequential = vec![];
    let mut reader = BgenReader::from_reader(Cursor::new(bytes.clone()));
    reader.read_header().unwrap();
    let mut id = VariantIdentifyingData::default();
    let mut probs = GenotypeProbabilities::default();
    while reader.read_variant(&mut id).unwrap() {
        reader.read_probabilities(&mut probs).unwrap();
        sequential.push((id.position, probs.sample(7).unwrap().to_vec()));
    }

    let mut batched = vec![];
    let mut reader = BgenReader::from_reader(Cursor::new(bytes));
    let context = reader.read_header().unwrap().clone();
    let mut batch = VariantBatch::default();
    while reader.read_batch(&mut batch, 4).unwrap() > 0 {
        assert!(batch.len() <= 4);
        for block in batch.blocks() {
            block.parse(&context, &mut probs).unwrap();
            batched.push((block.id.position, probs.sample(7).unwrap().to_vec()));
        }
    }
    assert_eq!(sequential, batched);
}

#[test]
fn multiallelic_phased_and_mixed_ploidy() {
    init_logging();
    let mut context = Context::new(3, Layout::V12, Compression::Zlib);
    context.number_of_variants = 1;
    let id = variant(77, &["A", "C", "T"]);

    // haploid, diploid and triploid samples; the diploid one is missing
    let haplotypes: [(u32, Vec<f64>, bool); 3] = [
        (1, vec![0.1, 0.2, 0.7], false),
        (2, vec![0.0; 6], true),
        (3, vec![1.0, 0.0, 0.0, 0.5, 0.5, 0.0, 0.25, 0.25, 0.5], false),
    ];
    let mut data = Vec::new();
    let mut encoder = ProbabilityDataWriter::new(&mut data, 12).unwrap();
    encoder.initialise(3, 3).unwrap();
    for (i, (ploidy, values, missing)) in haplotypes.iter().enumerate() {
        encoder.set_sample(i as u32).unwrap();
        encoder
            .set_number_of_entries(
                *ploidy,
                values.len() as u32,
                OrderType::PerPhasedHaplotypePerAllele,
                ValueType::Probability,
            )
            .unwrap();
        for (j, v) in values.iter().enumerate() {
            let value = if *missing {
                Value::Missing
            } else {
                Value::Probability(*v)
            };
            encoder.set_value(j as u32, value).unwrap();
        }
    }
    encoder.finalise().unwrap();

    let mut writer = BgenWriter::new(Vec::new(), context, &[]).unwrap();
    writer.write_variant(&id, &data).unwrap();
    let bytes = writer.into_inner().unwrap();

    let mut reader = BgenReader::from_reader(Cursor::new(bytes));
    reader.read_header().unwrap();
    let mut parsed = VariantIdentifyingData::default();
    assert!(reader.read_variant(&mut parsed).unwrap());
    assert_eq!(parsed, id);
    let mut probs = GenotypeProbabilities::default();
    reader.read_probabilities(&mut probs).unwrap();
    assert_eq!(probs.order_type(), Some(OrderType::PerPhasedHaplotypePerAllele));
    assert_eq!(probs.min_max_ploidy(), Some((1, 3)));
    assert!(probs.is_missing(1));
    assert_eq!(probs.sample(1).unwrap().len(), 6);
    for i in [0, 2] {
        let got = probs.sample(i).unwrap();
        assert_eq!(got.len(), haplotypes[i].1.len());
        for (g, want) in got.iter().zip(haplotypes[i].1.iter()) {
            assert!((g - want).abs() <= 1.0 / 4095.0);
        }
    }
    assert!(!reader.read_variant(&mut parsed).unwrap());
}

#[test]
fn truncated_file_is_a_format_error() {
    init_logging();
    let mut context = Context::new(5, Layout::V12, Compression::Zlib);
    context.number_of_variants = 2;
    let bytes = write_file(context, 2, 8);
    let cut = bytes.len() - 3;

    let mut reader = BgenReader::from_reader(Cursor::new(&bytes[..cut]));
    reader.read_header().unwrap();
    let mut id = VariantIdentifyingData::default();
    let mut probs = GenotypeProbabilities::default();
    assert!(reader.read_variant(&mut id).unwrap());
    reader.read_probabilities(&mut probs).unwrap();
    assert!(reader.read_variant(&mut id).unwrap());
    assert!(matches!(
        reader.read_probabilities(&mut probs),
        Err(Error::Format(FormatError::Truncated { .. }))
    ));
}

#[test]
fn reading_from_a_file() {
    init_logging();
    let mut context = Context::new(4, Layout::V11, Compression::Zlib).with_sample_identifiers();
    context.number_of_variants = 3;
    let bytes = write_file(context, 3, 16);
    let path = std::env::temp_dir().join(format!("bgen_codec_{}.bgen", std::process::id()));
    std::fs::write(&path, bytes).unwrap();

    let mut reader = BgenReader::from_path(&path).unwrap();
    reader.read_header().unwrap();
    let mut id = VariantIdentifyingData::default();
    let mut count = 0;
    while reader.read_variant(&mut id).unwrap() {
        reader.ignore_probabilities().unwrap();
        count += 1;
    }
    assert_eq!(count, 3);
    std::fs::remove_file(&path).unwrap();
}
