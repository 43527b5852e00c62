extern crate anyhow;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_span_masking::common::random::RandomSource;
use rust_span_masking::pipelines::span_corruption::{
    SpanCorruptionConfig, SpanCorruptionGenerator, SpanRegimeConfig,
};
use rust_span_masking::span_masking::{
    BatchShape, CorruptionAssignment, LengthProfile, ProtectedTokens, TokenBatch,
};
use rust_span_masking::{Config, SpanMaskingError};
use rust_tokenizers::vocab::{BertVocab, Vocab};
use std::convert::TryFrom;
use std::io::Write;
use tch::{Kind, Tensor};

fn single_regime_generator() -> anyhow::Result<SpanCorruptionGenerator> {
    let config = SpanCorruptionConfig {
        regimes: vec![SpanRegimeConfig::new(3, 0.3)],
        mask_token_id: 103,
        vocab_size: 30522,
        ..Default::default()
    };
    Ok(SpanCorruptionGenerator::new(config)?)
}

#[test]
fn span_corruption_is_reproducible() -> anyhow::Result<()> {
    //    Set-up generator
    let generator = single_regime_generator()?;
    let input_ids =
        Tensor::from_slice(&[101i64, 7592, 2088, 2003, 1037, 3231, 6251, 2000, 2202, 102])
            .view([1, 10]);
    let input_mask = Tensor::ones_like(&input_ids);

    //    Run twice from the same seed
    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let first = generator.generate(&input_ids, &input_mask, None, &mut rng)?;
    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let second = generator.generate(&input_ids, &input_mask, None, &mut rng)?;

    //    Compare outputs
    assert_eq!(
        Vec::<i64>::try_from(&first.input_ids.view([-1]))?,
        Vec::<i64>::try_from(&second.input_ids.view([-1]))?
    );
    assert_eq!(
        Vec::<i64>::try_from(&first.touched_mask.view([-1]))?,
        Vec::<i64>::try_from(&second.touched_mask.view([-1]))?
    );
    assert_eq!(first.mask_ratio, second.mask_ratio);
    Ok(())
}

#[test]
fn explicit_random_sources_are_reproducible() -> anyhow::Result<()> {
    let generator = SpanCorruptionGenerator::new(SpanCorruptionConfig {
        regimes: vec![
            SpanRegimeConfig::new(1, 0.15),
            SpanRegimeConfig::new(3, 0.15),
            SpanRegimeConfig::new(10, 0.15),
        ],
        regime_prior: Some(vec![0.3, 0.3, 0.3, 0.1]),
        ..Default::default()
    })?;
    let shape = BatchShape::new(16, 64);
    let input_ids = (0..shape.numel())
        .map(|index| 1000 + (index as i64 * 7919) % 29000)
        .collect::<Vec<i64>>();
    let batch = TokenBatch::new(shape, input_ids, vec![true; shape.numel()], None)?;

    let first = generator.generate_batch(&batch, RandomSource::new(3))?;
    let second = generator.generate_batch(&batch, RandomSource::new(3))?;
    let other = generator.generate_batch(&batch, RandomSource::new(4))?;

    assert_eq!(first.corrupted_ids(), second.corrupted_ids());
    assert_eq!(first.regime_choices, second.regime_choices);
    assert_eq!(first.touched_mask(), second.touched_mask());
    assert_ne!(first.span_mask, other.span_mask);
    Ok(())
}

#[test]
fn shape_mismatch_leaves_rng_untouched() -> anyhow::Result<()> {
    let generator = single_regime_generator()?;
    let input_ids = Tensor::from_slice(&[101i64, 2023, 2003, 102, 0, 0]).view([2, 3]);
    let input_mask = Tensor::from_slice(&[1i64, 1, 1, 1]).view([2, 2]);

    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let mut reference = rng.clone();
    let result = generator.generate(&input_ids, &input_mask, None, &mut rng);

    assert!(matches!(
        result,
        Err(SpanMaskingError::ShapeMismatchError(_))
    ));
    assert_eq!(rng.next_u64(), reference.next_u64());
    Ok(())
}

#[test]
fn outputs_follow_input_layout() -> anyhow::Result<()> {
    let generator = SpanCorruptionGenerator::new(SpanCorruptionConfig {
        regimes: vec![
            SpanRegimeConfig::new(3, 0.3),
            SpanRegimeConfig::new(6, 0.3),
        ],
        ..Default::default()
    })?;
    let input_ids = Tensor::from_slice(&[
        101i64, 7592, 2088, 2003, 2307, 102, 0, 0, //
        101, 2023, 2003, 1037, 2936, 6251, 1012, 102,
    ])
    .view([2, 8]);
    let input_mask =
        Tensor::from_slice(&[1i64, 1, 1, 1, 1, 1, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1]).view([2, 8]);

    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let output = generator.generate(&input_ids, &input_mask, None, &mut rng)?;

    assert_eq!(output.input_ids.size(), vec![2, 8]);
    assert_eq!(output.touched_mask.size(), vec![2, 8]);
    assert_eq!(output.span_mask.size(), vec![2, 8]);
    assert_eq!(output.regime_choices.size(), vec![2]);
    assert_eq!(output.input_ids.kind(), Kind::Int64);
    assert_eq!(output.touched_mask.kind(), Kind::Int64);
    assert!(output.mask_ratio >= 0.0 && output.mask_ratio <= 1.0);

    let original = Vec::<i64>::try_from(&input_ids.view([-1]))?;
    let corrupted = Vec::<i64>::try_from(&output.input_ids.view([-1]))?;
    let touched = Vec::<i64>::try_from(&output.touched_mask.view([-1]))?;
    for index in 0..original.len() {
        if [0, 101, 102].contains(&original[index]) {
            assert_eq!(touched[index], 0);
        }
        if touched[index] == 0 {
            assert_eq!(corrupted[index], original[index]);
        }
    }
    let choices = Vec::<i64>::try_from(&output.regime_choices)?;
    assert!(choices.iter().all(|choice| (0..3).contains(choice)));
    Ok(())
}

#[test]
fn special_tokens_mask_protects_positions() -> anyhow::Result<()> {
    let generator = SpanCorruptionGenerator::new(SpanCorruptionConfig {
        regimes: vec![SpanRegimeConfig::new(4, 0.6)],
        uniform_mask_probability: 0.6,
        ..Default::default()
    })?;
    let shape = BatchShape::new(32, 32);
    let input_ids = vec![5000i64; shape.numel()];
    let special_tokens_mask = (0..shape.numel())
        .map(|index| index % 2 == 0)
        .collect::<Vec<bool>>();
    let batch = TokenBatch::new(
        shape,
        input_ids,
        vec![true; shape.numel()],
        Some(special_tokens_mask.clone()),
    )?;

    let corrupted = generator.generate_batch(&batch, RandomSource::new(21))?;

    assert!(corrupted.touched_mask().count() > 0);
    for (touched, special) in corrupted
        .touched_mask()
        .values()
        .iter()
        .zip(special_tokens_mask.iter())
    {
        assert!(!(*touched && *special));
    }
    Ok(())
}

#[test]
fn corruption_split_matches_configuration() -> anyhow::Result<()> {
    let generator = SpanCorruptionGenerator::new(SpanCorruptionConfig {
        regimes: vec![SpanRegimeConfig::new(5, 0.3)],
        regime_prior: Some(vec![1.0, 0.0]),
        ..Default::default()
    })?;
    let shape = BatchShape::new(2_000, 128);
    let input_ids = vec![2000i64; shape.numel()];
    let batch = TokenBatch::new(shape, input_ids, vec![true; shape.numel()], None)?;

    let corrupted = generator.generate_batch(&batch, RandomSource::new(77))?;
    let corruption = &corrupted.corruption;
    let touched = corruption.touched_mask.count() as f64;

    assert!(corrupted.regime_choices.iter().all(|choice| *choice == 0));
    assert!((corruption.mask_ratio() - 0.3).abs() < 0.01);
    let masked = corruption.count(CorruptionAssignment::ReplaceWithMask) as f64 / touched;
    let random = corruption.count(CorruptionAssignment::ReplaceWithRandom) as f64 / touched;
    let kept = corruption.count(CorruptionAssignment::KeepOriginal) as f64 / touched;
    assert!((masked - 0.8).abs() < 0.01);
    assert!((random - 0.1).abs() < 0.01);
    assert!((kept - 0.1).abs() < 0.01);
    Ok(())
}

#[test]
fn generator_config_from_file() -> anyhow::Result<()> {
    let mut config_file = tempfile::NamedTempFile::new()?;
    write!(
        config_file,
        r#"{{
            "regimes": [
                {{"max_span_length": 1, "mask_fraction": 0.15}},
                {{"max_span_length": 10, "mask_fraction": 0.15,
                  "length_profile": {{"type": "geometric", "success_probability": 0.3}}}}
            ],
            "uniform_mask_probability": 0.15,
            "regime_prior": [0.45, 0.45, 0.1],
            "corruption": {{"mask_token_probability": 0.9, "random_token_probability": 0.05}}
        }}"#
    )?;

    let config = SpanCorruptionConfig::from_file(config_file.path())?;

    assert_eq!(config.regimes.len(), 2);
    assert_eq!(
        config.regimes[1].length_profile,
        LengthProfile::Geometric {
            success_probability: 0.3
        }
    );
    assert_eq!(config.corruption.mask_token_probability, 0.9);
    assert_eq!(config.mask_token_id, 103);

    let generator = SpanCorruptionGenerator::new(config)?;
    assert_eq!(generator.mixer().num_regimes(), 3);
    assert_eq!(generator.policy().config().random_token_probability, 0.05);
    Ok(())
}

#[test]
fn missing_config_file_is_an_io_error() {
    let result = SpanCorruptionConfig::from_file("/nonexistent/span_corruption.json");

    assert!(matches!(result, Err(SpanMaskingError::IOError(_))));
}

#[test]
fn protected_tokens_from_bert_vocabulary() -> anyhow::Result<()> {
    let mut vocab_file = tempfile::NamedTempFile::new()?;
    write!(
        vocab_file,
        "[PAD]\n[UNK]\n[CLS]\n[SEP]\n[MASK]\nhello\nworld\n"
    )?;
    let vocab = BertVocab::from_file(vocab_file.path())?;

    let protected_tokens = ProtectedTokens::from_bert_vocab(&vocab);
    assert_eq!(protected_tokens.ids(), &[0, 1, 2, 3]);

    let generator = SpanCorruptionGenerator::new(SpanCorruptionConfig {
        mask_token_id: vocab.token_to_id(vocab.get_mask_value()),
        vocab_size: vocab.values().len() as i64,
        ..Default::default()
    })?
    .with_protected_tokens(protected_tokens.clone());
    assert_eq!(generator.protected_tokens(), &protected_tokens);
    assert_eq!(generator.policy().mask_token_id(), 4);
    Ok(())
}
