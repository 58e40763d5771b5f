//! Hyperparameter sampling strategies.
//!
//! Sampling is a pure function of `(config, strategy, trial_index)` plus a
//! random source. `grid` is fully deterministic, `bayesian` is deterministic
//! for the learning rate and epochs, `random` is stochastic. Batch size is a
//! round-robin over the candidates for every strategy, and the optional
//! fields are drawn uniformly at random whatever the strategy.
//!
//! The config is assumed valid (see [`HyperparameterConfig::validate`]).

use pl_types::{
    Distribution, FloatRange, HyperparameterConfig, Hyperparameters, IntRange, LearningRateRange,
    SearchStrategy,
};
use rand::Rng;

/// Grid resolution used when the learning rate range names no step.
pub const DEFAULT_GRID_STEPS: usize = 3;

/// Divisor of the linear `bayesian` schedule.
const LINEAR_SCHEDULE_SPAN: f64 = 10.0;

/// Sample the hyperparameters for the trial at `trial_index` (0-based).
pub fn sample(
    config: &HyperparameterConfig,
    strategy: SearchStrategy,
    trial_index: usize,
) -> Hyperparameters {
    sample_with(&mut rand::thread_rng(), config, strategy, trial_index)
}

/// Like [`sample`], drawing randomness from `rng`.
pub fn sample_with<R: Rng + ?Sized>(
    rng: &mut R,
    config: &HyperparameterConfig,
    strategy: SearchStrategy,
    trial_index: usize,
) -> Hyperparameters {
    let learning_rate = match strategy {
        SearchStrategy::Random => random_learning_rate(rng, &config.learning_rate),
        SearchStrategy::Grid => grid_learning_rate(&config.learning_rate, trial_index),
        SearchStrategy::Bayesian => bayesian_learning_rate(&config.learning_rate, trial_index),
    };

    let batch_size = config.batch_size[trial_index % config.batch_size.len()];

    let epochs = match strategy {
        SearchStrategy::Random => rng.gen_range(config.epochs.min..=config.epochs.max),
        SearchStrategy::Grid | SearchStrategy::Bayesian => {
            scheduled_epochs(&config.epochs, trial_index)
        }
    };

    Hyperparameters {
        learning_rate,
        batch_size,
        epochs,
        warmup_steps: config.warmup_steps.map(|r| uniform_int(rng, &r)),
        weight_decay: config.weight_decay.map(|r| uniform_float(rng, &r)),
        dropout: config.dropout.map(|r| uniform_float(rng, &r)),
    }
}

// ---- Grid ----

/// Evenly spaced learning rates across `[min, max]`, `step` points (default 3).
pub fn grid_values(range: &LearningRateRange) -> Vec<f64> {
    let steps = range.step.unwrap_or(DEFAULT_GRID_STEPS).max(1);
    if steps == 1 {
        return vec![range.min];
    }
    (0..steps)
        .map(|i| {
            let t = i as f64 / (steps - 1) as f64;
            range.min + t * (range.max - range.min)
        })
        .collect()
}

/// Cycles through the grid once it is exhausted.
fn grid_learning_rate(range: &LearningRateRange, trial_index: usize) -> f64 {
    let values = grid_values(range);
    values[trial_index % values.len()]
}

// ---- Random ----

fn random_learning_rate<R: Rng + ?Sized>(rng: &mut R, range: &LearningRateRange) -> f64 {
    match range.distribution.unwrap_or_default() {
        Distribution::LogUniform => {
            let log_low = range.min.ln();
            let log_high = range.max.ln();
            let log_val: f64 = rng.gen_range(log_low..=log_high);
            log_val.exp()
        }
        Distribution::Uniform => rng.gen_range(range.min..=range.max),
    }
}

fn uniform_int<R: Rng + ?Sized>(rng: &mut R, range: &IntRange) -> u32 {
    rng.gen_range(range.min..=range.max)
}

fn uniform_float<R: Rng + ?Sized>(rng: &mut R, range: &FloatRange) -> f64 {
    rng.gen_range(range.min..=range.max)
}

// ---- Bayesian (linear placeholder) ----

/// `min + (trial_index / 10) * (max - min)`. Grows past `max` after the
/// tenth trial; kept as-is until a real surrogate model replaces it.
fn bayesian_learning_rate(range: &LearningRateRange, trial_index: usize) -> f64 {
    range.min + (trial_index as f64 / LINEAR_SCHEDULE_SPAN) * (range.max - range.min)
}

/// `min + floor((trial_index / 10) * (max - min))`, shared by grid and bayesian.
fn scheduled_epochs(range: &IntRange, trial_index: usize) -> u32 {
    let span = f64::from(range.max - range.min);
    let offset = ((trial_index as f64 / LINEAR_SCHEDULE_SPAN) * span).floor();
    (f64::from(range.min) + offset) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn lr(min: f64, max: f64, step: Option<usize>) -> LearningRateRange {
        LearningRateRange {
            min,
            max,
            step,
            distribution: None,
        }
    }

    fn sample_config() -> HyperparameterConfig {
        HyperparameterConfig::new(
            lr(0.01, 0.1, Some(3)),
            vec![8, 16],
            IntRange { min: 1, max: 11 },
        )
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn grid_scenario_walks_the_learning_rate_grid() {
        let config = sample_config();
        let expected = [(0.01, 8), (0.055, 16), (0.1, 8)];
        for (index, (rate, batch)) in expected.iter().enumerate() {
            let params = sample(&config, SearchStrategy::Grid, index);
            assert!(approx(params.learning_rate, *rate), "trial {index}: {}", params.learning_rate);
            assert_eq!(params.batch_size, *batch);
        }
    }

    #[test]
    fn grid_is_deterministic_and_cycles() {
        let config = sample_config();
        for index in 0..12 {
            let a = sample(&config, SearchStrategy::Grid, index);
            let b = sample(&config, SearchStrategy::Grid, index);
            assert_eq!(a.learning_rate, b.learning_rate);

            let wrapped = sample(&config, SearchStrategy::Grid, index + 3);
            assert_eq!(a.learning_rate, wrapped.learning_rate);
        }
    }

    #[test]
    fn grid_defaults_to_three_points() {
        let values = grid_values(&lr(0.0, 1.0, None));
        assert_eq!(values, vec![0.0, 0.5, 1.0]);

        let single = grid_values(&lr(0.2, 0.4, Some(1)));
        assert_eq!(single, vec![0.2]);
    }

    #[test]
    fn batch_size_round_robin_for_every_strategy() {
        let mut config = sample_config();
        config.batch_size = vec![4, 8, 32];
        let mut rng = StdRng::seed_from_u64(7);
        for strategy in [SearchStrategy::Grid, SearchStrategy::Random, SearchStrategy::Bayesian] {
            for index in 0..9 {
                let params = sample_with(&mut rng, &config, strategy, index);
                assert_eq!(params.batch_size, config.batch_size[index % 3]);
            }
        }
    }

    #[test]
    fn random_search_respects_bounds() {
        let config = sample_config();
        let mut rng = StdRng::seed_from_u64(42);
        for index in 0..200 {
            let params = sample_with(&mut rng, &config, SearchStrategy::Random, index);
            assert!(params.learning_rate >= 0.01 && params.learning_rate <= 0.1);
            assert!(params.epochs >= 1 && params.epochs <= 11);
        }
    }

    #[test]
    fn log_uniform_stays_in_bounds() {
        let mut config = sample_config();
        config.learning_rate = LearningRateRange {
            min: 1e-5,
            max: 1e-1,
            step: None,
            distribution: Some(Distribution::LogUniform),
        };
        let mut rng = StdRng::seed_from_u64(3);
        let mut below_geometric_mean = 0;
        for index in 0..400 {
            let v = sample_with(&mut rng, &config, SearchStrategy::Random, index).learning_rate;
            assert!(v >= 1e-5 * 0.999_999 && v <= 1e-1 * 1.000_001, "lr out of bounds: {v}");
            if v < 1e-3 {
                below_geometric_mean += 1;
            }
        }
        // Log-uniform puts half the mass under the geometric mean.
        assert!(below_geometric_mean > 120 && below_geometric_mean < 280);
    }

    #[test]
    fn bayesian_is_a_linear_schedule() {
        let config = sample_config();
        let first = sample(&config, SearchStrategy::Bayesian, 0);
        assert!(approx(first.learning_rate, 0.01));

        let fifth = sample(&config, SearchStrategy::Bayesian, 5);
        assert!(approx(fifth.learning_rate, 0.055));

        // Overshoots the range past the tenth trial.
        let late = sample(&config, SearchStrategy::Bayesian, 20);
        assert!(approx(late.learning_rate, 0.19));
    }

    #[test]
    fn scheduled_epochs_follow_trial_index() {
        let config = sample_config();
        let epochs: Vec<u32> = [0, 1, 5, 10, 15]
            .iter()
            .map(|&i| sample(&config, SearchStrategy::Grid, i).epochs)
            .collect();
        assert_eq!(epochs, vec![1, 2, 6, 11, 16]);

        let bayes = sample(&config, SearchStrategy::Bayesian, 5);
        assert_eq!(bayes.epochs, 6);
    }

    #[test]
    fn optional_fields_sampled_for_every_strategy() {
        let config = sample_config()
            .with_warmup_steps(100, 200)
            .with_weight_decay(0.0, 0.1)
            .with_dropout(0.1, 0.3);
        let mut rng = StdRng::seed_from_u64(11);
        for strategy in [SearchStrategy::Grid, SearchStrategy::Random, SearchStrategy::Bayesian] {
            let params = sample_with(&mut rng, &config, strategy, 0);
            let warmup = params.warmup_steps.unwrap();
            assert!((100..=200).contains(&warmup));
            let decay = params.weight_decay.unwrap();
            assert!((0.0..=0.1).contains(&decay));
            let dropout = params.dropout.unwrap();
            assert!((0.1..=0.3).contains(&dropout));
        }

        let bare = sample(&sample_config(), SearchStrategy::Random, 0);
        assert!(bare.warmup_steps.is_none());
        assert!(bare.weight_decay.is_none());
        assert!(bare.dropout.is_none());
    }

    #[test]
    fn seeded_random_search_is_reproducible() {
        let config = sample_config().with_dropout(0.0, 0.5);
        let mut a = StdRng::seed_from_u64(99);
        let mut b = StdRng::seed_from_u64(99);
        for index in 0..5 {
            assert_eq!(
                sample_with(&mut a, &config, SearchStrategy::Random, index),
                sample_with(&mut b, &config, SearchStrategy::Random, index)
            );
        }
    }
}
