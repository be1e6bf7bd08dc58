//! Serializable backoff presets
//!
//! [`Backoff`] describes a strategy as data so it can live in configuration
//! files and named preset tables. Call [`Backoff::strategy`] to obtain a fresh,
//! run-scoped strategy instance.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BackoffError;
use crate::strategy::{
    ArrayDelay, DecorrelatedJitter, ExponentialBackoff, FibonacciBackoff, FixedDelay,
    LinearBackoff, RetryStrategy,
};
use crate::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS};

/// A backoff strategy described as configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay after every attempt
    Fixed {
        #[serde(default = "default_base")]
        delay_ms: u64,
    },

    /// Delay grows by a constant increment
    Linear {
        #[serde(default = "default_base", alias = "base")]
        base_ms: u64,
        #[serde(default = "default_base", alias = "increment")]
        increment_ms: u64,
        #[serde(default = "default_max", alias = "max")]
        max_ms: u64,
    },

    /// Delay grows geometrically
    Exponential {
        #[serde(default = "default_base", alias = "base")]
        base_ms: u64,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        #[serde(default = "default_max", alias = "max")]
        max_ms: u64,
    },

    /// Delay follows the fibonacci sequence
    Fibonacci {
        #[serde(default = "default_base", alias = "base")]
        base_ms: u64,
        #[serde(default = "default_max", alias = "max")]
        max_ms: u64,
    },

    /// Randomized delay decorrelated from the attempt count
    DecorrelatedJitter {
        #[serde(default = "default_base", alias = "base")]
        base_ms: u64,
        #[serde(default = "default_max", alias = "max")]
        max_ms: u64,
    },

    /// Explicit list of delays, last entry repeats
    Array {
        #[serde(default)]
        delays_ms: Vec<u64>,
    },
}

fn default_base() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_max() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base_ms: DEFAULT_BASE_DELAY_MS,
            multiplier: default_multiplier(),
            max_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl Backoff {
    /// Short name of the strategy (`"exponential"`, `"decorrelated_jitter"`, ...)
    pub fn name(&self) -> &'static str {
        match self {
            Backoff::Fixed { .. } => "fixed",
            Backoff::Linear { .. } => "linear",
            Backoff::Exponential { .. } => "exponential",
            Backoff::Fibonacci { .. } => "fibonacci",
            Backoff::DecorrelatedJitter { .. } => "decorrelated_jitter",
            Backoff::Array { .. } => "array",
        }
    }

    /// Check that the description can produce a sane strategy
    pub fn validate(&self) -> Result<(), BackoffError> {
        if let Backoff::Exponential { multiplier, .. } = self {
            if !multiplier.is_finite() || *multiplier <= 0.0 {
                return Err(BackoffError::InvalidMultiplier(*multiplier));
            }
        }
        Ok(())
    }

    /// Build a fresh strategy instance for one run
    pub fn strategy(&self) -> Box<dyn RetryStrategy> {
        match self {
            Backoff::Fixed { delay_ms } => Box::new(FixedDelay::new(*delay_ms)),
            Backoff::Linear {
                base_ms,
                increment_ms,
                max_ms,
            } => Box::new(LinearBackoff::new(*base_ms, *increment_ms, *max_ms)),
            Backoff::Exponential {
                base_ms,
                multiplier,
                max_ms,
            } => Box::new(ExponentialBackoff::new(*base_ms, *multiplier, *max_ms)),
            Backoff::Fibonacci { base_ms, max_ms } => {
                Box::new(FibonacciBackoff::new(*base_ms, *max_ms))
            }
            Backoff::DecorrelatedJitter { base_ms, max_ms } => {
                Box::new(DecorrelatedJitter::new(*base_ms, *max_ms))
            }
            Backoff::Array { delays_ms } => Box::new(ArrayDelay::new(delays_ms.clone())),
        }
    }

    /// Built-in named presets with their default parameters
    pub fn presets() -> Vec<(&'static str, Backoff)> {
        vec![
            ("exponential", Backoff::default()),
            (
                "linear",
                Backoff::Linear {
                    base_ms: DEFAULT_BASE_DELAY_MS,
                    increment_ms: DEFAULT_BASE_DELAY_MS,
                    max_ms: DEFAULT_MAX_DELAY_MS,
                },
            ),
            (
                "fibonacci",
                Backoff::Fibonacci {
                    base_ms: DEFAULT_BASE_DELAY_MS,
                    max_ms: DEFAULT_MAX_DELAY_MS,
                },
            ),
            (
                "decorrelated_jitter",
                Backoff::DecorrelatedJitter {
                    base_ms: DEFAULT_BASE_DELAY_MS,
                    max_ms: DEFAULT_MAX_DELAY_MS,
                },
            ),
        ]
    }
}

impl fmt::Display for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::Fixed { delay_ms } => write!(f, "fixed({}ms)", delay_ms),
            Backoff::Linear {
                base_ms,
                increment_ms,
                max_ms,
            } => write!(f, "linear({}ms +{}ms, max {}ms)", base_ms, increment_ms, max_ms),
            Backoff::Exponential {
                base_ms,
                multiplier,
                max_ms,
            } => write!(f, "exponential({}ms ×{}, max {}ms)", base_ms, multiplier, max_ms),
            Backoff::Fibonacci { base_ms, max_ms } => {
                write!(f, "fibonacci({}ms, max {}ms)", base_ms, max_ms)
            }
            Backoff::DecorrelatedJitter { base_ms, max_ms } => {
                write!(f, "decorrelated_jitter({}ms, max {}ms)", base_ms, max_ms)
            }
            Backoff::Array { delays_ms } => write!(f, "array({:?})", delays_ms),
        }
    }
}

impl FromStr for Backoff {
    type Err = BackoffError;

    /// Parse a strategy name into its default preset
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "fixed" => Ok(Backoff::Fixed {
                delay_ms: DEFAULT_BASE_DELAY_MS,
            }),
            "array" => Ok(Backoff::Array {
                delays_ms: ArrayDelay::default().delays_ms,
            }),
            name => Backoff::presets()
                .into_iter()
                .find(|(preset, _)| *preset == name)
                .map(|(_, backoff)| backoff)
                .ok_or_else(|| BackoffError::UnknownStrategy(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_exponential() {
        let backoff = Backoff::default();
        assert_eq!(backoff.name(), "exponential");
        let mut strategy = backoff.strategy();
        assert_eq!(strategy.delay(4, 0), 800);
    }

    #[test]
    fn test_from_str() {
        assert_eq!("linear".parse::<Backoff>().unwrap().name(), "linear");
        assert_eq!(
            "decorrelated-jitter".parse::<Backoff>().unwrap().name(),
            "decorrelated_jitter"
        );
        assert_eq!(" Fibonacci ".parse::<Backoff>().unwrap().name(), "fibonacci");
        assert_eq!(
            "cubic".parse::<Backoff>(),
            Err(BackoffError::UnknownStrategy("cubic".to_string()))
        );
    }

    #[test]
    fn test_validate_multiplier() {
        let bad = Backoff::Exponential {
            base_ms: 100,
            multiplier: f64::NAN,
            max_ms: 1_000,
        };
        assert!(matches!(bad.validate(), Err(BackoffError::InvalidMultiplier(_))));
        assert!(Backoff::default().validate().is_ok());
    }

    #[test]
    fn test_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            strategy: Backoff,
        }

        let parsed: Wrapper = toml::from_str(
            r#"
[strategy]
type = "exponential"
base = 50
multiplier = 3.0
max = 10000
"#,
        )
        .unwrap();

        assert_eq!(
            parsed.strategy,
            Backoff::Exponential {
                base_ms: 50,
                multiplier: 3.0,
                max_ms: 10_000,
            }
        );
    }

    #[test]
    fn test_deserialize_defaults_missing_fields() {
        #[derive(Deserialize)]
        struct Wrapper {
            strategy: Backoff,
        }

        let parsed: Wrapper = toml::from_str(
            r#"
[strategy]
type = "fibonacci"
"#,
        )
        .unwrap();

        assert_eq!(
            parsed.strategy,
            Backoff::Fibonacci {
                base_ms: 100,
                max_ms: 30_000,
            }
        );
    }

    #[test]
    fn test_presets_cover_named_strategies() {
        let names: Vec<&str> = Backoff::presets().iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            vec!["exponential", "linear", "fibonacci", "decorrelated_jitter"]
        );
    }
}
