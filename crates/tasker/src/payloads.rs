//! Built-in payloads.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tasker_scheduler::{Params, Payload, PayloadError, PayloadRegistry};
use tracing::debug;

/// Default lower bound for `primes`.
const DEFAULT_MIN: u64 = 1;

/// Default upper bound for `primes`.
const DEFAULT_MAX: u64 = 1000;

/// Default wait for `delay`, in milliseconds.
const DEFAULT_DELAY_MS: u64 = 5000;

/// Registry of every payload this binary can run.
pub fn builtin_registry() -> PayloadRegistry {
    PayloadRegistry::new()
        .with("primes", Primes)
        .with("delay", Delay)
}

/// Read a non-negative integer param. Numeric strings are accepted since CLI
/// params often arrive as text.
fn u64_param(params: &Params, key: &str, default: u64) -> Result<u64, PayloadError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| {
            PayloadError::InvalidParams(format!("{} must be a non-negative integer, got {}", key, n))
        }),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| {
            PayloadError::InvalidParams(format!("{} must be a non-negative integer, got {:?}", key, s))
        }),
        Some(other) => Err(PayloadError::InvalidParams(format!(
            "{} must be a non-negative integer, got {}",
            key, other
        ))),
    }
}

/// Primes in `[min, max]`.
pub struct Primes;

impl Primes {
    /// Sieve of Eratosthenes over `[min, max]`.
    pub fn between(min: u64, max: u64) -> Vec<u64> {
        if max < 2 || min > max {
            return Vec::new();
        }

        let len = usize::try_from(max).unwrap_or(usize::MAX - 1) + 1;
        let mut composite = vec![false; len];
        let mut i = 2;
        while i * i < len {
            if !composite[i] {
                let mut j = i * i;
                while j < len {
                    composite[j] = true;
                    j += i;
                }
            }
            i += 1;
        }

        (min.max(2)..=max)
            .filter(|&n| !composite[n as usize])
            .collect()
    }
}

#[async_trait]
impl Payload for Primes {
    async fn execute(&self, params: &Params) -> Result<Option<Value>, PayloadError> {
        let min = u64_param(params, "min", DEFAULT_MIN)?;
        let max = u64_param(params, "max", DEFAULT_MAX)?;
        if max > 100_000_000 {
            return Err(PayloadError::InvalidParams(format!(
                "max {} is too large to sieve",
                max
            )));
        }

        let primes = Primes::between(min, max);
        debug!(min, max, count = primes.len(), "found primes");
        Ok(Some(json!(primes)))
    }
}

/// Waits, then reports how long it waited.
pub struct Delay;

#[async_trait]
impl Payload for Delay {
    async fn execute(&self, params: &Params) -> Result<Option<Value>, PayloadError> {
        let delay = u64_param(params, "delay", DEFAULT_DELAY_MS)?;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(Some(json!({ "waited": delay })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => panic!("params must be an object"),
        }
    }

    #[test]
    fn primes_under_a_hundred() {
        assert_eq!(
            Primes::between(1, 100),
            vec![
                2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73,
                79, 83, 89, 97
            ]
        );
    }

    #[test]
    fn primes_edge_ranges() {
        assert!(Primes::between(0, 1).is_empty());
        assert!(Primes::between(20, 10).is_empty());
        assert_eq!(Primes::between(2, 2), vec![2]);
        assert_eq!(Primes::between(14, 16), Vec::<u64>::new());
    }

    #[tokio::test]
    async fn primes_defaults_to_one_through_a_thousand() {
        let result = Primes.execute(&Params::new()).await.unwrap().unwrap();
        let primes = result.as_array().unwrap();
        assert_eq!(primes.len(), 168);
        assert_eq!(primes.last(), Some(&json!(997)));
    }

    #[tokio::test]
    async fn primes_accepts_numeric_strings() {
        let result = Primes
            .execute(&params(json!({"min": "10", "max": "20"})))
            .await
            .unwrap();
        assert_eq!(result, Some(json!([11, 13, 17, 19])));
    }

    #[tokio::test]
    async fn primes_rejects_bad_bounds() {
        assert!(matches!(
            Primes.execute(&params(json!({"max": "lots"}))).await,
            Err(PayloadError::InvalidParams(_))
        ));
        assert!(matches!(
            Primes.execute(&params(json!({"min": -4}))).await,
            Err(PayloadError::InvalidParams(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_reports_wait() {
        let result = Delay.execute(&params(json!({"delay": 250}))).await.unwrap();
        assert_eq!(result, Some(json!({"waited": 250})));

        let result = Delay.execute(&Params::new()).await.unwrap();
        assert_eq!(result, Some(json!({"waited": 5000})));
    }

    #[test]
    fn registry_lists_builtins() {
        assert_eq!(builtin_registry().names(), vec!["delay", "primes"]);
    }

    fn is_prime(n: u64) -> bool {
        n >= 2 && (2..).take_while(|d| d * d <= n).all(|d| n % d != 0)
    }

    proptest! {
        #[test]
        fn sieve_matches_trial_division(min in 0u64..500, span in 0u64..500) {
            let max = min + span;
            let expected: Vec<u64> = (min..=max).filter(|&n| is_prime(n)).collect();
            prop_assert_eq!(Primes::between(min, max), expected);
        }
    }
}
