use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{Config, StateMachine};
use std::time::Duration;

/// Circuit breaker guarding one outbound provider (email or messaging).
pub type ProviderCircuitBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Creates a circuit breaker for an outbound provider.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive transient failures (see
///   `email_client::trips_breaker`) trip the breaker OPEN.
/// - **Backoff**: Exponential backoff from 10s to 60s before a trial call.
///
/// While OPEN, sends fail fast with `DeliveryError::CircuitOpen`, which is not
/// retried, so a provider outage costs a batch one failed lead per attempt
/// instead of the full retry budget for every lead.
pub fn create_provider_circuit_breaker() -> ProviderCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::futures::CircuitBreaker;
    use failsafe::Error;

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_failures() {
        let cb = create_provider_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), Error<&str>> =
                cb.call(async { Err::<(), &str>("simulated error") }).await;
            assert!(result.is_err());
        }

        let result: Result<(), Error<&str>> = cb.call(async { Ok::<(), &str>(()) }).await;

        match result {
            Err(Error::Rejected) => {}
            _ => panic!("Expected circuit to be open and reject requests"),
        }
    }

    #[tokio::test]
    async fn test_circuit_breaker_allows_success() {
        let cb = create_provider_circuit_breaker();

        let result: Result<i32, Error<&str>> = cb.call(async { Ok::<i32, &str>(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }
}
