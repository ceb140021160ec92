// Resilient dispatcher
// Runs one logical remote call, rotating credentials on retryable failures

use std::future::Future;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::pool::{Credential, CredentialPool};

/// Outcome of a single failed attempt, classified at the service boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Quota, rate limit, rejected key or transient network trouble.
    /// Another credential may succeed.
    Retryable(String),
    /// Malformed response or a request no credential can fix
    Fatal(String),
}

impl Failure {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Failure::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Failure::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Failure::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Failure::Retryable(m) | Failure::Fatal(m) => m,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("No credentials available")]
    NoCredentialsAvailable,

    #[error("All {attempts} credential(s) exhausted, last failure: {last}")]
    AllCredentialsExhausted { attempts: usize, last: String },

    #[error("Request failed: {0}")]
    Rejected(String),
}

pub struct ResilientDispatcher {
    pool: Mutex<CredentialPool>,
}

impl ResilientDispatcher {
    pub fn new(pool: CredentialPool) -> Self {
        Self {
            pool: Mutex::new(pool),
        }
    }

    /// Run `operation` with the current credential, rotating on retryable
    /// failures until it succeeds or every credential has been tried once.
    ///
    /// The pool stays locked for the whole logical call so concurrent callers
    /// cannot interleave their cycles.
    pub async fn dispatch<T, F, Fut>(&self, mut operation: F) -> Result<T, DispatchError>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = Result<T, Failure>>,
    {
        let mut pool = self.pool.lock().await;
        pool.begin_cycle();

        let mut attempts = 0;
        loop {
            let credential = pool
                .current_credential()
                .ok_or(DispatchError::NoCredentialsAvailable)?;

            attempts += 1;
            debug!(attempt = attempts, credential = %credential, "Dispatching request");

            match operation(credential.clone()).await {
                Ok(value) => return Ok(value),
                Err(Failure::Fatal(msg)) => {
                    warn!(credential = %credential, "Request failed, not retrying: {}", msg);
                    return Err(DispatchError::Rejected(msg));
                }
                Err(Failure::Retryable(msg)) => {
                    if !pool.rotate() {
                        warn!(
                            attempts,
                            "All credentials exhausted, last failure: {}", msg
                        );
                        return Err(DispatchError::AllCredentialsExhausted {
                            attempts,
                            last: msg,
                        });
                    }
                    warn!(
                        credential = %credential,
                        "Request failed ({}), rotating credential", msg
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn dispatcher(tokens: &[&str], start: usize) -> ResilientDispatcher {
        ResilientDispatcher::new(CredentialPool::starting_at(tokens.iter().copied(), start))
    }

    #[tokio::test]
    async fn exhausts_pool_after_one_attempt_per_credential() {
        let d = dispatcher(&["k1", "k2", "k3"], 1);
        let tried = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let t = tried.clone();
        let result: Result<(), _> = d
            .dispatch(move |c| {
                let t = t.clone();
                async move {
                    t.lock().push(c.expose().to_string());
                    Err(Failure::retryable("429"))
                }
            })
            .await;

        assert_eq!(*tried.lock(), vec!["k2", "k3", "k1"]);
        assert_eq!(
            result,
            Err(DispatchError::AllCredentialsExhausted {
                attempts: 3,
                last: "429".to_string()
            })
        );
    }

    #[tokio::test]
    async fn succeeds_on_a_later_credential() {
        let d = dispatcher(&["bad", "good"], 0);
        let result = d
            .dispatch(|c| async move {
                if c.expose() == "good" {
                    Ok(42)
                } else {
                    Err(Failure::retryable("quota"))
                }
            })
            .await;
        assert_eq!(result, Ok(42));

        // The next logical call starts from the credential that worked
        let first = d
            .dispatch(|c| async move { Ok::<_, Failure>(c.expose().to_string()) })
            .await;
        assert_eq!(first.as_deref(), Ok("good"));
    }

    #[tokio::test]
    async fn fatal_failure_is_not_retried() {
        let d = dispatcher(&["k1", "k2"], 0);
        let mut calls = 0;
        let result: Result<(), _> = d
            .dispatch(|_| {
                calls += 1;
                async { Err(Failure::fatal("bad json")) }
            })
            .await;
        assert_eq!(calls, 1);
        assert_eq!(result, Err(DispatchError::Rejected("bad json".to_string())));
    }

    #[tokio::test]
    async fn empty_pool_fails_without_calling() {
        let d = dispatcher(&[], 0);
        let mut calls = 0;
        let result: Result<(), _> = d
            .dispatch(|_| {
                calls += 1;
                async { Ok(()) }
            })
            .await;
        assert_eq!(calls, 0);
        assert_eq!(result, Err(DispatchError::NoCredentialsAvailable));
    }

    #[tokio::test]
    async fn single_credential_gets_exactly_one_attempt() {
        let d = dispatcher(&["solo"], 0);
        let mut calls = 0;
        let result: Result<(), _> = d
            .dispatch(|_| {
                calls += 1;
                async { Err(Failure::retryable("503")) }
            })
            .await;
        assert_eq!(calls, 1);
        assert!(matches!(
            result,
            Err(DispatchError::AllCredentialsExhausted { attempts: 1, .. })
        ));
    }
}
