//! Wake orchestration
//!
//! Brings the backend from an unknown state to confirmed-up for a single
//! request:
//!
//! ```text
//! Checking --up--> Up
//!    | down
//!    v
//! Waking --transmit failed--> error (WakeFailed)
//!    | sent
//!    v
//! Polling{0} --up--> Up
//!    | down, attempt < max: sleep, attempt += 1
//!    | down, attempt == max
//!    v
//! TimedOut (RetryExhausted)
//! ```
//!
//! At most one wake packet is sent per run. Every run starts from scratch;
//! nothing is remembered between requests.

use crate::config::BackendConfig;
use crate::error::WakeError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a single health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Up,
    Down,
}

impl HealthStatus {
    pub fn is_up(self) -> bool {
        self == HealthStatus::Up
    }
}

/// A one-shot up/down check against the backend
pub trait HealthProbe: Send + Sync {
    fn probe(&self) -> impl Future<Output = HealthStatus> + Send;
}

/// Something that can ask the backend to power on
pub trait WakeSender: Send + Sync {
    fn send_wake(&self) -> impl Future<Output = Result<(), WakeError>> + Send;
}

/// States of a wake sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeState {
    Checking,
    Waking,
    Polling { attempt: u32 },
    Up,
    TimedOut,
}

/// What a successful run did to get the backend up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeReport {
    /// Whether a wake packet was transmitted
    pub woke: bool,
    /// Probes made after the wake packet
    pub polls: u32,
}

/// Retry budget for the polling phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts,
            interval: config.poll_interval(),
        }
    }

    /// Upper bound on time spent sleeping in one sequence
    pub fn worst_case_wait(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Coordinates probing and waking for one backend
pub struct WakeOrchestrator<P, W> {
    prober: P,
    waker: W,
    policy: RetryPolicy,
}

impl<P: HealthProbe, W: WakeSender> WakeOrchestrator<P, W> {
    pub fn new(prober: P, waker: W, policy: RetryPolicy) -> Self {
        Self {
            prober,
            waker,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn prober(&self) -> &P {
        &self.prober
    }

    /// Run the wake sequence to completion
    ///
    /// Returns `TransmitFailed` if the wake packet could not be sent and
    /// `RetryExhausted` if the backend never answered within the budget.
    pub async fn ensure_up(&self) -> Result<WakeReport, WakeError> {
        let mut state = WakeState::Checking;
        let mut woke = false;
        let mut polls = 0u32;

        loop {
            state = match state {
                WakeState::Checking => {
                    if self.prober.probe().await.is_up() {
                        WakeState::Up
                    } else {
                        info!("Backend is down, sending Wake-on-LAN packet");
                        WakeState::Waking
                    }
                }
                WakeState::Waking => {
                    if let Err(e) = self.waker.send_wake().await {
                        warn!(error = %e, "Failed to send wake packet");
                        return Err(e);
                    }
                    woke = true;
                    info!(
                        max_attempts = self.policy.max_attempts,
                        interval_ms = self.policy.interval.as_millis() as u64,
                        "Waiting for backend to wake up"
                    );
                    WakeState::Polling { attempt: 0 }
                }
                WakeState::Polling { attempt } => {
                    polls += 1;
                    if self.prober.probe().await.is_up() {
                        WakeState::Up
                    } else if attempt < self.policy.max_attempts {
                        debug!(attempt = attempt + 1, "Backend still down, retrying");
                        tokio::time::sleep(self.policy.interval).await;
                        WakeState::Polling {
                            attempt: attempt + 1,
                        }
                    } else {
                        WakeState::TimedOut
                    }
                }
                WakeState::Up => {
                    if woke {
                        info!(polls, "Backend is back up");
                    }
                    return Ok(WakeReport { woke, polls });
                }
                WakeState::TimedOut => {
                    warn!(polls, "Backend did not wake up within the retry budget");
                    return Err(WakeError::RetryExhausted { attempts: polls });
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Prober that replays a fixed script, then reports `fallback`
    struct ScriptedProbe {
        script: Mutex<VecDeque<HealthStatus>>,
        fallback: HealthStatus,
        calls: AtomicU32,
    }

    impl ScriptedProbe {
        fn new(script: &[HealthStatus], fallback: HealthStatus) -> Self {
            Self {
                script: Mutex::new(script.iter().copied().collect()),
                fallback,
                calls: AtomicU32::new(0),
            }
        }

        /// Down for the first `downs` probes, up afterwards
        fn up_after(downs: usize) -> Self {
            Self::new(&vec![HealthStatus::Down; downs], HealthStatus::Up)
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HealthProbe for ScriptedProbe {
        async fn probe(&self) -> HealthStatus {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or(self.fallback)
        }
    }

    #[derive(Default)]
    struct CountingWaker {
        sent: AtomicU32,
        fail: bool,
    }

    impl WakeSender for Arc<CountingWaker> {
        async fn send_wake(&self) -> Result<(), WakeError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(WakeError::TransmitFailed {
                    target: "255.255.255.255:9".to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            Ok(())
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            interval: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_up_on_first_check() {
        let waker = Arc::new(CountingWaker::default());
        let orch = WakeOrchestrator::new(ScriptedProbe::up_after(0), Arc::clone(&waker), policy(3));

        let start = Instant::now();
        let report = orch.ensure_up().await.unwrap();

        assert_eq!(report, WakeReport { woke: false, polls: 0 });
        assert_eq!(waker.sent.load(Ordering::SeqCst), 0);
        assert_eq!(orch.prober().calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted() {
        let waker = Arc::new(CountingWaker::default());
        let orch = WakeOrchestrator::new(
            ScriptedProbe::new(&[], HealthStatus::Down),
            Arc::clone(&waker),
            policy(3),
        );

        let start = Instant::now();
        let err = orch.ensure_up().await.unwrap_err();

        assert!(matches!(err, WakeError::RetryExhausted { attempts: 4 }));
        assert_eq!(waker.sent.load(Ordering::SeqCst), 1);
        // initial check + max_attempts + 1 polls
        assert_eq!(orch.prober().calls(), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(15));
        assert_eq!(start.elapsed(), orch.policy().worst_case_wait());
    }

    #[tokio::test(start_paused = true)]
    async fn test_up_on_kth_poll() {
        for k in 1..=4u32 {
            let waker = Arc::new(CountingWaker::default());
            // initial check fails, then k - 1 polls fail
            let orch = WakeOrchestrator::new(
                ScriptedProbe::up_after(k as usize),
                Arc::clone(&waker),
                policy(3),
            );

            let start = Instant::now();
            let report = orch.ensure_up().await.unwrap();

            assert_eq!(report, WakeReport { woke: true, polls: k });
            assert_eq!(waker.sent.load(Ordering::SeqCst), 1);
            assert_eq!(orch.prober().calls(), k + 1);
            assert_eq!(start.elapsed(), Duration::from_secs(5) * (k - 1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_failure_stops_sequence() {
        let waker = Arc::new(CountingWaker {
            fail: true,
            ..Default::default()
        });
        let orch = WakeOrchestrator::new(
            ScriptedProbe::new(&[], HealthStatus::Down),
            Arc::clone(&waker),
            policy(3),
        );

        let start = Instant::now();
        let err = orch.ensure_up().await.unwrap_err();

        assert!(matches!(err, WakeError::TransmitFailed { .. }));
        assert_eq!(waker.sent.load(Ordering::SeqCst), 1);
        assert_eq!(orch.prober().calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flapping_backend_is_not_rewoken() {
        let waker = Arc::new(CountingWaker::default());
        let orch = WakeOrchestrator::new(
            ScriptedProbe::new(
                &[HealthStatus::Down, HealthStatus::Down, HealthStatus::Down],
                HealthStatus::Up,
            ),
            Arc::clone(&waker),
            policy(10),
        );

        let report = orch.ensure_up().await.unwrap();
        assert_eq!(report, WakeReport { woke: true, polls: 3 });
        assert_eq!(waker.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_run_starts_fresh() {
        let waker = Arc::new(CountingWaker::default());
        let orch = WakeOrchestrator::new(
            ScriptedProbe::new(
                &[HealthStatus::Down, HealthStatus::Up, HealthStatus::Down, HealthStatus::Up],
                HealthStatus::Up,
            ),
            Arc::clone(&waker),
            policy(2),
        );

        assert_eq!(orch.ensure_up().await.unwrap(), WakeReport { woke: true, polls: 1 });
        assert_eq!(orch.ensure_up().await.unwrap(), WakeReport { woke: true, polls: 1 });
        assert_eq!(waker.sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_runs_wake_independently() {
        let waker = Arc::new(CountingWaker::default());
        let orch = Arc::new(WakeOrchestrator::new(
            ScriptedProbe::new(&[], HealthStatus::Down),
            Arc::clone(&waker),
            policy(2),
        ));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let orch = Arc::clone(&orch);
                tokio::spawn(async move { orch.ensure_up().await })
            })
            .collect();

        for handle in handles {
            let result = handle.await.unwrap();
            assert!(matches!(result, Err(WakeError::RetryExhausted { attempts: 3 })));
        }
        assert_eq!(waker.sent.load(Ordering::SeqCst), 4);
        assert_eq!(orch.prober().calls(), 4 * 4);
    }

    #[test]
    fn test_retry_policy_worst_case() {
        let policy = RetryPolicy {
            max_attempts: 12,
            interval: Duration::from_millis(2500),
        };
        assert_eq!(policy.worst_case_wait(), Duration::from_secs(30));
    }
}
