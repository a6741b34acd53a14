//! Waiter - Poll a refresh function until a target status is reached
//!
//! The waiter knows nothing about load balancers. It drives any [`Refresh`]
//! implementation and interprets the observed status strings against the
//! caller's target and pending set:
//!
//! - the target ends the wait successfully
//! - a status in the pending set keeps polling
//! - `ERROR`, or anything else, ends the wait with a distinct error
//! - `NotFound` ends the wait successfully when the target is [`DELETED`]
//!
//! Every poll and every pause races the caller's cancellation token and the
//! wait's deadline.

use async_trait::async_trait;
use lbstate_core::status::{DELETED, ERROR, is_deletion_target};
use std::time::Duration;

use lbstate_core::{ApiError, ApiResult, Resource, ResourceRef, StatusSet};
use log::debug;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::config::WaitConfig;
use crate::error::{ReconcileError, ReconcileResult};

/// One poll result: the object that was read and the status it stands for
///
/// The object is not always the one being waited for: while the owning load
/// balancer is mid-transition, refresh functions report the load balancer.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub resource: Resource,
    pub status: String,
}

impl Observation {
    pub fn new(resource: Resource, status: impl Into<String>) -> Self {
        Self {
            resource,
            status: status.into(),
        }
    }
}

/// A source of status observations for one object
#[async_trait]
pub trait Refresh: Send + Sync {
    /// The object being waited for
    fn subject(&self) -> ResourceRef;

    /// Read the current status
    async fn refresh(&self) -> ApiResult<Observation>;
}

/// How a successful wait ended
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    /// The target status was observed
    Reached(Observation),
    /// The object disappeared while waiting for [`DELETED`]
    Gone,
}

impl Settled {
    pub fn observation(&self) -> Option<&Observation> {
        match self {
            Settled::Reached(observation) => Some(observation),
            Settled::Gone => None,
        }
    }
}

/// Roughly 30 years; stands in for deadlines past the clock's range
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// The instant `timeout` from now, saturating for timeouts too large to represent
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Poll `refresh` until its status becomes `target`
///
/// Waits `config.delay` before the first poll, then pauses between polls
/// according to [`WaitConfig::interval_after`]. Fails with
/// [`ReconcileError::Timeout`] once `config.timeout` has elapsed while the
/// status stayed pending, and with [`ReconcileError::Cancelled`] as soon as
/// `cancel` fires.
pub async fn wait_for<R>(
    cancel: &CancellationToken,
    refresh: &R,
    target: &str,
    pending: &StatusSet,
    config: &WaitConfig,
) -> ReconcileResult<Settled>
where
    R: Refresh + ?Sized,
{
    let subject = refresh.subject();
    let deadline = deadline_after(config.timeout);

    let timed_out = |last_status: Option<String>| ReconcileError::Timeout {
        resource: subject.clone(),
        target: target.to_string(),
        last_status,
        timeout: config.timeout,
    };
    let cancelled = || ReconcileError::Cancelled {
        operation: format!("wait for {} to become {}", subject, target),
    };

    debug!(
        "Waiting for {} to become {} (pending: {}, timeout: {:?})",
        subject, target, pending, config.timeout
    );

    let mut last_status: Option<String> = None;
    let mut polls = 0u32;
    let mut pause = config.delay;

    loop {
        if !pause.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = sleep_until(deadline) => return Err(timed_out(last_status)),
                _ = sleep(pause) => {}
            }
        }

        let observed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            _ = sleep_until(deadline) => return Err(timed_out(last_status)),
            observed = refresh.refresh() => observed,
        };
        polls += 1;

        let observation = match observed {
            Ok(observation) => observation,
            Err(err) => return settle_error(&subject, target, err),
        };
        debug!(
            "{} reports {} via {} (poll {})",
            subject,
            observation.status,
            observation.resource.to_ref(),
            polls
        );

        if observation.status == target {
            return Ok(Settled::Reached(observation));
        }
        if !pending.contains(&observation.status) {
            let reason = observation.resource.status_reason.clone();
            if observation.status == ERROR {
                return Err(ReconcileError::ErrorStatus {
                    resource: subject.clone(),
                    target: target.to_string(),
                    reason,
                });
            }
            return Err(ReconcileError::UnexpectedStatus {
                resource: subject.clone(),
                target: target.to_string(),
                status: observation.status,
                reason,
            });
        }

        last_status = Some(observation.status);
        pause = config.interval_after(polls);
    }
}

fn settle_error(subject: &ResourceRef, target: &str, err: ApiError) -> ReconcileResult<Settled> {
    match err {
        ApiError::NotFound { .. } if is_deletion_target(target) => {
            debug!("{} is gone, wanted {}", subject, DELETED);
            Ok(Settled::Gone)
        }
        ApiError::NotFound { kind, id } => Err(ReconcileError::NotFound {
            resource: ResourceRef::new(kind, id),
        }),
        other => Err(ReconcileError::api(subject.clone(), other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lbstate_core::ResourceKind;
    use lbstate_core::status::{ACTIVE, PENDING_CREATE, PENDING_UPDATE};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays scripted results; the last one repeats
    struct Scripted {
        subject: ResourceRef,
        results: Mutex<VecDeque<ApiResult<String>>>,
        reason: Option<String>,
        polls: AtomicU32,
    }

    impl Scripted {
        fn new(kind: ResourceKind, id: &str, results: Vec<ApiResult<&str>>) -> Self {
            Self {
                subject: ResourceRef::new(kind, id),
                results: Mutex::new(
                    results
                        .into_iter()
                        .map(|r| r.map(str::to_string))
                        .collect(),
                ),
                reason: None,
                polls: AtomicU32::new(0),
            }
        }

        fn statuses(kind: ResourceKind, id: &str, statuses: &[&str]) -> Self {
            Self::new(kind, id, statuses.iter().map(|s| Ok(*s)).collect())
        }

        fn with_reason(mut self, reason: &str) -> Self {
            self.reason = Some(reason.to_string());
            self
        }

        fn polls(&self) -> u32 {
            self.polls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Refresh for Scripted {
        fn subject(&self) -> ResourceRef {
            self.subject.clone()
        }

        async fn refresh(&self) -> ApiResult<Observation> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().unwrap();
            let next = if results.len() > 1 {
                results.pop_front().unwrap()
            } else {
                results.front().cloned().unwrap()
            };
            let status = next?;
            let mut resource = Resource::new(self.subject.kind, self.subject.id.clone());
            resource.status_reason = self.reason.clone();
            Ok(Observation::new(resource, status))
        }
    }

    /// Never answers
    struct Hanging;

    #[async_trait]
    impl Refresh for Hanging {
        fn subject(&self) -> ResourceRef {
            ResourceRef::new(ResourceKind::Listener, "lst-1")
        }

        async fn refresh(&self) -> ApiResult<Observation> {
            std::future::pending().await
        }
    }

    fn config(timeout_secs: u64) -> WaitConfig {
        WaitConfig::default().with_timeout(Duration::from_secs(timeout_secs))
    }

    fn pending() -> StatusSet {
        StatusSet::pending()
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaches_target_after_pending_polls() {
        let refresh = Scripted::statuses(
            ResourceKind::LoadBalancer,
            "lb-1",
            &[PENDING_CREATE, PENDING_CREATE, ACTIVE],
        );
        let started = Instant::now();

        let settled = wait_for(
            &CancellationToken::new(),
            &refresh,
            ACTIVE,
            &StatusSet::new([PENDING_CREATE]),
            &config(5),
        )
        .await
        .unwrap();

        assert_eq!(settled.observation().unwrap().status, ACTIVE);
        assert_eq!(refresh.polls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_while_pending() {
        let refresh = Scripted::statuses(ResourceKind::Pool, "pool-1", &[PENDING_UPDATE]);

        let err = wait_for(
            &CancellationToken::new(),
            &refresh,
            ACTIVE,
            &pending(),
            &config(2),
        )
        .await
        .unwrap_err();

        match &err {
            ReconcileError::Timeout {
                resource,
                last_status,
                ..
            } => {
                assert_eq!(resource, &ResourceRef::new(ResourceKind::Pool, "pool-1"));
                assert_eq!(last_status.as_deref(), Some(PENDING_UPDATE));
            }
            other => panic!("Expected Timeout, got {:?}", other),
        }
        assert!(err.to_string().contains("pool-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_satisfies_deletion() {
        let refresh = Scripted::new(
            ResourceKind::Member,
            "mem-1",
            vec![
                Ok("PENDING_DELETE"),
                Ok(ACTIVE),
                Err(ApiError::not_found(ResourceKind::Member, "mem-1")),
            ],
        );

        let settled = wait_for(
            &CancellationToken::new(),
            &refresh,
            DELETED,
            &StatusSet::pending_delete(),
            &config(60),
        )
        .await
        .unwrap();

        assert_eq!(settled, Settled::Gone);
        assert_eq!(refresh.polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_an_error_for_other_targets() {
        let refresh = Scripted::new(
            ResourceKind::Listener,
            "lst-1",
            vec![Err(ApiError::not_found(ResourceKind::LoadBalancer, "lb-1"))],
        );

        let err = wait_for(
            &CancellationToken::new(),
            &refresh,
            ACTIVE,
            &pending(),
            &config(60),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err,
            ReconcileError::NotFound {
                resource: ResourceRef::new(ResourceKind::LoadBalancer, "lb-1")
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_status_returns_promptly() {
        let refresh = Scripted::statuses(
            ResourceKind::Listener,
            "lst-1",
            &[PENDING_UPDATE, "DEGRADED"],
        );
        let started = Instant::now();

        let err = wait_for(
            &CancellationToken::new(),
            &refresh,
            ACTIVE,
            &pending(),
            &config(600),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::UnexpectedStatus { ref status, .. } if status == "DEGRADED"
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_status_is_distinct() {
        let refresh = Scripted::statuses(ResourceKind::Monitor, "mon-1", &[ERROR])
            .with_reason("health check misconfigured");

        let err = wait_for(
            &CancellationToken::new(),
            &refresh,
            ACTIVE,
            &pending(),
            &config(60),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err,
            ReconcileError::ErrorStatus {
                resource: ResourceRef::new(ResourceKind::Monitor, "mon-1"),
                target: ACTIVE.to_string(),
                reason: Some("health check misconfigured".to_string()),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_in_pending_set_keeps_polling() {
        let refresh = Scripted::statuses(
            ResourceKind::L7Rule,
            "rule-1",
            &[ERROR, PENDING_UPDATE, ACTIVE],
        );

        let settled = wait_for(
            &CancellationToken::new(),
            &refresh,
            ACTIVE,
            &StatusSet::new([ERROR, PENDING_UPDATE]),
            &config(60),
        )
        .await
        .unwrap();

        assert!(matches!(settled, Settled::Reached(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_api_errors_surface() {
        let refresh = Scripted::new(
            ResourceKind::Pool,
            "pool-1",
            vec![Err(ApiError::Http {
                status: 500,
                message: "boom".to_string(),
            })],
        );

        let err = wait_for(
            &CancellationToken::new(),
            &refresh,
            ACTIVE,
            &pending(),
            &config(60),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err.api_error(),
            Some(&ApiError::Http {
                status: 500,
                message: "boom".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_not_a_timeout() {
        let refresh = Scripted::statuses(ResourceKind::Pool, "pool-1", &[PENDING_UPDATE]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });
        let started = Instant::now();

        let err = wait_for(&cancel, &refresh, ACTIVE, &pending(), &config(600))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_skips_polling() {
        let refresh = Scripted::statuses(ResourceKind::Pool, "pool-1", &[ACTIVE]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = wait_for(&cancel, &refresh, ACTIVE, &pending(), &config(60))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(refresh.polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_refresh_hits_deadline() {
        let err = wait_for(
            &CancellationToken::new(),
            &Hanging,
            ACTIVE,
            &pending(),
            &config(3),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::Timeout {
                last_status: None,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_delay() {
        let refresh = Scripted::statuses(ResourceKind::Pool, "pool-1", &[ACTIVE]);
        let config = WaitConfig {
            delay: Duration::from_secs(5),
            ..config(60)
        };
        let started = Instant::now();

        wait_for(
            &CancellationToken::new(),
            &refresh,
            ACTIVE,
            &pending(),
            &config,
        )
        .await
        .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(refresh.polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout() {
        let refresh = Scripted::statuses(
            ResourceKind::Pool,
            "pool-1",
            &[PENDING_UPDATE, PENDING_UPDATE, ACTIVE],
        );

        let settled = wait_for(
            &CancellationToken::new(),
            &refresh,
            ACTIVE,
            &pending(),
            &WaitConfig::default().with_timeout(Duration::MAX),
        )
        .await
        .unwrap();

        assert_eq!(settled.observation().unwrap().status, ACTIVE);
        assert_eq!(refresh.polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_saturates() {
        let now = Instant::now();
        assert!(deadline_after(Duration::MAX) > now + Duration::from_secs(86400 * 365));
        assert_eq!(deadline_after(Duration::ZERO), now);
    }
}
