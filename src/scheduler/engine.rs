use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::service::SupportBundleService;

/// Cleanup loop bound to the host's shutdown token.
///
/// Sweeps immediately, then once per `period`, until `shutdown` is cancelled.
/// Returns the number of sweeps performed.
pub async fn run_cleanup_loop(
    service: SupportBundleService,
    period: Duration,
    shutdown: CancellationToken,
) -> u64 {
    if shutdown.is_cancelled() {
        debug!("Shutdown already requested, cleanup loop not started");
        return 0;
    }

    info!(period_secs = period.as_secs(), "Cleanup loop running");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sweeps = 0;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            _ = ticker.tick() => {
                service.cleanup().await;
                sweeps += 1;
            }
        }
    }

    info!(sweeps, "Cleanup loop stopped");
    sweeps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BundleState, Principal};
    use crate::registry::testing::{Behavior, ScriptedCollector};
    use crate::service::tests::{harness, wait_for_terminal};

    #[tokio::test]
    async fn test_loop_sweeps_on_start_and_stops_on_cancel() {
        let h = harness(
            vec![ScriptedCollector::new("a", Behavior::Succeed("alpha"))],
            chrono::Duration::zero(),
        );
        let bundle = h
            .service
            .create(vec![], &Principal::new("admin"))
            .await
            .unwrap();
        assert_eq!(
            wait_for_terminal(&h.service, &bundle.uid).await.state,
            BundleState::Complete
        );

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_cleanup_loop(
            h.service.clone(),
            Duration::from_secs(3600),
            shutdown.clone(),
        ));

        for _ in 0..250 {
            if h.service.list().await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(h.service.list().await.unwrap().is_empty());

        shutdown.cancel();
        let sweeps = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
        assert_eq!(sweeps, 1);
    }

    #[tokio::test]
    async fn test_loop_does_not_start_after_shutdown() {
        let h = harness(vec![], chrono::Duration::hours(1));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let sweeps = run_cleanup_loop(h.service.clone(), Duration::from_millis(10), shutdown).await;
        assert_eq!(sweeps, 0);
    }

    #[tokio::test]
    async fn test_run_returns_immediately_when_disabled() {
        let h = harness(vec![], chrono::Duration::hours(1));
        let mut settings = h.service.settings().clone();
        settings.enabled = false;
        let service = crate::service::SupportBundleService::new(
            h.service.store().clone(),
            std::sync::Arc::new(crate::registry::CollectorRegistry::new()),
            settings,
        );

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            service.run(CancellationToken::new()),
        )
        .await;
        assert!(result.expect("run blocked while disabled").is_ok());
    }
}
