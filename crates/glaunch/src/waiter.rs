//! Polls the inventory until enough devices fit the request or time runs out.

use std::time::Duration;

use inventory::InventoryError;
use inventory::NvmlInterface;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::WaitPolicy;
use crate::selector;
use crate::selector::FitRequest;
use crate::selector::Selection;

/// Longest span ever added to an instant; longer ones are never reached anyway.
pub(crate) const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// `instant + duration`, clamped so that huge durations cannot overflow.
fn saturating_after(instant: Instant, duration: Duration) -> Instant {
    instant + duration.min(FAR_FUTURE)
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("not enough devices with sufficient memory after waiting {waited:?} ({polls} polls)")]
    TimedOut { waited: Duration, polls: usize },
    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

/// Snapshots and selects until a selection succeeds.
///
/// The first poll happens immediately. Between polls the task sleeps for the
/// poll interval, cut short so the last poll lands exactly on the deadline.
/// A zero timeout means exactly one poll.
///
/// # Errors
///
/// - [`WaitError::TimedOut`] once the deadline passes without a selection
/// - [`WaitError::Inventory`] as soon as the device count cannot be read
pub async fn wait_for_devices<N: NvmlInterface + ?Sized>(
    nvml: &N,
    request: &FitRequest,
    policy: &WaitPolicy,
) -> Result<Selection, WaitError> {
    let start = Instant::now();
    let deadline = saturating_after(start, policy.timeout);
    let mut polls = 0;

    loop {
        let devices = inventory::snapshot(nvml)?;
        polls += 1;

        if let Some(selection) = selector::select(&devices, request) {
            tracing::debug!(polls, "Found devices satisfying the request");
            return Ok(selection);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WaitError::TimedOut {
                waited: now - start,
                polls,
            });
        }

        let wake_at = saturating_after(now, policy.interval).min(deadline);
        tracing::info!(
            "not enough devices available yet, checking again in {:?} ({:?} left)",
            wake_at - now,
            deadline - now
        );
        tokio::time::sleep_until(wake_at).await;
    }
}

#[cfg(test)]
mod tests {
    use inventory::mock::MockDevice;
    use inventory::mock::MockNvml;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::selector::MemoryEstimation;
    use crate::selector::SelectionPolicy;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn one_gpu_with(budget: u64) -> FitRequest {
        FitRequest {
            gpu_count: 1,
            memory_estimation: MemoryEstimation::PerDevice(budget),
            policy: SelectionPolicy::WorstFit,
        }
    }

    fn policy(timeout: u64, interval: u64) -> WaitPolicy {
        WaitPolicy {
            timeout: Duration::from_secs(timeout),
            interval: Duration::from_secs(interval),
        }
    }

    #[test(tokio::test(start_paused = true))]
    async fn satisfied_on_first_poll_returns_immediately() {
        let nvml = MockNvml::new(vec![MockDevice::with_free(0, 8 * GIB)]);
        let start = Instant::now();

        let selection = wait_for_devices(&nvml, &one_gpu_with(GIB), &policy(3600, 60))
            .await
            .expect("device 0 fits");

        assert_eq!(selection.ids(), &[0]);
        assert_eq!(nvml.polls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test(tokio::test(start_paused = true))]
    async fn zero_timeout_polls_exactly_once() {
        let nvml = MockNvml::new(vec![MockDevice::with_free(0, GIB)]);

        let result = wait_for_devices(&nvml, &one_gpu_with(4 * GIB), &policy(0, 60)).await;

        assert!(matches!(
            result,
            Err(WaitError::TimedOut { polls: 1, waited }) if waited == Duration::ZERO
        ));
        assert_eq!(nvml.polls(), 1);
    }

    #[test(tokio::test(start_paused = true))]
    async fn last_poll_lands_on_deadline() {
        let nvml = MockNvml::new(vec![MockDevice::with_free(0, GIB)]);

        let result = wait_for_devices(&nvml, &one_gpu_with(4 * GIB), &policy(10, 3)).await;

        // polls at 0s, 3s, 6s, 9s and the shortened final one at 10s
        match result {
            Err(WaitError::TimedOut { waited, polls }) => {
                assert_eq!(polls, 5);
                assert_eq!(waited, Duration::from_secs(10));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test(tokio::test(start_paused = true))]
    async fn memory_freed_while_waiting_is_picked_up() {
        let nvml = MockNvml::with_frames(vec![
            vec![MockDevice::with_free(0, GIB), MockDevice::with_free(1, GIB)],
            vec![MockDevice::with_free(0, GIB), MockDevice::with_free(1, 2 * GIB)],
            vec![MockDevice::with_free(0, GIB), MockDevice::with_free(1, 6 * GIB)],
        ]);
        let start = Instant::now();

        let selection = wait_for_devices(&nvml, &one_gpu_with(4 * GIB), &policy(3600, 60))
            .await
            .expect("device 1 frees up on the third poll");

        assert_eq!(selection.ids(), &[1]);
        assert_eq!(nvml.polls(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(120));
    }

    #[test(tokio::test(start_paused = true))]
    async fn unbounded_timeout_keeps_polling() {
        let nvml = MockNvml::with_frames(vec![
            vec![MockDevice::with_free(0, GIB)],
            vec![MockDevice::with_free(0, 8 * GIB)],
        ]);
        let start = Instant::now();
        let policy = WaitPolicy {
            timeout: Duration::MAX,
            interval: Duration::from_secs(60),
        };

        let selection = wait_for_devices(&nvml, &one_gpu_with(4 * GIB), &policy)
            .await
            .expect("device 0 frees up on the second poll");

        assert_eq!(selection.ids(), &[0]);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[test(tokio::test(start_paused = true))]
    async fn unbounded_interval_is_cut_at_deadline() {
        let nvml = MockNvml::new(vec![MockDevice::with_free(0, GIB)]);
        let policy = WaitPolicy {
            timeout: Duration::from_secs(10),
            interval: Duration::MAX,
        };

        let result = wait_for_devices(&nvml, &one_gpu_with(4 * GIB), &policy).await;

        assert!(matches!(
            result,
            Err(WaitError::TimedOut { polls: 2, waited }) if waited == Duration::from_secs(10)
        ));
    }

    #[test(tokio::test(start_paused = true))]
    async fn inventory_failure_aborts_wait() {
        let nvml = MockNvml::new(vec![MockDevice::with_free(0, GIB)]).failing_device_count();

        let result = wait_for_devices(&nvml, &one_gpu_with(4 * GIB), &policy(3600, 60)).await;

        assert!(matches!(
            result,
            Err(WaitError::Inventory(InventoryError::DeviceCount(_)))
        ));
    }
}
