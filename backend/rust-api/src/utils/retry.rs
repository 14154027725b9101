use std::time::Duration;

/// Retry an async operation with exponential backoff and a little jitter.
/// Used around per-student store writes in the propagation loops, where a
/// transient error should not immediately mark the student as failed.
pub async fn retry_async<F, Fut, T, E>(
    max_attempts: usize,
    base_backoff: Duration,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut backoff = base_backoff;

    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt == max_attempts => return Err(err),
            Err(_) => {
                let jitter_ms = backoff.as_millis() as u64 / 2;
                let extra = if jitter_ms == 0 {
                    0
                } else {
                    rand::random::<u64>() % (jitter_ms + 1)
                };
                tokio::time::sleep(backoff + Duration::from_millis(extra)).await;
                backoff = backoff.saturating_mul(2);
            }
        }
    }

    unreachable!("retry loop always returns within max_attempts");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicUsize::new(0);
        let res: Result<usize, &'static str> =
            retry_async(3, Duration::from_millis(1), || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err("transient")
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(res.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let res: Result<(), &'static str> =
            retry_async(3, Duration::from_millis(1), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("still broken")
            })
            .await;

        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
