use super::*;

fn policy(initial_ms: u64, max_ms: u64) -> BackoffPolicy {
    BackoffPolicy {
        initial: Duration::from_millis(initial_ms),
        max: Duration::from_millis(max_ms),
    }
}

#[test]
fn doubles_until_the_cap() {
    let mut backoff = Backoff::new(policy(500, 4_000));
    let delays: Vec<_> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
    assert_eq!(delays, vec![500, 1_000, 2_000, 4_000, 4_000, 4_000]);
    assert_eq!(backoff.attempts(), 6);
}

#[test]
fn reset_starts_over() {
    let mut backoff = Backoff::new(policy(100, 10_000));
    backoff.next_delay();
    backoff.next_delay();
    backoff.reset();
    assert_eq!(backoff.attempts(), 0);
    assert_eq!(backoff.next_delay(), Duration::from_millis(100));
}

#[test]
fn stays_bounded_after_many_failures() {
    let mut backoff = Backoff::new(BackoffPolicy::default());
    for _ in 0..200 {
        assert!(backoff.next_delay() <= Duration::from_secs(30));
    }
    assert_eq!(backoff.next_delay(), Duration::from_secs(30));
}
