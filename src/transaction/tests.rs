use super::*;
use crate::error::{AppError, AppResult, ConfigError};

fn manager(ttl: Duration) -> AppResult<TransactionManager<u32, &'static str>> {
    Ok(TransactionManager::new(ttl)?)
}

#[test]
fn zero_ttl_is_rejected() {
    let result = TransactionManager::<u32, ()>::new(Duration::ZERO);
    assert!(matches!(result, Err(ConfigError::TtlZero)));
}

#[test]
fn end_within_ttl_is_valid() -> AppResult<()> {
    let mut xacts = manager(Duration::from_secs(5))?;
    xacts.start_transaction(7, "example.com", Timestamp::new(100, 250_000_000));
    match xacts.maybe_end_transaction(&7, Timestamp::new(101, 100_000_000)) {
        Resolution::Valid(xact) => {
            if xact.elapsed != Duration::from_millis(850) || xact.payload != "example.com" {
                return Err(AppError::config(ConfigError::TestExpectationValue {
                    message: "Unexpected transaction",
                    value: format!("{xact:?}"),
                }));
            }
        }
        Resolution::NotFound | Resolution::TimedOut(_) => {
            return Err(AppError::config("Expected valid transaction"));
        }
    }
    if xacts.open_count() != 0 {
        return Err(AppError::config("Resolved key must leave the pending set"));
    }
    Ok(())
}

#[test]
fn end_at_or_past_ttl_times_out() -> AppResult<()> {
    let mut xacts = manager(Duration::from_millis(1_500))?;
    xacts.start_transaction(1, "a", Timestamp::from_secs(10));
    xacts.start_transaction(2, "b", Timestamp::from_secs(10));
    let exact = xacts.maybe_end_transaction(&1, Timestamp::from_millis(11_500));
    let late = xacts.maybe_end_transaction(&2, Timestamp::from_secs(20));
    match (exact, late) {
        (Resolution::TimedOut(first), Resolution::TimedOut(second)) => {
            if first.elapsed != Duration::from_millis(1_500)
                || second.elapsed != Duration::from_secs(10)
            {
                return Err(AppError::config("Timed out records must carry elapsed time"));
            }
            Ok(())
        }
        (first, second) => Err(AppError::config(ConfigError::TestExpectationValue {
            message: "Expected both to time out",
            value: format!("{:?} {:?}", first.outcome(), second.outcome()),
        })),
    }
}

#[test]
fn sub_second_ttl_is_honoured() -> AppResult<()> {
    let mut xacts = manager(Duration::from_millis(200))?;
    xacts.start_transaction(1, "fast", Timestamp::new(50, 900_000_000));
    xacts.start_transaction(2, "slow", Timestamp::new(50, 900_000_000));
    let fast = xacts.maybe_end_transaction(&1, Timestamp::new(51, 50_000_000));
    let slow = xacts.maybe_end_transaction(&2, Timestamp::new(51, 150_000_000));
    if fast.outcome() != Outcome::Valid || slow.outcome() != Outcome::TimedOut {
        return Err(AppError::config("Sub-second TTL misclassified"));
    }
    Ok(())
}

#[test]
fn end_before_start_uses_absolute_difference() -> AppResult<()> {
    let mut xacts = manager(Duration::from_secs(1))?;
    xacts.start_transaction(9, "skewed", Timestamp::new(30, 100_000_000));
    match xacts.maybe_end_transaction(&9, Timestamp::new(29, 900_000_000)) {
        Resolution::Valid(xact) if xact.elapsed == Duration::from_millis(200) => Ok(()),
        other => Err(AppError::config(ConfigError::TestExpectationValue {
            message: "Expected valid skewed transaction",
            value: format!("{:?}", other.outcome()),
        })),
    }
}

#[test]
fn unknown_or_resolved_key_is_not_found() -> AppResult<()> {
    let mut xacts = manager(Duration::from_secs(1))?;
    if xacts.maybe_end_transaction(&3, Timestamp::from_secs(1)) != Resolution::NotFound {
        return Err(AppError::config("Expected NotFound for unknown key"));
    }
    xacts.start_transaction(3, "once", Timestamp::from_secs(1));
    let _first = xacts.maybe_end_transaction(&3, Timestamp::from_secs(1));
    if xacts.maybe_end_transaction(&3, Timestamp::from_secs(1)) != Resolution::NotFound {
        return Err(AppError::config("Key must resolve exactly once"));
    }
    Ok(())
}

#[test]
fn duplicate_start_supersedes_earlier_record() -> AppResult<()> {
    let mut xacts = manager(Duration::from_secs(5))?;
    if xacts.start_transaction(4, "first", Timestamp::from_secs(1)) {
        return Err(AppError::config("Fresh key must not report supersede"));
    }
    if !xacts.start_transaction(4, "retry", Timestamp::from_secs(3)) {
        return Err(AppError::config("Duplicate key must report supersede"));
    }
    match xacts.maybe_end_transaction(&4, Timestamp::from_secs(4)) {
        Resolution::Valid(xact)
            if xact.payload == "retry" && xact.elapsed == Duration::from_secs(1) => {}
        other => {
            return Err(AppError::config(ConfigError::TestExpectationValue {
                message: "Expected retransmitted start to win",
                value: format!("{other:?}"),
            }));
        }
    }
    if xacts.open_count() != 0 || xacts.superseded_count() != 1 {
        return Err(AppError::config("Unexpected correlator counters"));
    }
    Ok(())
}

#[test]
fn purge_removes_exactly_expired_records() -> AppResult<()> {
    let ttl = Duration::from_secs(10);
    let mut xacts = manager(ttl)?;
    for (key, start) in [(1, 0u64), (2, 5), (3, 10), (4, 15), (5, 20)] {
        xacts.start_transaction(key, "", Timestamp::from_secs(start));
    }
    let now = Timestamp::from_secs(20);
    let before = xacts.open_count();
    let removed = xacts.purge_expired(now);
    if removed != 3 || xacts.open_count() != before.saturating_sub(removed) {
        return Err(AppError::config(ConfigError::TestExpectationValue {
            message: "Unexpected purge count",
            value: removed.to_string(),
        }));
    }
    for key in [1, 2, 3] {
        if xacts.is_pending(&key) {
            return Err(AppError::config("Expired key survived purge"));
        }
    }
    for key in [4, 5] {
        if !xacts.is_pending(&key) {
            return Err(AppError::config("Live key was purged"));
        }
    }
    Ok(())
}

#[test]
fn drain_returns_expired_keys() -> AppResult<()> {
    let mut xacts = manager(Duration::from_secs(3))?;
    xacts.start_transaction(1, "old", Timestamp::from_secs(0));
    xacts.start_transaction(2, "new", Timestamp::from_secs(2));
    let drained = xacts.drain_expired(Timestamp::from_secs(4));
    match drained.as_slice() {
        [(1, xact)] if xact.payload == "old" => {}
        other => {
            return Err(AppError::config(ConfigError::TestExpectationValue {
                message: "Unexpected drained records",
                value: format!("{other:?}"),
            }));
        }
    }
    if xacts.open_count() != 1 || !xacts.is_pending(&2) {
        return Err(AppError::config("Live record must remain pending"));
    }
    Ok(())
}
