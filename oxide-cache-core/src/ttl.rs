//! Normalization of `TTL`/`PTTL` replies across server generations
//!
//! Servers disagree on what negative replies mean:
//!
//! | server        | command | `-2`   | `-1`            | `0`    |
//! |---------------|---------|--------|-----------------|--------|
//! | 2.8 and later | `PTTL`  | absent | no expiry       | 0 s    |
//! | 2.6 to 2.8    | `PTTL`  | n/a    | absent or none  | 0 s    |
//! | 2.0 to 2.6    | `TTL`   | n/a    | absent or none  | absent |
//! | before 2.0    | none    |        |                 |        |
//!
//! A [`TtlStrategy`] is picked once per detected version and consulted for
//! every metadata lookup. Ambiguous replies are settled with an existence
//! check supplied by the caller.

use crate::types::{Metadata, ServerVersion};
use std::future::Future;

/// Unit of a raw expiry reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlUnit {
    /// `TTL` reply
    Seconds,
    /// `PTTL` reply
    Milliseconds,
}

impl TtlUnit {
    /// Convert a non-negative raw reply to whole seconds, rounding to nearest
    #[must_use]
    pub const fn to_seconds(self, raw: i64) -> u64 {
        let raw = if raw < 0 { 0 } else { raw as u64 };
        match self {
            Self::Seconds => raw,
            Self::Milliseconds => raw.saturating_add(500) / 1000,
        }
    }

    /// Command that produces replies in this unit
    #[must_use]
    pub const fn command(self) -> &'static str {
        match self {
            Self::Seconds => "TTL",
            Self::Milliseconds => "PTTL",
        }
    }
}

/// Normalized remaining time to live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingTtl {
    /// The key does not exist
    Absent,
    /// The key exists without an expiry
    Unlimited,
    /// Seconds left before expiry
    Seconds(u64),
}

impl RemainingTtl {
    /// Metadata for a present key; `None` when absent
    #[must_use]
    pub fn into_metadata(self) -> Option<Metadata> {
        match self {
            Self::Absent => None,
            Self::Unlimited => Some(Metadata {
                remaining_time_to_live: Metadata::UNLIMITED,
            }),
            Self::Seconds(secs) => Some(Metadata {
                remaining_time_to_live: i64::try_from(secs).unwrap_or(i64::MAX),
            }),
        }
    }
}

/// Interpretation rules for one server generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStrategy {
    /// 2.8 and later: `-2` absent, `-1` no expiry
    Modern,
    /// 2.6 up to 2.8: `-1` is either absent or no expiry
    Ambiguous,
    /// 2.0 up to 2.6: seconds only, `-1` ambiguous, and `0` counts as absent
    /// because the key is about to vanish
    SecondsOnly,
    /// Before 2.0: no expiry commands at all
    Unsupported,
}

impl TtlStrategy {
    /// Pick the strategy for a server version
    #[must_use]
    pub const fn for_version(version: &ServerVersion) -> Self {
        if version.at_least(2, 8) {
            Self::Modern
        } else if version.at_least(2, 6) {
            Self::Ambiguous
        } else if version.at_least(2, 0) {
            Self::SecondsOnly
        } else {
            Self::Unsupported
        }
    }

    /// Unit of the expiry command to issue, `None` if there is none
    #[must_use]
    pub const fn unit(self) -> Option<TtlUnit> {
        match self {
            Self::Modern | Self::Ambiguous => Some(TtlUnit::Milliseconds),
            Self::SecondsOnly => Some(TtlUnit::Seconds),
            Self::Unsupported => None,
        }
    }

    /// Interpret a raw reply
    ///
    /// `raw` is the reply of the command named by [`TtlStrategy::unit`], or
    /// `None` when no command was issued. `exists` is awaited only when the
    /// reply cannot tell an absent key from one without expiry.
    pub async fn remaining<F, Fut, E>(self, raw: Option<i64>, exists: F) -> Result<RemainingTtl, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
    {
        let unit = self.unit().unwrap_or(TtlUnit::Seconds);
        let raw = match (self, raw) {
            (Self::Unsupported, _) | (_, None) => return check_exists(exists).await,
            (_, Some(raw)) => raw,
        };

        match self {
            Self::Modern => Ok(match raw {
                r if r <= -2 => RemainingTtl::Absent,
                -1 => RemainingTtl::Unlimited,
                r => RemainingTtl::Seconds(unit.to_seconds(r)),
            }),
            Self::Ambiguous => match raw {
                r if r <= -1 => check_exists(exists).await,
                r => Ok(RemainingTtl::Seconds(unit.to_seconds(r))),
            },
            Self::SecondsOnly => match raw {
                r if r <= -1 => check_exists(exists).await,
                0 => Ok(RemainingTtl::Absent),
                r => Ok(RemainingTtl::Seconds(unit.to_seconds(r))),
            },
            Self::Unsupported => check_exists(exists).await,
        }
    }
}

async fn check_exists<F, Fut, E>(exists: F) -> Result<RemainingTtl, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    Ok(if exists().await? {
        RemainingTtl::Unlimited
    } else {
        RemainingTtl::Absent
    })
}

/// Interpret a raw reply for the given server version
pub async fn remaining_ttl<F, Fut, E>(
    raw: Option<i64>,
    version: &ServerVersion,
    exists: F,
) -> Result<RemainingTtl, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    TtlStrategy::for_version(version).remaining(raw, exists).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::convert::Infallible;

    async fn run(strategy: TtlStrategy, raw: i64, key_exists: bool) -> (RemainingTtl, bool) {
        let cell = Cell::new(false);
        let checked = &cell;
        let result = strategy
            .remaining(Some(raw), move || async move {
                checked.set(true);
                Ok::<_, Infallible>(key_exists)
            })
            .await
            .unwrap();
        (result, cell.get())
    }

    #[test]
    fn test_strategy_selection() {
        let cases = [
            ((7, 2), TtlStrategy::Modern),
            ((3, 0), TtlStrategy::Modern),
            ((2, 9), TtlStrategy::Modern),
            ((2, 8), TtlStrategy::Modern),
            ((2, 7), TtlStrategy::Ambiguous),
            ((2, 6), TtlStrategy::Ambiguous),
            ((2, 5), TtlStrategy::SecondsOnly),
            ((2, 0), TtlStrategy::SecondsOnly),
            ((1, 2), TtlStrategy::Unsupported),
            ((0, 0), TtlStrategy::Unsupported),
        ];
        for ((major, minor), expected) in cases {
            let version = ServerVersion::new(major, minor, 0);
            assert_eq!(TtlStrategy::for_version(&version), expected, "{version}");
        }
        assert_eq!(
            TtlStrategy::for_version(&ServerVersion::unknown()),
            TtlStrategy::Unsupported
        );
    }

    #[tokio::test]
    async fn test_modern_band() {
        let s = TtlStrategy::Modern;
        assert_eq!(run(s, -2, true).await, (RemainingTtl::Absent, false));
        assert_eq!(run(s, -3, true).await, (RemainingTtl::Absent, false));
        assert_eq!(run(s, -1, false).await, (RemainingTtl::Unlimited, false));
        assert_eq!(run(s, 0, false).await, (RemainingTtl::Seconds(0), false));
        assert_eq!(run(s, 59_600, true).await, (RemainingTtl::Seconds(60), false));
        assert_eq!(run(s, 1_499, true).await, (RemainingTtl::Seconds(1), false));
    }

    #[tokio::test]
    async fn test_ambiguous_band() {
        let s = TtlStrategy::Ambiguous;
        assert_eq!(run(s, -2, false).await, (RemainingTtl::Absent, true));
        assert_eq!(run(s, -2, true).await, (RemainingTtl::Unlimited, true));
        assert_eq!(run(s, -1, false).await, (RemainingTtl::Absent, true));
        assert_eq!(run(s, -1, true).await, (RemainingTtl::Unlimited, true));
        assert_eq!(run(s, 0, true).await, (RemainingTtl::Seconds(0), false));
        assert_eq!(run(s, 30_000, true).await, (RemainingTtl::Seconds(30), false));
    }

    #[tokio::test]
    async fn test_seconds_only_band() {
        let s = TtlStrategy::SecondsOnly;
        assert_eq!(run(s, -2, false).await, (RemainingTtl::Absent, true));
        assert_eq!(run(s, -2, true).await, (RemainingTtl::Unlimited, true));
        assert_eq!(run(s, -1, false).await, (RemainingTtl::Absent, true));
        assert_eq!(run(s, -1, true).await, (RemainingTtl::Unlimited, true));
        assert_eq!(run(s, 0, true).await, (RemainingTtl::Absent, false));
        assert_eq!(run(s, 42, true).await, (RemainingTtl::Seconds(42), false));
    }

    #[tokio::test]
    async fn test_unsupported_band_only_checks_existence() {
        let s = TtlStrategy::Unsupported;
        for raw in [-2, -1, 0, 42] {
            assert_eq!(run(s, raw, false).await, (RemainingTtl::Absent, true));
            assert_eq!(run(s, raw, true).await, (RemainingTtl::Unlimited, true));
        }
        let result = s
            .remaining(None, || async { Ok::<_, Infallible>(true) })
            .await
            .unwrap();
        assert_eq!(result, RemainingTtl::Unlimited);
    }

    #[tokio::test]
    async fn test_version_entry_point() {
        let v29 = ServerVersion::new(2, 9, 0);
        let never = || async { Err::<bool, &str>("existence check not expected") };
        assert_eq!(
            remaining_ttl(Some(-1), &v29, never).await,
            Ok(RemainingTtl::Unlimited)
        );
        assert_eq!(
            remaining_ttl(Some(-2), &v29, never).await,
            Ok(RemainingTtl::Absent)
        );

        let v25 = ServerVersion::new(2, 5, 0);
        assert_eq!(
            remaining_ttl(Some(0), &v25, never).await,
            Ok(RemainingTtl::Absent)
        );
    }

    #[tokio::test]
    async fn test_existence_check_errors_propagate() {
        let result = TtlStrategy::Ambiguous
            .remaining(Some(-1), || async { Err::<bool, &str>("connection reset") })
            .await;
        assert_eq!(result, Err("connection reset"));
    }

    #[test]
    fn test_unit_conversion() {
        assert_eq!(TtlUnit::Milliseconds.to_seconds(499), 0);
        assert_eq!(TtlUnit::Milliseconds.to_seconds(500), 1);
        assert_eq!(TtlUnit::Milliseconds.to_seconds(1_000_000), 1000);
        assert_eq!(TtlUnit::Seconds.to_seconds(17), 17);
        assert_eq!(TtlUnit::Seconds.to_seconds(-5), 0);
        assert_eq!(TtlUnit::Milliseconds.command(), "PTTL");
    }

    #[test]
    fn test_metadata_projection() {
        assert_eq!(RemainingTtl::Absent.into_metadata(), None);
        assert!(RemainingTtl::Unlimited.into_metadata().unwrap().is_unlimited());
        assert_eq!(
            RemainingTtl::Seconds(60)
                .into_metadata()
                .unwrap()
                .remaining_time_to_live,
            60
        );
    }
}
