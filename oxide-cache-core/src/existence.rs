//! Telling an absent key from a stored falsy value
//!
//! A read reply of nil or an empty string is the absence sentinel. With raw
//! encoding a stored `false`, `null` or `""` is written as the empty string and
//! reads back identically, so the sentinel is confirmed with `EXISTS`. A JSON
//! encoded value is never empty, so the sentinel is trusted as-is.

use crate::value::ValueEncoding;
use bytes::Bytes;
use std::future::Future;

/// Whether a raw read reply looks like the absence sentinel
#[must_use]
pub fn is_falsy(raw: Option<&[u8]>) -> bool {
    raw.map_or(true, <[u8]>::is_empty)
}

/// Whether a read reply needs an `EXISTS` round trip to be interpreted
#[must_use]
pub fn needs_exists_check(raw: Option<&[u8]>, encoding: ValueEncoding) -> bool {
    !encoding.is_serializing() && is_falsy(raw)
}

/// Decide whether a read reply denotes an absent key
///
/// `exists` is awaited only in the ambiguous case.
pub async fn is_absent<F, Fut, E>(
    raw: Option<&[u8]>,
    encoding: ValueEncoding,
    exists: F,
) -> Result<bool, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    if !is_falsy(raw) {
        return Ok(false);
    }
    if encoding.is_serializing() {
        return Ok(true);
    }
    Ok(!exists().await?)
}

/// Turn a read reply into the stored bytes, or `None` when the key is absent
pub async fn resolve_read<F, Fut, E>(
    raw: Option<Bytes>,
    encoding: ValueEncoding,
    exists: F,
) -> Result<Option<Bytes>, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    if is_absent(raw.as_deref(), encoding, exists).await? {
        Ok(None)
    } else {
        Ok(Some(raw.unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CacheValue;
    use std::convert::Infallible;

    fn unexpected() -> std::future::Ready<Result<bool, &'static str>> {
        std::future::ready(Err("EXISTS must not be issued"))
    }

    #[test]
    fn test_falsy_replies() {
        assert!(is_falsy(None));
        assert!(is_falsy(Some(&b""[..])));
        assert!(!is_falsy(Some(&b"0"[..])));
        assert!(!is_falsy(Some(&b"false"[..])));
    }

    #[tokio::test]
    async fn test_json_trusts_sentinel() {
        assert_eq!(is_absent(None, ValueEncoding::Json, unexpected).await, Ok(true));
        assert_eq!(
            is_absent(Some(&b""[..]), ValueEncoding::Json, unexpected).await,
            Ok(true)
        );
    }

    #[tokio::test]
    async fn test_json_false_is_present() {
        let encoded = ValueEncoding::Json.encode(&CacheValue::Bool(false)).unwrap();
        let read = resolve_read(Some(encoded), ValueEncoding::Json, unexpected)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            ValueEncoding::Json.decode(&read).unwrap(),
            CacheValue::Bool(false)
        );
    }

    #[tokio::test]
    async fn test_raw_sentinel_is_checked() {
        let present = || async { Ok::<_, Infallible>(true) };
        let missing = || async { Ok::<_, Infallible>(false) };

        let stored_false = ValueEncoding::Raw.encode(&CacheValue::Bool(false)).unwrap();
        assert_eq!(
            resolve_read(Some(stored_false), ValueEncoding::Raw, present).await,
            Ok(Some(Bytes::new()))
        );
        assert_eq!(
            resolve_read(None, ValueEncoding::Raw, missing).await,
            Ok(None)
        );
        assert_eq!(
            resolve_read(Some(Bytes::from_static(b"x")), ValueEncoding::Raw, unexpected).await,
            Ok(Some(Bytes::from_static(b"x")))
        );
    }

    #[test]
    fn test_needs_exists_check() {
        assert!(needs_exists_check(None, ValueEncoding::Raw));
        assert!(needs_exists_check(Some(&b""[..]), ValueEncoding::Raw));
        assert!(!needs_exists_check(Some(&b"v"[..]), ValueEncoding::Raw));
        assert!(!needs_exists_check(None, ValueEncoding::Json));
    }
}
