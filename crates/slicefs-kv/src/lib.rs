//! Transactional key-value abstraction the metadata engine is built on.

mod engine;
mod transaction;

pub use engine::KvEngine;
pub use transaction::*;

use slicefs_types::Result;

/// Page size used by [`scan_prefix`].
const SCAN_BATCH: i32 = 1024;

/// Return the key immediately after the given key.
///
/// Appends a zero byte, so the result is the smallest key strictly greater
/// than the input.
pub fn key_after(key: &[u8]) -> Vec<u8> {
    let mut result = key.to_vec();
    result.push(0);
    result
}

/// Return the end key for a prefix range scan.
///
/// Increments the last non-0xFF byte of the prefix. An all-0xFF (or empty)
/// prefix yields an empty vec, meaning "no upper bound".
pub fn prefix_list_end_key(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return end;
        }
        end.pop();
    }
    end
}

/// Read every key-value pair under `prefix`, paging through the range.
///
/// With `snapshot` the reads stay out of the conflict set.
pub async fn scan_prefix<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    prefix: &[u8],
    snapshot: bool,
) -> Result<Vec<KeyValue>> {
    let end = KeySelector::new(prefix_list_end_key(prefix), false);
    let mut begin = KeySelector::new(prefix.to_vec(), true);
    let mut out = Vec::new();
    loop {
        let page = if snapshot {
            txn.snapshot_get_range(&begin, &end, SCAN_BATCH).await?
        } else {
            txn.get_range(&begin, &end, SCAN_BATCH).await?
        };
        let last = page.kvs.last().map(|kv| kv.key.clone());
        out.extend(page.kvs);
        match (page.has_more, last) {
            (true, Some(last)) => begin = KeySelector::new(last, false),
            _ => break,
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_after() {
        assert_eq!(key_after(b"hello"), b"hello\0");
        assert_eq!(key_after(b""), b"\0");
    }

    #[test]
    fn test_prefix_list_end_key() {
        assert_eq!(prefix_list_end_key(b"abc"), b"abd");
        assert_eq!(prefix_list_end_key(b"a\xff"), b"b");
        assert_eq!(prefix_list_end_key(b"\xff\xff"), Vec::<u8>::new());
        assert_eq!(prefix_list_end_key(b""), Vec::<u8>::new());
    }

    #[test]
    fn test_key_selector_new() {
        let ks = KeySelector::new("prefix", false);
        assert_eq!(ks.key, b"prefix");
        assert!(!ks.inclusive);
    }
}
