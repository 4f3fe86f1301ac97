//! Response body materialization.
//!
//! The buffer strategy is picked from the advertised `Content-Length` and the
//! caller's pre-size hint before the first chunk is read:
//!
//! | hint | Content-Length | plan |
//! |------|----------------|------|
//! | none | `L` | [`BufferPlan::Exact`]: fill exactly `L` bytes |
//! | none | unknown | [`BufferPlan::Unbounded`] |
//! | `h < L` | `L` | [`BufferPlan::Unbounded`] |
//! | `h` | unknown or `<= h` | [`BufferPlan::Presized`]: reserve `h`, right-size on slack |
//!
//! The advertised length is only a claim: an exact read reserves at most
//! [`MAX_UPFRONT_RESERVE`] bytes and grows toward the length as data arrives.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

/// Reserved capacity may exceed the realized length by at most 1/10th before
/// the body is copied into a right-sized buffer.
const SLACK_DIVISOR: usize = 10;

/// Largest buffer reserved from `Content-Length` before any byte is read.
pub(crate) const MAX_UPFRONT_RESERVE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BufferPlan {
    /// Fill a buffer of exactly the advertised length; a clean early end of
    /// stream yields a shorter body.
    Exact(usize),
    /// Accumulate into a buffer reserved up front.
    Presized(usize),
    /// Accumulate with no size estimate.
    Unbounded,
}

impl BufferPlan {
    pub(crate) fn choose(content_length: Option<u64>, presize_hint: Option<usize>) -> Self {
        let advertised = content_length.and_then(|len| usize::try_from(len).ok());
        match (presize_hint, advertised) {
            (None, Some(len)) => Self::Exact(len),
            (None, None) => Self::Unbounded,
            (Some(hint), Some(len)) if hint < len => Self::Unbounded,
            (Some(hint), _) => Self::Presized(hint),
        }
    }
}

/// Drains `stream` according to `plan`.
pub(crate) async fn read_body<S, E>(stream: S, plan: BufferPlan) -> Result<Bytes, E>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    let mut stream = std::pin::pin!(stream);
    match plan {
        BufferPlan::Exact(len) => {
            let mut buf = Vec::with_capacity(len.min(MAX_UPFRONT_RESERVE));
            while buf.len() < len {
                let Some(chunk) = stream.next().await else {
                    break;
                };
                let chunk = chunk?;
                let take = chunk.len().min(len - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(Bytes::from(buf))
        }
        BufferPlan::Presized(hint) => {
            let mut buf = Vec::with_capacity(hint);
            while let Some(chunk) = stream.next().await {
                buf.extend_from_slice(&chunk?);
            }
            Ok(Bytes::from(right_size(buf)))
        }
        BufferPlan::Unbounded => {
            let mut buf = Vec::new();
            while let Some(chunk) = stream.next().await {
                buf.extend_from_slice(&chunk?);
            }
            Ok(Bytes::from(buf))
        }
    }
}

fn right_size(buf: Vec<u8>) -> Vec<u8> {
    let slack = buf.capacity() - buf.len();
    if slack > buf.capacity() / SLACK_DIVISOR {
        buf.as_slice().to_vec()
    } else {
        buf
    }
}
