// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

//! Stream helpers.

use futures::stream;
use futures::Future;
use futures::Stream;

/// Turn an async, fallible state machine into a stream.
///
/// Each call of `func` consumes the state and resolves to `Ok(Some((state, item)))` to yield
/// `item`, `Ok(None)` to finish, or `Err(e)`. An error is yielded once and ends the stream.
pub fn stream_fn<S, T, A, F, E>(initial_state: S, func: F) -> impl Stream<Item = Result<T, E>>
where
    F: FnMut(S) -> A,
    A: Future<Output = Result<Option<(S, T)>, E>>,
{
    stream::unfold(
        (Some(initial_state), func),
        |(state, mut func)| async move {
            let state = state?;
            match func(state).await {
                Ok(Some((next_state, item))) => Some((Ok(item), (Some(next_state), func))),
                Ok(None) => None,
                Err(err) => Some((Err(err), (None, func))),
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn counts_down_then_ends() {
        let stream = stream_fn(3u32, |n| async move {
            Ok::<_, ()>(if n == 0 { None } else { Some((n - 1, n)) })
        });
        assert_eq!(stream.collect::<Vec<_>>().await, vec![Ok(3), Ok(2), Ok(1)]);
    }

    #[tokio::test]
    async fn error_is_yielded_once() {
        let stream = stream_fn(0usize, |state| async move {
            match state {
                0 => Ok(Some((1, "pair"))),
                _ => Err("region unavailable"),
            }
        });
        futures::pin_mut!(stream);
        assert_eq!(stream.next().await, Some(Ok("pair")));
        assert_eq!(stream.next().await, Some(Err("region unavailable")));
        assert_eq!(stream.next().await, None);
    }
}
