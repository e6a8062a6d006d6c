//! Latest-of-N join over streams

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};

/// Join `sources` so that every emission of any source yields the latest
/// value seen from each source, in source order. Sources that have not
/// emitted yet are `None`.
pub fn combine_latest<T>(sources: Vec<BoxStream<'static, T>>) -> BoxStream<'static, Vec<Option<T>>>
where
    T: Clone + Send + 'static,
{
    let width = sources.len();
    let indexed = sources
        .into_iter()
        .enumerate()
        .map(|(index, source)| source.map(move |value| (index, value)).boxed());

    stream::select_all(indexed)
        .scan(vec![None; width], |latest, (index, value)| {
            latest[index] = Some(value);
            future::ready(Some(latest.clone()))
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;

    #[tokio::test]
    async fn test_emits_once_per_constituent_emission() {
        let (a_tx, a_rx) = mpsc::unbounded::<i32>();
        let (b_tx, b_rx) = mpsc::unbounded::<i32>();
        let (c_tx, c_rx) = mpsc::unbounded::<i32>();
        let mut joined = combine_latest(vec![a_rx.boxed(), b_rx.boxed(), c_rx.boxed()]);

        a_tx.unbounded_send(1).unwrap();
        assert_eq!(joined.next().await, Some(vec![Some(1), None, None]));

        c_tx.unbounded_send(30).unwrap();
        assert_eq!(joined.next().await, Some(vec![Some(1), None, Some(30)]));

        a_tx.unbounded_send(2).unwrap();
        assert_eq!(joined.next().await, Some(vec![Some(2), None, Some(30)]));

        b_tx.unbounded_send(20).unwrap();
        assert_eq!(joined.next().await, Some(vec![Some(2), Some(20), Some(30)]));
    }

    #[tokio::test]
    async fn test_ends_when_every_source_ends() {
        let joined = combine_latest(vec![stream::iter(vec![1]).boxed(), stream::empty().boxed()]);
        let all: Vec<_> = joined.collect().await;
        assert_eq!(all, vec![vec![Some(1), None]]);
    }

    #[tokio::test]
    async fn test_no_sources() {
        let joined = combine_latest::<u8>(Vec::new());
        assert_eq!(joined.collect::<Vec<_>>().await.len(), 0);
    }
}
