use crate::common::*;

/// Reorder stream items within a bounded shuffle window.
///
/// The buffer is filled to `capacity` before items are drawn at random, so
/// the reordering is approximate, not a full-dataset shuffle. Every `Ok`
/// item of the input is emitted exactly once; errors pass through as they
/// arrive.
pub fn try_shuffle<T, S>(stream: S, capacity: usize, rng: StdRng) -> BoxStream<'static, Result<T>>
where
    S: 'static + Send + Stream<Item = Result<T>>,
    T: 'static + Send,
{
    let capacity = capacity.max(1);
    let buffer: Vec<T> = Vec::with_capacity(capacity);

    stream::unfold(
        (stream.boxed(), buffer, rng, false),
        move |(mut stream, mut buffer, mut rng, mut finished)| async move {
            loop {
                if !finished && buffer.len() < capacity {
                    match stream.next().await {
                        Some(Ok(item)) => buffer.push(item),
                        Some(Err(err)) => {
                            return Some((Err(err), (stream, buffer, rng, finished)));
                        }
                        None => finished = true,
                    }
                    continue;
                }

                if buffer.is_empty() {
                    return None;
                }

                let index = rng.gen_range(0..buffer.len());
                let item = buffer.swap_remove(index);
                return Some((Ok(item), (stream, buffer, rng, finished)));
            }
        },
    )
    .boxed()
}
