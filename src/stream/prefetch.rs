use crate::common::*;

/// Drive a stream from a background task through a bounded channel.
///
/// At most `depth` finished items wait in the channel, giving backpressure
/// to the producer. Dropping the output stream drops the receiver and the
/// producer task stops at its next send, so abandoned iteration leaks
/// neither buffers nor tasks. Must be called within a tokio runtime.
pub fn prefetched<T>(stream: BoxStream<'static, T>, depth: usize) -> BoxStream<'static, T>
where
    T: 'static + Send,
{
    let (tx, rx) = flume::bounded(depth.max(1));

    tokio::spawn(async move {
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            if tx.send_async(item).await.is_err() {
                break;
            }
        }
    });

    rx.into_stream().boxed()
}
