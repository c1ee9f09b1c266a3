//! Bridge from observables to async streams.
//!
//! [`ObservationStream`] subscribes to an observable and buffers every value
//! in an unbounded channel until the stream is polled. The subscription lives
//! exactly as long as the stream: dropping it disposes the subscription.
//!
//! ```
//! use futures::StreamExt;
//! use impulse_core::Publisher;
//! use impulse_runtime::stream::ObservationStream;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let publisher = Publisher::new();
//! let mut stream = ObservationStream::new(&publisher);
//!
//! publisher.emit(1);
//! publisher.emit(2);
//!
//! assert_eq!(stream.next().await, Some(1));
//! assert_eq!(stream.next().await, Some(2));
//! # }
//! ```

use futures::Stream;
use impulse_core::{Disposable, Observable, Observer};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Stream of the values delivered by an observable.
///
/// The stream never ends on its own; observables have no completion.
#[derive(Debug)]
pub struct ObservationStream<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    subscription: Disposable,
}

impl<T: Send + 'static> ObservationStream<T> {
    /// Subscribe to `observable`.
    ///
    /// Values delivered synchronously on subscription, such as a
    /// datasource's current state, are the first items of the stream.
    pub fn new<O>(observable: &O) -> Self
    where
        O: Observable<T> + ?Sized,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = observable.observe(Observer::new(move |value| {
            if sender.send(value).is_err() {
                tracing::trace!("observation stream dropped, discarding value");
            }
        }));
        Self { receiver, subscription }
    }

    /// Stop observing. Values already buffered can still be read.
    pub fn close(&mut self) {
        self.subscription.dispose();
        self.receiver.close();
    }
}

impl<T> Stream for ObservationStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl<T> Drop for ObservationStream<T> {
    fn drop(&mut self) {
        self.subscription.dispose();
    }
}

/// Conversion of any observable into an [`ObservationStream`].
pub trait IntoObservationStream<T> {
    /// Subscribe and return the values as a stream.
    fn into_stream(self) -> ObservationStream<T>;
}

impl<T, O> IntoObservationStream<T> for O
where
    T: Send + 'static,
    O: Observable<T>,
{
    fn into_stream(self) -> ObservationStream<T> {
        ObservationStream::new(&self)
    }
}
