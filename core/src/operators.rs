//! Combinators over observables.
//!
//! Every combinator returns an [`AnyObservable`]. State that a combinator
//! keeps (accumulators, last values, slots, counters) is created per
//! subscription, so two observers of the same combined observable never share
//! it. Where that state can be touched by concurrent upstream emissions it is
//! guarded by a single lock owned by the subscription.
//!
//! # Example
//!
//! ```
//! use impulse_core::observable::{ObservableExt, Publisher};
//! use impulse_core::operators::OperatorsExt;
//! use std::sync::{Arc, Mutex};
//!
//! let numbers = Publisher::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//!
//! let _sub = numbers
//!     .clone()
//!     .filter(|n: &u32| n % 2 == 0)
//!     .map(|n| n * 10)
//!     .skip_repeats_eq()
//!     .subscribe(move |n| sink.lock().unwrap().push(n));
//!
//! for n in [1, 2, 2, 3, 4] {
//!     numbers.emit(n);
//! }
//! assert_eq!(*seen.lock().unwrap(), vec![20, 40]);
//! ```

use crate::context::ExecutionContext;
use crate::disposable::{CompositeDisposable, Disposable, SerialDisposable};
use crate::observable::{AnyObservable, Observable, Observer, SerialSink};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Combinators available on every observable of cloneable, thread-safe values.
pub trait OperatorsExt<T>: Observable<T> + Sized + 'static
where
    T: Clone + Send + Sync + 'static,
{
    /// Transform each value. One output per input, no buffering.
    fn map<U, F>(self, transform: F) -> AnyObservable<U>
    where
        U: 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let transform = Arc::new(transform);
        AnyObservable::new(move |observer: Observer<U>| {
            let transform = Arc::clone(&transform);
            self.observe(Observer::new(move |value| observer.send(transform(value))))
        })
    }

    /// Drop values for which `predicate` is false.
    fn filter<F>(self, predicate: F) -> AnyObservable<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        AnyObservable::new(move |observer: Observer<T>| {
            let predicate = Arc::clone(&predicate);
            self.observe(Observer::new(move |value| {
                if predicate(&value) {
                    observer.send(value);
                }
            }))
        })
    }

    /// Fold values into an accumulator and emit it after every upstream value.
    ///
    /// `reducer` receives the previous accumulator (`initial` for the first
    /// value) and the new value. The read-modify-write is atomic, and
    /// accumulators reach the observer one at a time in the order they were
    /// computed.
    fn reduce<A, F>(self, initial: Option<A>, reducer: F) -> AnyObservable<A>
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(Option<A>, T) -> A + Send + Sync + 'static,
    {
        let reducer = Arc::new(reducer);
        AnyObservable::new(move |observer: Observer<A>| {
            let reducer = Arc::clone(&reducer);
            let accumulator = Arc::new(Mutex::new(initial.clone()));
            let out = Arc::new(SerialSink::new(observer));
            let sink = Arc::clone(&out);
            let upstream = self.observe(Observer::new(move |value| {
                {
                    let mut accumulator = accumulator.lock();
                    let next = reducer(accumulator.take(), value);
                    *accumulator = Some(next.clone());
                    sink.push(next);
                }
                sink.flush();
            }));
            serialized(upstream, out)
        })
    }

    /// Combine-latest with one other observable, emitting pairs.
    ///
    /// Pairs reach the observer one at a time, in the order the snapshots
    /// were taken, even when both sides emit from different threads.
    fn combine_with<U, O>(self, other: O) -> AnyObservable<(T, U)>
    where
        U: Clone + Send + Sync + 'static,
        O: Observable<U> + 'static,
    {
        let this = Arc::new(self);
        let other = Arc::new(other);
        AnyObservable::new(move |observer: Observer<(T, U)>| {
            let latest: Arc<Mutex<(Option<T>, Option<U>)>> = Arc::new(Mutex::new((None, None)));
            let out = Arc::new(SerialSink::new(observer));

            let (left_latest, left_sink) = (Arc::clone(&latest), Arc::clone(&out));
            let left = this.observe(Observer::new(move |value: T| {
                {
                    let mut latest = left_latest.lock();
                    latest.0 = Some(value);
                    if let Some(pair) = snapshot_pair(&latest) {
                        left_sink.push(pair);
                    }
                }
                left_sink.flush();
            }));

            let (right_latest, right_sink) = (Arc::clone(&latest), Arc::clone(&out));
            let right = other.observe(Observer::new(move |value: U| {
                {
                    let mut latest = right_latest.lock();
                    latest.1 = Some(value);
                    if let Some(pair) = snapshot_pair(&latest) {
                        right_sink.push(pair);
                    }
                }
                right_sink.flush();
            }));

            serialized(CompositeDisposable::from_iter_disposables([left, right]).into_disposable(), out)
        })
    }

    /// Switch to a new inner observable for every upstream value.
    ///
    /// The previous inner subscription is disposed before `transform` runs
    /// for the new value, so at most one inner subscription is ever active.
    /// Concurrent upstream emissions are not serialized beyond "last
    /// transform wins".
    fn flat_map_latest<U, O, F>(self, transform: F) -> AnyObservable<U>
    where
        U: 'static,
        O: Observable<U> + 'static,
        F: Fn(T) -> O + Send + Sync + 'static,
    {
        let transform = Arc::new(transform);
        AnyObservable::new(move |observer: Observer<U>| {
            let transform = Arc::clone(&transform);
            let inner = SerialDisposable::new();
            let current = inner.clone();
            let upstream = self.observe(Observer::new(move |value| {
                current.clear();
                let next = transform(value);
                current.replace(next.observe(observer.clone()));
            }));
            CompositeDisposable::from_iter_disposables([upstream, inner.into_disposable()])
                .into_disposable()
        })
    }

    /// Drop values equal (per `is_equal`) to the previously emitted one.
    ///
    /// The first value always passes.
    fn skip_repeats<F>(self, is_equal: F) -> AnyObservable<T>
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let is_equal = Arc::new(is_equal);
        AnyObservable::new(move |observer: Observer<T>| {
            let is_equal = Arc::clone(&is_equal);
            let last: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
            let out = Arc::new(SerialSink::new(observer));
            let sink = Arc::clone(&out);
            let upstream = self.observe(Observer::new(move |value: T| {
                {
                    let mut last = last.lock();
                    if last.as_ref().is_some_and(|previous| is_equal(previous, &value)) {
                        return;
                    }
                    *last = Some(value.clone());
                    sink.push(value);
                }
                sink.flush();
            }));
            serialized(upstream, out)
        })
    }

    /// [`skip_repeats`](Self::skip_repeats) using `PartialEq`.
    fn skip_repeats_eq(self) -> AnyObservable<T>
    where
        T: PartialEq,
    {
        self.skip_repeats(|a, b| a == b)
    }

    /// Drop the first `count` values.
    ///
    /// The counter assumes a single upstream producer.
    fn skip(self, count: usize) -> AnyObservable<T> {
        AnyObservable::new(move |observer: Observer<T>| {
            let remaining = AtomicUsize::new(count);
            self.observe(Observer::new(move |value| {
                if remaining.load(Ordering::Relaxed) > 0 {
                    remaining.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
                observer.send(value);
            }))
        })
    }

    /// Re-deliver every value on `context`.
    ///
    /// If the value arrives while already running on `context` and no earlier
    /// value is still waiting to be delivered there, it is delivered inline.
    /// Otherwise it is queued behind the pending ones, so deliveries never
    /// overlap and keep arrival order, re-entrant emissions included.
    fn observe_on<C>(self, context: C) -> AnyObservable<T>
    where
        C: ExecutionContext + 'static,
    {
        let context = Arc::new(context);
        AnyObservable::new(move |observer: Observer<T>| {
            let context = Arc::clone(&context);
            let in_flight = Arc::new(AtomicUsize::new(0));
            let disposed = Arc::new(AtomicBool::new(false));

            let stopped = Arc::clone(&disposed);
            let upstream = self.observe(Observer::new(move |value: T| {
                if stopped.load(Ordering::Acquire) {
                    return;
                }
                if context.is_current() && in_flight.load(Ordering::SeqCst) == 0 {
                    observer.send(value);
                    return;
                }

                in_flight.fetch_add(1, Ordering::SeqCst);
                tracing::trace!(in_flight = in_flight.load(Ordering::Relaxed), "hopping value");
                let observer = observer.clone();
                let in_flight = Arc::clone(&in_flight);
                let stopped = Arc::clone(&stopped);
                context.execute(Box::new(move || {
                    if !stopped.load(Ordering::Acquire) {
                        observer.send(value);
                    }
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }));
            }));

            Disposable::new(move || {
                disposed.store(true, Ordering::Release);
                upstream.dispose();
            })
        })
    }
}

impl<T, O> OperatorsExt<T> for O
where
    T: Clone + Send + Sync + 'static,
    O: Observable<T> + Sized + 'static,
{
}

/// Dispose `upstream` and stop `out` from delivering anything still queued.
fn serialized<T: Send + 'static>(upstream: Disposable, out: Arc<SerialSink<T>>) -> Disposable {
    Disposable::new(move || {
        out.deactivate();
        upstream.dispose();
    })
}

fn snapshot_pair<T: Clone, U: Clone>(latest: &(Option<T>, Option<U>)) -> Option<(T, U)> {
    match latest {
        (Some(left), Some(right)) => Some((left.clone(), right.clone())),
        _ => None,
    }
}

/// Combine-latest over any number of observables.
///
/// Nothing is emitted until every observable has produced at least one
/// value. From then on, each value from any of them produces exactly one
/// emission of `combiner` applied to the latest value of every slot. Slot
/// writes and the completeness check happen under one lock, so a snapshot is
/// never partially updated, and combined values reach the observer in
/// snapshot order without overlapping.
pub fn combine<T, U, O, F>(observables: Vec<O>, combiner: F) -> AnyObservable<U>
where
    T: Clone + Send + Sync + 'static,
    U: Send + 'static,
    O: Observable<T> + 'static,
    F: Fn(Vec<T>) -> U + Send + Sync + 'static,
{
    let observables = Arc::new(observables);
    let combiner = Arc::new(combiner);
    AnyObservable::new(move |observer: Observer<U>| {
        let slots: Arc<Mutex<Vec<Option<T>>>> =
            Arc::new(Mutex::new((0..observables.len()).map(|_| None).collect()));
        let out = Arc::new(SerialSink::new(observer));
        let composite = CompositeDisposable::new();

        for (index, observable) in observables.iter().enumerate() {
            let slots = Arc::clone(&slots);
            let combiner = Arc::clone(&combiner);
            let sink = Arc::clone(&out);
            composite.add(observable.observe(Observer::new(move |value: T| {
                {
                    let mut slots = slots.lock();
                    slots[index] = Some(value);
                    if let Some(values) = slots.iter().cloned().collect::<Option<Vec<T>>>() {
                        sink.push(combiner(values));
                    }
                }
                sink.flush();
            })));
        }

        serialized(composite.into_disposable(), out)
    })
}
