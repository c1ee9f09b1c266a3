//! The publish/subscribe primitive everything else is built on.
//!
//! An [`Observable`] is anything which, given an [`Observer`], starts
//! delivering values to it and returns a [`Disposable`] that stops delivery.
//! There is no error or completion channel: failures travel as ordinary values.
//!
//! [`Publisher`] is the multi-subscriber broadcaster used by emitters and
//! datasources. Every subscriber owns a trampolined mailbox: a value emitted
//! while that subscriber is being delivered to (on the same thread or another
//! one) is queued and handed out by the thread already delivering. Each
//! subscriber therefore sees values one at a time and in emission order,
//! while a new subscriber gets its initial value on the subscribing thread
//! no matter what the others are doing.

use crate::disposable::Disposable;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Callback receiving values from an observable.
///
/// Cheap to clone; every clone calls the same closure.
pub struct Observer<T> {
    callback: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T> Observer<T> {
    /// Wrap a closure.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Deliver a value.
    pub fn send(&self, value: T) {
        (self.callback)(value);
    }
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Observer(<callback>)")
    }
}

/// A source of values over time.
pub trait Observable<T>: Send + Sync {
    /// Start delivering values to `observer` until the returned disposable is
    /// disposed.
    ///
    /// Implementations may deliver a "current" value synchronously before
    /// returning.
    fn observe(&self, observer: Observer<T>) -> Disposable;
}

impl<T, O> Observable<T> for Arc<O>
where
    O: Observable<T> + ?Sized,
{
    fn observe(&self, observer: Observer<T>) -> Disposable {
        (**self).observe(observer)
    }
}

type SubscribeFn<T> = dyn Fn(Observer<T>) -> Disposable + Send + Sync;

/// Type-erased observable built from a subscribe closure.
pub struct AnyObservable<T> {
    subscribe: Arc<SubscribeFn<T>>,
}

impl<T> Clone for AnyObservable<T> {
    fn clone(&self) -> Self {
        Self {
            subscribe: Arc::clone(&self.subscribe),
        }
    }
}

impl<T: 'static> AnyObservable<T> {
    /// Build an observable whose subscription logic is `subscribe`.
    pub fn new<F>(subscribe: F) -> Self
    where
        F: Fn(Observer<T>) -> Disposable + Send + Sync + 'static,
    {
        Self {
            subscribe: Arc::new(subscribe),
        }
    }

    /// Erase the type of an existing observable.
    pub fn from_observable<O>(observable: O) -> Self
    where
        O: Observable<T> + 'static,
    {
        Self::new(move |observer| observable.observe(observer))
    }
}

impl<T: Clone + Send + Sync + 'static> AnyObservable<T> {
    /// An observable that synchronously delivers `value` to every subscriber.
    pub fn just(value: T) -> Self {
        Self::new(move |observer| {
            observer.send(value.clone());
            Disposable::empty()
        })
    }
}

impl<T> Observable<T> for AnyObservable<T> {
    fn observe(&self, observer: Observer<T>) -> Disposable {
        (self.subscribe)(observer)
    }
}

impl<T> fmt::Debug for AnyObservable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AnyObservable(<subscribe>)")
    }
}

/// Identifier of a subscriber inside a [`Publisher`].
pub(crate) type SubscriberId = u64;

struct Mailbox<T> {
    queue: VecDeque<T>,
    draining: bool,
}

/// Hands values to one observer, one at a time and in push order.
///
/// Whichever thread finds the mailbox idle delivers everything queued,
/// including values pushed by other threads or by the observer itself while
/// it runs.
pub(crate) struct SerialSink<T> {
    observer: Observer<T>,
    active: AtomicBool,
    mailbox: Mutex<Mailbox<T>>,
}

/// Releases a claimed mailbox if an observer panics mid-delivery.
struct ClaimGuard<'a, T> {
    mailbox: &'a Mutex<Mailbox<T>>,
    armed: bool,
}

impl<T> Drop for ClaimGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.mailbox.lock().draining = false;
        }
    }
}

impl<T> SerialSink<T> {
    pub(crate) fn new(observer: Observer<T>) -> Self {
        Self::with_queue(observer, VecDeque::new(), false)
    }

    fn with_queue(observer: Observer<T>, queue: VecDeque<T>, draining: bool) -> Self {
        Self {
            observer,
            active: AtomicBool::new(true),
            mailbox: Mutex::new(Mailbox { queue, draining }),
        }
    }

    /// Queue `value` without delivering it.
    pub(crate) fn push(&self, value: T) {
        if self.active.load(Ordering::Acquire) {
            self.mailbox.lock().queue.push_back(value);
        }
    }

    /// Deliver everything queued, unless another call is already doing so.
    pub(crate) fn flush(&self) {
        {
            let mut mailbox = self.mailbox.lock();
            if mailbox.draining || mailbox.queue.is_empty() {
                return;
            }
            mailbox.draining = true;
        }
        self.deliver_claimed();
    }

    pub(crate) fn send(&self, value: T) {
        self.push(value);
        self.flush();
    }

    /// Stop delivering; anything still queued is dropped.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.mailbox.lock().queue.clear();
    }

    /// Deliver until the queue is empty. The caller must own the claim.
    fn deliver_claimed(&self) {
        let mut guard = ClaimGuard {
            mailbox: &self.mailbox,
            armed: true,
        };
        loop {
            let next = {
                let mut mailbox = self.mailbox.lock();
                match mailbox.queue.pop_front() {
                    Some(value) => value,
                    None => {
                        mailbox.draining = false;
                        guard.armed = false;
                        return;
                    },
                }
            };
            if self.active.load(Ordering::Acquire) {
                self.observer.send(next);
            }
        }
    }
}

/// A subscriber that has been registered but not handed anything yet.
///
/// Its mailbox is claimed by the registering thread, so nothing reaches the
/// observer until [`start`](Self::start) runs on that thread.
#[must_use = "a registration delivers nothing until started"]
pub(crate) struct Registration<T> {
    id: SubscriberId,
    sink: Arc<SerialSink<T>>,
}

impl<T> Registration<T> {
    /// Deliver the initial value and whatever was broadcast since
    /// registration, on the calling thread.
    pub(crate) fn start(self) -> SubscriberId {
        self.sink.deliver_claimed();
        self.id
    }
}

struct Subscriber<T> {
    id: SubscriberId,
    sink: Arc<SerialSink<T>>,
}

struct PublisherState<T> {
    next_id: SubscriberId,
    subscribers: Vec<Subscriber<T>>,
}

/// Multi-subscriber broadcaster with ordered, non-overlapping delivery.
///
/// # Example
///
/// ```
/// use impulse_core::observable::{ObservableExt, Publisher};
/// use std::sync::{Arc, Mutex};
///
/// let publisher = Publisher::new();
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// let subscription = publisher.subscribe(move |v: u32| sink.lock().unwrap().push(v));
///
/// publisher.emit(1);
/// publisher.emit(2);
/// subscription.dispose();
/// publisher.emit(3);
///
/// assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
/// ```
pub struct Publisher<T> {
    state: Arc<Mutex<PublisherState<T>>>,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for Publisher<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(PublisherState {
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }
}

impl<T> fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Publisher")
            .field("subscribers", &state.subscribers.len())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> Publisher<T> {
    /// Create a publisher with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcast `value` to every current subscriber.
    pub fn emit(&self, value: T) {
        self.enqueue(value);
        self.drain();
    }

    /// Compute and broadcast a value in one step.
    ///
    /// `compute` runs under the lock that orders emissions, so any
    /// bookkeeping it does matches the order subscribers see values in.
    /// Returning `None` emits nothing. `compute` must not emit on this
    /// publisher.
    pub fn emit_with<F>(&self, compute: F)
    where
        F: FnOnce() -> Option<T>,
    {
        {
            let state = self.state.lock();
            if let Some(value) = compute() {
                Self::push_to_all(&state, &value);
            }
        }
        self.drain();
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Queue a broadcast without delivering it yet.
    ///
    /// Callers pair this with [`drain`](Self::drain) once they have released
    /// any locks of their own, so the enqueue order can be fixed under those
    /// locks while delivery happens outside them.
    pub(crate) fn enqueue(&self, value: T) {
        Self::push_to_all(&self.state.lock(), &value);
    }

    fn push_to_all(state: &PublisherState<T>, value: &T) {
        tracing::trace!(subscribers = state.subscribers.len(), "publishing value");
        for subscriber in &state.subscribers {
            subscriber.sink.push(value.clone());
        }
    }

    /// Register `observer` with `initial` queued for it alone.
    ///
    /// Broadcasts queued after this call land behind `initial`. None of it
    /// is delivered until the returned registration is started.
    pub(crate) fn register(&self, observer: Observer<T>, initial: Option<T>) -> Registration<T> {
        let sink = Arc::new(SerialSink::with_queue(observer, initial.into_iter().collect(), true));
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push(Subscriber {
            id,
            sink: Arc::clone(&sink),
        });
        Registration { id, sink }
    }

    /// Remove a subscriber. Values already queued are not delivered to it.
    pub(crate) fn unregister(&self, id: SubscriberId) {
        let removed = {
            let mut state = self.state.lock();
            let index = state.subscribers.iter().position(|s| s.id == id);
            index.map(|index| state.subscribers.remove(index))
        };
        if let Some(subscriber) = removed {
            subscriber.sink.deactivate();
        }
    }

    /// Subscribe and hand out a disposable that unregisters the observer.
    ///
    /// `initial` is delivered to this observer before the call returns,
    /// ahead of anything emitted afterwards.
    pub(crate) fn subscribe_with_initial(&self, observer: Observer<T>, initial: Option<T>) -> Disposable {
        let id = self.register(observer, initial).start();
        let weak: Weak<Mutex<PublisherState<T>>> = Arc::downgrade(&self.state);
        Disposable::new(move || {
            if let Some(state) = weak.upgrade() {
                Self { state }.unregister(id);
            }
        })
    }

    /// Deliver whatever is queued for each subscriber.
    ///
    /// A subscriber whose mailbox is already being delivered by another call
    /// is skipped; that call picks up what was queued.
    pub(crate) fn drain(&self) {
        let sinks: Vec<Arc<SerialSink<T>>> = self
            .state
            .lock()
            .subscribers
            .iter()
            .map(|s| Arc::clone(&s.sink))
            .collect();
        for sink in sinks {
            sink.flush();
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> for Publisher<T> {
    fn observe(&self, observer: Observer<T>) -> Disposable {
        self.subscribe_with_initial(observer, None)
    }
}

/// Convenience methods available on every observable.
///
/// Combinators consume `self`; clone cheap handles (datasources, emitters,
/// [`AnyObservable`]) first if you need to keep the original.
pub trait ObservableExt<T>: Observable<T> + Sized + 'static {
    /// Observe with a plain closure.
    fn subscribe<F>(&self, callback: F) -> Disposable
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.observe(Observer::new(callback))
    }

    /// Erase the concrete observable type.
    fn boxed(self) -> AnyObservable<T>
    where
        T: 'static,
    {
        AnyObservable::from_observable(self)
    }
}

impl<T, O> ObservableExt<T> for O where O: Observable<T> + Sized + 'static {}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recorder<T: Send + 'static>() -> (Observer<T>, Arc<StdMutex<Vec<T>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (Observer::new(move |v| sink.lock().unwrap().push(v)), seen)
    }

    #[test]
    fn subscribers_receive_independent_sequences() {
        let publisher = Publisher::new();
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();

        let first_sub = publisher.observe(first);
        publisher.emit(1);
        let _second_sub = publisher.observe(second);
        publisher.emit(2);
        first_sub.dispose();
        publisher.emit(3);

        assert_eq!(*first_seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(*second_seen.lock().unwrap(), vec![2, 3]);
        assert_eq!(publisher.subscriber_count(), 1);
    }

    #[test]
    fn initial_value_is_delivered_synchronously_and_only_once() {
        let publisher = Publisher::new();
        let (observer, seen) = recorder();
        let _sub = publisher.subscribe_with_initial(observer, Some(0));
        assert_eq!(*seen.lock().unwrap(), vec![0]);
        publisher.emit(1);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn reentrant_emission_is_queued_behind_current_delivery() {
        let publisher: Publisher<u32> = Publisher::new();
        let first_seen = Arc::new(StdMutex::new(Vec::new()));
        let during_first = Arc::new(StdMutex::new(Vec::new()));

        let (reentrant, seen, during) = (publisher.clone(), Arc::clone(&first_seen), Arc::clone(&during_first));
        let _a = publisher.subscribe(move |v| {
            seen.lock().unwrap().push(v);
            if v == 1 {
                reentrant.emit(2);
                *during.lock().unwrap() = seen.lock().unwrap().clone();
            }
        });
        let (observer, second_seen) = recorder();
        let _b = publisher.observe(observer);

        publisher.emit(1);

        // The nested value waits until this subscriber's callback returns.
        assert_eq!(*during_first.lock().unwrap(), vec![1]);
        assert_eq!(*first_seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(*second_seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn subscribing_inside_a_callback_gets_the_initial_value_immediately() {
        let publisher: Publisher<u32> = Publisher::new();
        let nested_seen = Arc::new(StdMutex::new(Vec::new()));
        let at_return = Arc::new(StdMutex::new(None));
        let nested_subs = Arc::new(StdMutex::new(Vec::new()));

        let (inner, seen, snapshot, subs) = (
            publisher.clone(),
            Arc::clone(&nested_seen),
            Arc::clone(&at_return),
            Arc::clone(&nested_subs),
        );
        let _outer = publisher.subscribe(move |v: u32| {
            if v == 1 {
                let sink = Arc::clone(&seen);
                let sub = inner.subscribe_with_initial(Observer::new(move |v| sink.lock().unwrap().push(v)), Some(100));
                *snapshot.lock().unwrap() = Some(seen.lock().unwrap().clone());
                subs.lock().unwrap().push(sub);
            }
        });

        publisher.emit(1);
        publisher.emit(2);

        assert_eq!(*at_return.lock().unwrap(), Some(vec![100]));
        assert_eq!(*nested_seen.lock().unwrap(), vec![100, 2]);
    }

    #[test]
    fn subscribing_while_another_thread_is_delivering_gets_the_initial_value_immediately() {
        let publisher: Publisher<u32> = Publisher::new();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = StdMutex::new(release_rx);

        let _blocking = publisher.subscribe(move |_| {
            entered_tx.send(()).unwrap();
            let _ = release_rx.lock().unwrap().recv_timeout(std::time::Duration::from_secs(5));
        });

        let emitter = publisher.clone();
        let delivering = std::thread::spawn(move || emitter.emit(1));
        entered_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();

        let (observer, seen) = recorder();
        let _late = publisher.subscribe_with_initial(observer, Some(7));
        assert_eq!(*seen.lock().unwrap(), vec![7]);

        release_tx.send(()).unwrap();
        delivering.join().unwrap();
        publisher.emit(8);
        assert_eq!(*seen.lock().unwrap(), vec![7, 8]);
    }

    #[test]
    fn disposing_inside_callback_stops_later_deliveries() {
        let publisher: Publisher<u32> = Publisher::new();
        let holder: Arc<StdMutex<Option<Disposable>>> = Arc::new(StdMutex::new(None));
        let seen = Arc::new(StdMutex::new(Vec::new()));

        let h = Arc::clone(&holder);
        let s = Arc::clone(&seen);
        let sub = publisher.subscribe(move |v| {
            s.lock().unwrap().push(v);
            if let Some(d) = h.lock().unwrap().as_ref() {
                d.dispose();
            }
        });
        *holder.lock().unwrap() = Some(sub);

        publisher.emit(1);
        publisher.emit(2);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn concurrent_emitters_never_overlap_deliveries() {
        let publisher: Publisher<u32> = Publisher::new();
        let busy = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let (b, o, c) = (Arc::clone(&busy), Arc::clone(&overlaps), Arc::clone(&count));
        let _sub = publisher.subscribe(move |_| {
            if b.swap(true, Ordering::SeqCst) {
                o.fetch_add(1, Ordering::SeqCst);
            }
            c.fetch_add(1, Ordering::SeqCst);
            b.store(false, Ordering::SeqCst);
        });

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let p = publisher.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        p.emit(i);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1000);
    }

    #[test]
    fn serial_sink_never_runs_its_observer_concurrently() {
        let busy = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let (observer, seen) = recorder();
        let (b, o) = (Arc::clone(&busy), Arc::clone(&overlaps));
        let sink = Arc::new(SerialSink::new(Observer::new(move |v: (usize, usize)| {
            if b.swap(true, Ordering::SeqCst) {
                o.fetch_add(1, Ordering::SeqCst);
            }
            observer.send(v);
            b.store(false, Ordering::SeqCst);
        })));

        let threads: Vec<_> = (0..4)
            .map(|t| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        sink.send((t, i));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 800);
        for t in 0..4 {
            let order: Vec<usize> = seen.iter().filter(|(from, _)| *from == t).map(|(_, i)| *i).collect();
            assert_eq!(order, (0..200).collect::<Vec<_>>());
        }
    }

    #[test]
    fn just_delivers_synchronously() {
        let (observer, seen) = recorder();
        let _ = AnyObservable::just("x").observe(observer);
        assert_eq!(*seen.lock().unwrap(), vec!["x"]);
    }
}
