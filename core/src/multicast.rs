//! Reference-counted fan-out with a synchronously readable current value.
//!
//! One upstream connection is shared by every downstream observer. The
//! connection is established when the observer count goes 0 → 1 and torn
//! down when it goes 1 → 0; any other transition leaves it alone. Each
//! activation gets a new epoch, and values sent through a connection from an
//! older epoch are ignored.
//!
//! Every observer receives the current value synchronously when it arrives.
//! When the upstream itself replays its current value on subscription, the
//! fan-out is built with [`Multicast::over_replaying`]: the first observer
//! then gets that replay instead of a duplicate of the stored value.
//!
//! The [`Sink`] handed to the upstream only holds a weak reference back to
//! the fan-out. Strong references live in the owner's handle and in every
//! disposable returned from `observe`, so upstream callbacks never keep the
//! fan-out alive on their own.

use crate::disposable::Disposable;
use crate::observable::{Observer, Publisher, SubscriberId};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Connects the fan-out to its upstream, sending values into the sink.
pub(crate) type Connect<T> = Box<dyn Fn(Sink<T>) -> Disposable + Send + Sync>;

struct Activation<T> {
    current: T,
    observers: usize,
    epoch: u64,
    upstream: Option<Disposable>,
}

struct Inner<T> {
    label: &'static str,
    upstream_replays: bool,
    activation: Mutex<Activation<T>>,
    publisher: Publisher<T>,
    connect: Connect<T>,
}

pub(crate) struct Multicast<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Multicast<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Multicast<T> {
    pub(crate) fn new(label: &'static str, initial: T, connect: Connect<T>) -> Self {
        Self::build(label, initial, connect, false)
    }

    /// Fan-out over an upstream that delivers its current value as soon as
    /// it is connected.
    pub(crate) fn over_replaying(label: &'static str, initial: T, connect: Connect<T>) -> Self {
        Self::build(label, initial, connect, true)
    }

    fn build(label: &'static str, initial: T, connect: Connect<T>, upstream_replays: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                label,
                upstream_replays,
                activation: Mutex::new(Activation {
                    current: initial,
                    observers: 0,
                    epoch: 0,
                    upstream: None,
                }),
                publisher: Publisher::new(),
                connect,
            }),
        }
    }

    pub(crate) fn current(&self) -> T {
        self.inner.activation.lock().current.clone()
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.inner.activation.lock().observers
    }

    /// Register `observer`, deliver the current value to it, and connect
    /// upstream if it is the first observer.
    ///
    /// The current value reaches `observer` before this returns, even when
    /// called from inside another observer's callback or while another
    /// thread is busy delivering.
    pub(crate) fn observe(&self, observer: Observer<T>) -> Disposable {
        let (registration, connect_epoch) = {
            let mut activation = self.inner.activation.lock();
            let replayed_by_upstream = activation.observers == 0 && self.inner.upstream_replays;
            let initial = (!replayed_by_upstream).then(|| activation.current.clone());
            let registration = self.inner.publisher.register(observer, initial);
            activation.observers += 1;
            let connect_epoch = (activation.observers == 1).then(|| {
                activation.epoch += 1;
                activation.epoch
            });
            (registration, connect_epoch)
        };
        let id = registration.start();

        if let Some(epoch) = connect_epoch {
            Inner::connect(&self.inner, epoch);
        }

        let inner = Arc::clone(&self.inner);
        Disposable::new(move || inner.release(id))
    }
}

/// Where one upstream connection sends its values.
pub(crate) struct Sink<T> {
    inner: Weak<Inner<T>>,
    epoch: u64,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
            epoch: self.epoch,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Sink<T> {
    pub(crate) fn send(&self, value: T) {
        self.send_if(value, |_| true);
    }

    /// Publish `value` only if `admit` holds.
    ///
    /// `admit` is evaluated under the same lock that orders publication, so
    /// no other value can be published between the check and this one.
    pub(crate) fn send_if<F>(&self, value: T, admit: F)
    where
        F: FnOnce(&T) -> bool,
    {
        if let Some(inner) = self.inner.upgrade() {
            inner.publish(self.epoch, value, admit);
        }
    }

    pub(crate) fn into_observer(self) -> Observer<T> {
        Observer::new(move |value| self.send(value))
    }
}

impl<T: Clone + Send + Sync + 'static> Inner<T> {
    fn connect(this: &Arc<Self>, epoch: u64) {
        tracing::debug!(datasource = this.label, epoch, "connecting upstream");
        let sink = Sink {
            inner: Arc::downgrade(this),
            epoch,
        };
        let upstream = (this.connect)(sink);

        let mut activation = this.activation.lock();
        if activation.epoch == epoch && activation.observers > 0 {
            activation.upstream = Some(upstream);
        } else {
            // Every observer left while the connection was being made.
            drop(activation);
            upstream.dispose();
        }
    }

    fn publish<F>(&self, epoch: u64, value: T, admit: F)
    where
        F: FnOnce(&T) -> bool,
    {
        {
            let mut activation = self.activation.lock();
            if activation.epoch != epoch {
                tracing::trace!(datasource = self.label, epoch, "dropping value from old connection");
                return;
            }
            if !admit(&value) {
                return;
            }
            activation.current = value.clone();
            self.publisher.enqueue(value);
        }
        self.publisher.drain();
    }

    fn release(&self, id: SubscriberId) {
        self.publisher.unregister(id);
        let upstream = {
            let mut activation = self.activation.lock();
            activation.observers = activation.observers.saturating_sub(1);
            if activation.observers == 0 {
                activation.epoch += 1;
                activation.upstream.take()
            } else {
                None
            }
        };
        if let Some(upstream) = upstream {
            tracing::debug!(datasource = self.label, "last observer left, disconnecting upstream");
            upstream.dispose();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type SinkSlot = Arc<Mutex<Option<Sink<u32>>>>;

    fn counting_multicast() -> (Multicast<u32>, Arc<AtomicUsize>, Arc<AtomicUsize>, SinkSlot) {
        let connects = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let sink_slot: SinkSlot = Arc::new(Mutex::new(None));

        let (c, d, s) = (Arc::clone(&connects), Arc::clone(&disconnects), Arc::clone(&sink_slot));
        let multicast = Multicast::new(
            "test",
            0,
            Box::new(move |sink| {
                c.fetch_add(1, Ordering::SeqCst);
                *s.lock() = Some(sink);
                let d = Arc::clone(&d);
                Disposable::new(move || {
                    d.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );
        (multicast, connects, disconnects, sink_slot)
    }

    #[test]
    fn connects_on_first_and_disconnects_on_last_observer() {
        let (multicast, connects, disconnects, _) = counting_multicast();

        let a = multicast.observe(Observer::new(|_| {}));
        let b = multicast.observe(Observer::new(|_| {}));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(multicast.observer_count(), 2);

        a.dispose();
        a.dispose();
        assert_eq!(disconnects.load(Ordering::SeqCst), 0);
        b.dispose();
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);

        let _c = multicast.observe(Observer::new(|_| {}));
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn values_from_an_old_connection_are_ignored() {
        let (multicast, _, _, sink_slot) = counting_multicast();

        let first = multicast.observe(Observer::new(|_| {}));
        let old_sink = sink_slot.lock().clone().unwrap();
        first.dispose();

        let _second = multicast.observe(Observer::new(|_| {}));
        old_sink.send(99);
        assert_eq!(multicast.current(), 0);

        let new_sink = sink_slot.lock().clone().unwrap();
        new_sink.send(5);
        assert_eq!(multicast.current(), 5);
    }

    #[test]
    fn current_value_is_delivered_first() {
        let (multicast, _, _, sink_slot) = counting_multicast();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        let _a = multicast.observe(Observer::new(move |v| s.lock().push(v)));
        sink_slot.lock().clone().unwrap().send(3);

        let late = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&late);
        let _b = multicast.observe(Observer::new(move |v| l.lock().push(v)));

        assert_eq!(*seen.lock(), vec![0, 3]);
        assert_eq!(*late.lock(), vec![3]);
    }

    #[test]
    fn replaying_upstream_serves_as_first_observers_initial_value() {
        let upstream: Publisher<u32> = Publisher::new();
        let source = upstream.clone();
        let multicast = Multicast::over_replaying(
            "test",
            0,
            Box::new(move |sink: Sink<u32>| source.subscribe_with_initial(sink.into_observer(), Some(7))),
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _a = multicast.observe(Observer::new(move |v| s.lock().push(v)));
        assert_eq!(*seen.lock(), vec![7]);

        let late = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&late);
        let _b = multicast.observe(Observer::new(move |v| l.lock().push(v)));
        upstream.emit(8);
        assert_eq!(*seen.lock(), vec![7, 8]);
        assert_eq!(*late.lock(), vec![7, 8]);
    }

    #[test]
    fn rejected_values_leave_the_current_value_alone() {
        let (multicast, _, _, sink_slot) = counting_multicast();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _a = multicast.observe(Observer::new(move |v| s.lock().push(v)));

        let sink = sink_slot.lock().clone().unwrap();
        sink.send_if(4, |v| *v % 2 == 0);
        sink.send_if(5, |v| *v % 2 == 0);

        assert_eq!(multicast.current(), 4);
        assert_eq!(*seen.lock(), vec![0, 4]);
    }

    #[test]
    fn observing_from_inside_a_callback_gets_the_current_value_immediately() {
        let (multicast, _, _, sink_slot) = counting_multicast();
        let nested_seen = Arc::new(Mutex::new(Vec::new()));
        let at_return = Arc::new(Mutex::new(None));
        let nested_subs = Arc::new(Mutex::new(Vec::new()));

        let (inner, seen, snapshot, subs) = (
            multicast.clone(),
            Arc::clone(&nested_seen),
            Arc::clone(&at_return),
            Arc::clone(&nested_subs),
        );
        let _outer = multicast.observe(Observer::new(move |v: u32| {
            if v == 3 {
                let sink = Arc::clone(&seen);
                subs.lock().push(inner.observe(Observer::new(move |v| sink.lock().push(v))));
                *snapshot.lock() = Some(seen.lock().clone());
            }
        }));
        sink_slot.lock().clone().unwrap().send(3);

        assert_eq!(*at_return.lock(), Some(vec![3]));
        assert_eq!(*nested_seen.lock(), vec![3]);
    }

    #[test]
    fn observing_while_another_thread_is_delivering_gets_the_current_value_immediately() {
        let (multicast, _, _, sink_slot) = counting_multicast();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);

        let _blocking = multicast.observe(Observer::new(move |v: u32| {
            if v == 9 {
                entered_tx.send(()).unwrap();
                let _ = release_rx.lock().unwrap().recv_timeout(std::time::Duration::from_secs(5));
            }
        }));
        let sink = sink_slot.lock().clone().unwrap();
        let delivering = std::thread::spawn(move || sink.send(9));
        entered_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _late = multicast.observe(Observer::new(move |v| s.lock().push(v)));
        assert_eq!(*seen.lock(), vec![9]);

        release_tx.send(()).unwrap();
        delivering.join().unwrap();
    }
}
