//! Resettable one-shot timeout over the transport's cancellable timers.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use crate::core::{TimerId, Transport};

/// A named timeout with a fixed delay and callback, restartable any number
/// of times. Transport timers are one-shot; this wrapper tracks the
/// in-flight `TimerId` so `reset`/`disable` can cancel it, which the
/// transport guarantees prevents the callback from firing.
///
/// Destruction cancels too: every scheduled task carries a validity token
/// that drop revokes, since no transport handle is available at drop time.
/// The transport-side timer entry lingers until its deadline and then
/// fizzles without invoking the callback.
pub struct StatefulTimeout<T: Transport> {
    delay: Duration,
    callback: Rc<dyn Fn(&mut T)>,
    timer_id: Option<TimerId>,

    /// Validity token shared with scheduled tasks; false once dropped.
    alive: Rc<Cell<bool>>,
}

impl<T: Transport> StatefulTimeout<T> {
    /// Creates a timeout; nothing is scheduled until `reset`/`enable`.
    pub fn new(delay: Duration, callback: impl Fn(&mut T) + 'static) -> Self {
        StatefulTimeout {
            delay,
            callback: Rc::new(callback),
            timer_id: None,
            alive: Rc::new(Cell::new(true)),
        }
    }

    /// Cancels any in-flight timer and starts a fresh one.
    pub fn reset(&mut self, transport: &mut T) {
        if let Some(id) = self.timer_id.take() {
            transport.cancel(id);
        }
        let callback = self.callback.clone();
        let alive = self.alive.clone();
        self.timer_id = Some(transport.schedule(
            self.delay,
            Box::new(move |t| {
                if alive.get() {
                    (callback.as_ref())(t)
                }
            }),
        ));
    }

    /// Starts the timer only if it has not been started since the last
    /// `disable` (a fired timer still counts as started).
    pub fn enable(&mut self, transport: &mut T) {
        if self.timer_id.is_none() {
            self.reset(transport);
        }
    }

    /// Cancels the in-flight timer, if any.
    pub fn disable(&mut self, transport: &mut T) {
        if let Some(id) = self.timer_id.take() {
            transport.cancel(id);
        }
    }
}

impl<T: Transport> Drop for StatefulTimeout<T> {
    fn drop(&mut self) {
        self.alive.set(false);
    }
}

#[cfg(test)]
mod timeout_tests {
    use super::*;
    use std::cell::Cell;

    use crate::core::ClusterConfig;
    use crate::transport::SimulatedTransport;

    fn empty_sim() -> SimulatedTransport {
        SimulatedTransport::new(ClusterConfig::new(0, vec!["replica-0".into()]))
    }

    #[test]
    fn fires_after_delay() {
        let mut transport = empty_sim();
        let fired = Rc::new(Cell::new(false));
        let fired_ref = fired.clone();
        let mut timeout = StatefulTimeout::new(
            Duration::from_millis(10),
            move |_: &mut SimulatedTransport| fired_ref.set(true),
        );
        timeout.reset(&mut transport);
        transport.run();
        assert!(fired.get());
    }

    #[test]
    fn disable_prevents_firing() {
        let mut transport = empty_sim();
        let fired = Rc::new(Cell::new(false));
        let fired_ref = fired.clone();
        let mut timeout = StatefulTimeout::new(
            Duration::from_millis(10),
            move |_: &mut SimulatedTransport| fired_ref.set(true),
        );
        timeout.reset(&mut transport);
        timeout.disable(&mut transport);
        transport.run();
        assert!(!fired.get());
    }

    #[test]
    fn reset_fires_once() {
        let mut transport = empty_sim();
        let count = Rc::new(Cell::new(0));
        let count_ref = count.clone();
        let mut timeout = StatefulTimeout::new(
            Duration::from_millis(10),
            move |_: &mut SimulatedTransport| count_ref.set(count_ref.get() + 1),
        );
        timeout.reset(&mut transport);
        timeout.reset(&mut transport);
        timeout.reset(&mut transport);
        transport.run();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn drop_prevents_firing() {
        let mut transport = empty_sim();
        let fired = Rc::new(Cell::new(false));
        let fired_ref = fired.clone();
        let mut timeout = StatefulTimeout::new(
            Duration::from_millis(10),
            move |_: &mut SimulatedTransport| fired_ref.set(true),
        );
        timeout.reset(&mut transport);
        drop(timeout);
        transport.run();
        assert!(!fired.get());
    }

    #[test]
    fn enable_is_idempotent() {
        let mut transport = empty_sim();
        let count = Rc::new(Cell::new(0));
        let count_ref = count.clone();
        let mut timeout = StatefulTimeout::new(
            Duration::from_millis(10),
            move |_: &mut SimulatedTransport| count_ref.set(count_ref.get() + 1),
        );
        timeout.enable(&mut transport);
        timeout.enable(&mut transport);
        transport.run();
        assert_eq!(count.get(), 1);
    }
}
