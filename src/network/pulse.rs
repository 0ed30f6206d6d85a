//! Single-slot, drop-on-full signals
//!
//! A `tokio::sync::mpsc` channel of capacity 1: `try_send` either
//! succeeds or is silently discarded, and a receiver just learns
//! "something changed, re-check state" (or, for redo, "re-check state
//! against this specific peer").

use tokio::sync::mpsc;

/// A mailbox that holds at most one pending value of `T`. A second
/// `pulse` before the first is consumed is dropped, never queued. This
/// is what makes redo/delivery signals coalesce instead of replaying
/// stale history.
pub struct PulseSlot<T> {
    tx: mpsc::Sender<T>,
    rx: tokio::sync::Mutex<mpsc::Receiver<T>>,
}

impl<T> PulseSlot<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Non-blocking pulse. Dropped silently if a pulse is already
    /// pending and unconsumed.
    pub fn pulse(&self, value: T) {
        let _ = self.tx.try_send(value);
    }

    /// Awaits the next pulse. `None` only if every sender has been
    /// dropped, which doesn't happen here since `self` holds one.
    pub async fn wait(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }
}

impl<T> Default for PulseSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_pulse_before_consume_is_dropped() {
        let slot: PulseSlot<u32> = PulseSlot::new();
        slot.pulse(1);
        slot.pulse(2); // dropped, slot already holds 1
        assert_eq!(slot.wait().await, Some(1));
    }

    #[tokio::test]
    async fn pulses_after_consume_are_delivered() {
        let slot: PulseSlot<u32> = PulseSlot::new();
        slot.pulse(1);
        assert_eq!(slot.wait().await, Some(1));
        slot.pulse(2);
        assert_eq!(slot.wait().await, Some(2));
    }
}
