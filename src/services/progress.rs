//! Per-session progress fan-out.
//!
//! Policies: subscribers see only events published after they subscribed;
//! each subscriber buffers up to a fixed window and is dropped with a
//! final `Lagged(n)` when it falls behind; publishers never block; the
//! terminal event closes the bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::models::ProgressEvent;

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Fan-out channel for one session's progress events.
pub struct ProgressBus {
    tx: broadcast::Sender<ProgressEvent>,
    terminated: Arc<AtomicBool>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    pub fn with_buffer(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Publish without blocking. Events after the terminal one are
    /// discarded; a send with no subscribers is not an error.
    pub fn publish(&self, event: ProgressEvent) {
        if self.terminated.load(Ordering::SeqCst) {
            return;
        }
        if event.is_terminal() {
            self.terminated.store(true, Ordering::SeqCst);
        }
        let _ = self.tx.send(event);
    }

    /// Open a stream of events published from this point on. After the
    /// bus is closed the stream ends immediately.
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
            finished: self.terminated.load(Ordering::SeqCst),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of the session event stream.
pub struct EventStream {
    rx: broadcast::Receiver<ProgressEvent>,
    finished: bool,
}

impl EventStream {
    /// Next event, or `None` once the stream is over. A subscriber that
    /// lagged past its buffer receives `Lagged { missed }` as its final
    /// event.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Ok(event) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Some(event)
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                self.finished = true;
                Some(ProgressEvent::Lagged { missed })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Collect every remaining event through the terminal one.
    pub async fn collect(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            let terminal = event.is_terminal() || matches!(event, ProgressEvent::Lagged { .. });
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn candidate(n: u32) -> ProgressEvent {
        ProgressEvent::CandidateFound {
            video_id: format!("video-{n:06}"),
            title: format!("Artist {n} - Song"),
        }
    }

    #[tokio::test]
    async fn subscribers_see_only_later_events() {
        let bus = ProgressBus::new();
        bus.publish(candidate(1));
        let mut stream = bus.subscribe();
        bus.publish(candidate(2));
        bus.publish(ProgressEvent::session_failed(ErrorKind::Cancelled, "stop"));

        assert_eq!(stream.next().await, Some(candidate(2)));
        assert!(stream.next().await.unwrap().is_terminal());
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn slow_subscriber_gets_lagged_and_ends() {
        let bus = ProgressBus::with_buffer(4);
        let mut slow = bus.subscribe();
        for n in 0..20 {
            bus.publish(candidate(n));
        }
        // The next read reports the overflow and closes the stream.
        let first = slow.next().await.unwrap();
        match first {
            ProgressEvent::Lagged { missed } => assert!(missed > 0),
            other => panic!("expected lag notice, got {other:?}"),
        }
        assert_eq!(slow.next().await, None);
    }

    #[tokio::test]
    async fn other_subscribers_unaffected_by_slow_one() {
        let bus = ProgressBus::with_buffer(4);
        let _slow = bus.subscribe();
        for n in 0..20 {
            bus.publish(candidate(n));
        }
        // A fresh subscriber still gets post-subscription events.
        let mut fresh = bus.subscribe();
        bus.publish(candidate(99));
        assert_eq!(fresh.next().await, Some(candidate(99)));
    }

    #[tokio::test]
    async fn publish_after_terminal_is_dropped() {
        let bus = ProgressBus::new();
        let mut stream = bus.subscribe();
        bus.publish(ProgressEvent::session_failed(ErrorKind::Fatal, "boom"));
        bus.publish(candidate(1));

        assert!(stream.next().await.unwrap().is_terminal());
        assert_eq!(stream.next().await, None);
        assert!(bus.is_closed());
    }

    #[tokio::test]
    async fn subscribe_after_close_yields_nothing() {
        let bus = ProgressBus::new();
        bus.publish(ProgressEvent::session_failed(ErrorKind::Fatal, "boom"));
        let mut late = bus.subscribe();
        assert_eq!(late.next().await, None);
    }
}
