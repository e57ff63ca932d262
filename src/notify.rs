use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use crossbeam::select;
use std::fmt;
use std::time::Duration;

use crate::types::SensorPacket;

pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

/// Category of a state notification, so "can't listen" and "receiving garbage" stay distinct
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateKind {
    Listening,
    BindFailed,
    DecodeFailed,
    ParseFailed,
    SocketError,
    /// Raw buffer lock poisoned by a panicked fit; ingest cannot continue
    BufferPoisoned,
    Stopped,
}

impl StateKind {
    pub fn is_failure(&self) -> bool {
        !matches!(self, StateKind::Listening | StateKind::Stopped)
    }
}

/// Human-readable server state or error
#[derive(Clone, Debug)]
pub struct StateEvent {
    pub kind: StateKind,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {:?}: {}", self.at.format("%H:%M:%S"), self.kind, self.text)
    }
}

/// Snapshot of one completed fit cycle
#[derive(Clone, Debug, PartialEq)]
pub struct DataEvent {
    pub raw: Vec<SensorPacket>,
    pub fitted: Vec<SensorPacket>,
}

#[derive(Clone, Debug)]
pub enum Notification {
    State(StateEvent),
    Data(DataEvent),
}

/// Create a notification channel with `capacity` slots for state events and
/// as many again for data events
pub fn notification_channel(capacity: usize) -> (NotificationSink, NotificationStream) {
    let (state_tx, state_rx) = channel::bounded(capacity.max(1));
    let (data_tx, data_rx) = channel::bounded(capacity.max(1));
    (
        NotificationSink { state_tx, data_tx },
        NotificationStream { state_rx, data_rx },
    )
}

/// Pipeline side: never blocks, drops events when the consumer lags.
/// State events queue separately, so a backlog of data never hides them.
#[derive(Clone, Debug)]
pub struct NotificationSink {
    state_tx: Sender<StateEvent>,
    data_tx: Sender<DataEvent>,
}

impl NotificationSink {
    pub fn state(&self, kind: StateKind, text: impl Into<String>) {
        let event = StateEvent {
            kind,
            text: text.into(),
            at: Utc::now(),
        };
        if kind.is_failure() {
            log::warn!("{:?}: {}", kind, event.text);
        } else {
            log::info!("{:?}: {}", kind, event.text);
        }
        report_send("state", self.state_tx.try_send(event));
    }

    pub fn data(&self, raw: Vec<SensorPacket>, fitted: Vec<SensorPacket>) {
        report_send("data", self.data_tx.try_send(DataEvent { raw, fitted }));
    }
}

fn report_send<T>(what: &str, result: Result<(), TrySendError<T>>) {
    match result {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            log::warn!("Notification consumer lagging, dropped {} event", what);
        }
        Err(TrySendError::Disconnected(_)) => {
            log::trace!("Notification consumer gone");
        }
    }
}

/// Consumer side, polled by the visualization layer. Pending state events
/// are delivered before pending data events.
#[derive(Clone, Debug)]
pub struct NotificationStream {
    state_rx: Receiver<StateEvent>,
    data_rx: Receiver<DataEvent>,
}

impl NotificationStream {
    pub fn try_next(&self) -> Option<Notification> {
        if let Ok(event) = self.state_rx.try_recv() {
            return Some(Notification::State(event));
        }
        self.data_rx.try_recv().ok().map(Notification::Data)
    }

    /// Wait up to `timeout`; `None` on timeout or when every sink is gone
    pub fn next_timeout(&self, timeout: Duration) -> Option<Notification> {
        if let Some(n) = self.try_next() {
            return Some(n);
        }
        select! {
            recv(self.state_rx) -> event => match event {
                Ok(event) => Some(Notification::State(event)),
                Err(_) => self.data_rx.recv_timeout(timeout).ok().map(Notification::Data),
            },
            recv(self.data_rx) -> event => match event {
                Ok(event) => Some(Notification::Data(event)),
                Err(_) => self.state_rx.recv_timeout(timeout).ok().map(Notification::State),
            },
            default(timeout) => None,
        }
    }

    /// Blocking receive; `None` once every sink is dropped
    pub fn next_blocking(&self) -> Option<Notification> {
        if let Some(n) = self.try_next() {
            return Some(n);
        }
        select! {
            recv(self.state_rx) -> event => match event {
                Ok(event) => Some(Notification::State(event)),
                Err(_) => self.data_rx.recv().ok().map(Notification::Data),
            },
            recv(self.data_rx) -> event => match event {
                Ok(event) => Some(Notification::Data(event)),
                Err(_) => self.state_rx.recv().ok().map(Notification::State),
            },
        }
    }

    /// Everything currently queued, state events first
    pub fn drain(&self) -> Vec<Notification> {
        let mut out: Vec<Notification> = self.state_rx.try_iter().map(Notification::State).collect();
        out.extend(self.data_rx.try_iter().map(Notification::Data));
        out
    }

    pub fn len(&self) -> usize {
        self.state_rx.len() + self.data_rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state_rx.is_empty() && self.data_rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_then_data_in_order() {
        let (sink, stream) = notification_channel(8);
        sink.state(StateKind::Listening, "Listening on port 5554");
        sink.data(vec![SensorPacket::default()], vec![SensorPacket::default()]);

        match stream.try_next() {
            Some(Notification::State(e)) => {
                assert_eq!(e.kind, StateKind::Listening);
                assert!(e.text.contains("5554"));
            }
            other => panic!("expected state event, got {:?}", other),
        }
        match stream.try_next() {
            Some(Notification::Data(e)) => assert_eq!(e.raw.len(), e.fitted.len()),
            other => panic!("expected data event, got {:?}", other),
        }
        assert!(stream.try_next().is_none());
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (sink, stream) = notification_channel(2);
        for i in 0..5 {
            sink.state(StateKind::ParseFailed, format!("bad packet {}", i));
        }
        let events = stream.drain();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_data_backlog_does_not_hide_state_events() {
        let (sink, stream) = notification_channel(2);
        for _ in 0..10 {
            sink.data(vec![SensorPacket::default()], vec![SensorPacket::default()]);
        }
        sink.state(StateKind::BindFailed, "Cannot listen on port 5554");
        sink.state(StateKind::ParseFailed, "Expected 11 fields, found 4");

        match stream.try_next() {
            Some(Notification::State(e)) => assert_eq!(e.kind, StateKind::BindFailed),
            other => panic!("expected state event, got {:?}", other),
        }
        let rest = stream.drain();
        assert!(matches!(&rest[0], Notification::State(e) if e.kind == StateKind::ParseFailed));
        assert_eq!(
            rest.iter().filter(|n| matches!(n, Notification::Data(_))).count(),
            2
        );
    }

    #[test]
    fn test_blocking_receive_sees_both_queues() {
        let (sink, stream) = notification_channel(4);
        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            sink.data(vec![], vec![]);
            sink.state(StateKind::Stopped, "Stopped listening on port 5554");
        });
        let mut seen = 0;
        while seen < 2 && stream.next_timeout(Duration::from_secs(2)).is_some() {
            seen += 1;
        }
        producer.join().unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_failure_kinds() {
        assert!(StateKind::BindFailed.is_failure());
        assert!(StateKind::ParseFailed.is_failure());
        assert!(StateKind::BufferPoisoned.is_failure());
        assert!(!StateKind::Listening.is_failure());
    }

    #[test]
    fn test_disconnected_stream() {
        let (sink, stream) = notification_channel(2);
        drop(sink);
        assert!(stream.next_timeout(Duration::from_millis(10)).is_none());
        assert!(stream.next_blocking().is_none());
    }
}
