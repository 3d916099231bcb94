use crate::soc::DerivedEvent;
use tokio::sync::broadcast;

/// Outbound side of derived events. Delivery is at-most-once and not replayed.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DerivedEvent);
}

/// Writes every event to the log as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &DerivedEvent) {
        match serde_json::to_string(event) {
            Ok(json) => log::info!("{} {}", event.event_type(), json),
            Err(e) => log::error!("Unable to serialize {:?}: {}", event, e),
        }
    }
}

/// Fans events out to in-process subscribers. Subscribers that lag behind lose events.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<DerivedEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> BroadcastSink {
        let (sender, _) = broadcast::channel(capacity);
        BroadcastSink { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DerivedEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: &DerivedEvent) {
        if self.sender.send(event.clone()).is_err() {
            log::trace!("No subscriber for {}", event.event_type());
        }
    }
}

impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn emit(&self, event: &DerivedEvent) {
        self.0.emit(event);
        self.1.emit(event);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::soc::{ChangeDirection, ChangeEvent};
    use chrono::{TimeZone, Utc};

    fn change() -> DerivedEvent {
        DerivedEvent::Change(ChangeEvent {
            device_key: "battery_1003_system".to_string(),
            family_id: "34038".to_string(),
            change_amount: 5.0,
            change_threshold: 5.0,
            current_soc: 45.0,
            baseline_soc: 50.0,
            direction: ChangeDirection::Decrease,
            timestamp: Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap(),
        })
    }

    #[test]
    fn broadcast_reaches_subscribers() {
        let sink = (LogSink, BroadcastSink::new(8));
        /* no subscriber yet: dropped without error */
        sink.emit(&change());

        let mut receiver = sink.1.subscribe();
        sink.emit(&change());
        assert_eq!(change(), receiver.try_recv().unwrap());
        assert!(receiver.try_recv().is_err());
    }
}
