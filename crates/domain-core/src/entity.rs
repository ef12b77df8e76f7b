//! 实体基础 trait

use twinguard_common::Revision;
use twinguard_errors::AppResult;
use twinguard_event_core::{DomainEvent, EventEnvelope};

/// 实体 trait
pub trait Entity {
    type Id;

    fn id(&self) -> &Self::Id;
}

/// 事件溯源聚合根 trait
///
/// 状态只能通过 `apply` 由事件推导；每个事件把修订号推进到信封上的版本
pub trait AggregateRoot: Entity + Sized {
    type Event: DomainEvent;

    /// 聚合类型，同时是事件日志中的 `aggregate_type`
    const AGGREGATE_TYPE: &'static str;

    fn revision(&self) -> Revision;

    /// 在当前状态上应用一个事件
    ///
    /// `state` 为 None 时只有创建类事件是合法的
    fn apply(
        state: Option<Self>,
        id: &Self::Id,
        event: &EventEnvelope<Self::Event>,
    ) -> AppResult<Self>;

    /// 依次应用事件，返回最终状态
    fn replay<'a, I>(initial: Option<Self>, id: &Self::Id, events: I) -> AppResult<Option<Self>>
    where
        I: IntoIterator<Item = &'a EventEnvelope<Self::Event>>,
        Self::Event: 'a,
    {
        let mut state = initial;
        for event in events {
            state = Some(Self::apply(state, id, event)?);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use twinguard_errors::AppError;
    use twinguard_event_core::EventMetadata;

    #[derive(Debug, Serialize)]
    enum CounterEvent {
        Created,
        Incremented,
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                Self::Created => "CounterCreated",
                Self::Incremented => "CounterIncremented",
            }
        }

        fn aggregate_type(&self) -> &'static str {
            "counter"
        }
    }

    #[derive(Debug, PartialEq)]
    struct Counter {
        id: String,
        value: u32,
        revision: Revision,
    }

    impl Entity for Counter {
        type Id = String;

        fn id(&self) -> &String {
            &self.id
        }
    }

    impl AggregateRoot for Counter {
        type Event = CounterEvent;
        const AGGREGATE_TYPE: &'static str = "counter";

        fn revision(&self) -> Revision {
            self.revision
        }

        fn apply(
            state: Option<Self>,
            id: &String,
            event: &EventEnvelope<CounterEvent>,
        ) -> AppResult<Self> {
            let revision = Revision(event.version);
            match (state, &event.data) {
                (None, CounterEvent::Created) => Ok(Counter {
                    id: id.clone(),
                    value: 0,
                    revision,
                }),
                (Some(c), CounterEvent::Incremented) => Ok(Counter {
                    value: c.value + 1,
                    revision,
                    ..c
                }),
                _ => Err(AppError::internal("invalid transition")),
            }
        }
    }

    fn envelope(event: CounterEvent, version: u64) -> EventEnvelope<CounterEvent> {
        EventEnvelope::new("c1", event, version, EventMetadata::new())
    }

    #[test]
    fn test_replay_applies_events_in_order() {
        let id = "c1".to_string();
        let events = vec![
            envelope(CounterEvent::Created, 1),
            envelope(CounterEvent::Incremented, 2),
            envelope(CounterEvent::Incremented, 3),
        ];

        let counter = Counter::replay(None, &id, &events).unwrap().unwrap();
        assert_eq!(counter.value, 2);
        assert_eq!(counter.revision(), Revision(3));
    }

    #[test]
    fn test_replay_of_nothing_is_none() {
        let id = "c1".to_string();
        let events: Vec<EventEnvelope<CounterEvent>> = Vec::new();
        assert!(Counter::replay(None, &id, &events).unwrap().is_none());
    }

    #[test]
    fn test_replay_rejects_invalid_transition() {
        let id = "c1".to_string();
        let events = vec![envelope(CounterEvent::Incremented, 1)];
        assert!(Counter::replay(None, &id, &events).is_err());
    }
}
