use proptest::prelude::*;
use serde_json::json;

use shared::capabilities::{ChannelScope, RealtimeEvent, RealtimeEventKind};
use shared::event::Event;
use shared::model::{CaseId, Message, MessageId, UserId};
use shared::Model;

fn message(id: u8, minute: u8) -> Message {
    Message {
        id: MessageId::new(format!("m{id}")).unwrap(),
        case_id: CaseId::new("case-1").unwrap(),
        sender_id: UserId::new("u2").unwrap(),
        body: format!("message {id}"),
        created_at: format!("2024-03-01T10:{minute:02}:00Z"),
    }
}

fn pushed(message: &Message) -> Event {
    Event::RealtimeReceived {
        scope: ChannelScope::Case(message.case_id.clone()),
        event: Box::new(RealtimeEvent::new(
            RealtimeEventKind::MessageInserted,
            json!(message),
        )),
    }
}

fn opened_model() -> Model {
    let mut model = Model::new();
    model.update(Event::CaseOpened {
        case_id: CaseId::new("case-1").unwrap(),
    });
    model.drain_commands();
    model
}

proptest! {
    #[test]
    fn chat_holds_each_message_once_in_time_order(
        ids in prop::collection::vec(0u8..12, 0..40),
        fetched in prop::collection::vec(0u8..12, 0..8),
        fetch_after in 0usize..40,
    ) {
        let mut model = opened_model();
        let initial: Vec<Message> = fetched.iter().map(|&id| message(id, id)).collect();

        for (i, &id) in ids.iter().enumerate() {
            if i == fetch_after {
                model.update(Event::MessagesLoaded {
                    case_id: CaseId::new("case-1").unwrap(),
                    result: Box::new(Ok(initial.clone())),
                });
            }
            model.update(pushed(&message(id, id)));
        }

        let chat = &model.case_screen.chat.messages;
        let mut seen: Vec<&str> = chat.iter().map(|m| m.id.as_str()).collect();
        let total = seen.len();
        seen.sort_unstable();
        seen.dedup();
        prop_assert_eq!(seen.len(), total);

        let mut expected: Vec<u8> = ids.clone();
        if fetch_after < ids.len() {
            expected.extend(&fetched);
        }
        expected.sort_unstable();
        expected.dedup();
        prop_assert_eq!(total, expected.len());

        prop_assert!(chat.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        prop_assert!(model.drain_commands().is_empty());
    }
}
