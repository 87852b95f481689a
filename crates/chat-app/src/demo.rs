//! Sample conversations shown by the demo binary.

use parley_storage::{ConversationId, NewConversation, NewMessage, Storage, StorageResult};

struct DemoConversation {
    title: &'static str,
    messages: &'static [(bool, &'static str)],
}

// Listed in display order, newest first. `true` marks a user turn.
const DEMO_CONVERSATIONS: &[DemoConversation] = &[
    DemoConversation {
        title: "Python Data Analysis Help",
        messages: &[
            (true, "Can you help me analyze a dataset in Python?"),
            (
                false,
                "Of course! I'd be happy to help you with Python data analysis. What kind of dataset are you working with, and what insights are you looking to extract?",
            ),
        ],
    },
    DemoConversation {
        title: "Marketing Strategy Ideas",
        messages: &[
            (true, "I need ideas for a new marketing campaign"),
            (
                false,
                "I can help you brainstorm marketing campaign ideas! To provide the most relevant suggestions, could you tell me:\n\n1. What product/service are you marketing?\n2. Who is your target audience?\n3. What's your budget range?\n4. What channels are you considering?",
            ),
        ],
    },
    DemoConversation {
        title: "Code Review Request",
        messages: &[],
    },
    DemoConversation {
        title: "Email Template Creation",
        messages: &[],
    },
];

/// Fills `store` with the sample conversations and returns their ids, newest first.
pub fn seed_demo_conversations(store: &mut dyn Storage) -> StorageResult<Vec<ConversationId>> {
    let mut ids = Vec::with_capacity(DEMO_CONVERSATIONS.len());

    // Oldest first so the store's recency order matches the listing order.
    for demo in DEMO_CONVERSATIONS.iter().rev() {
        let record = store.create_conversation(NewConversation::titled(demo.title))?;
        for (is_user, content) in demo.messages {
            let message = if *is_user {
                NewMessage::user(*content)
            } else {
                NewMessage::assistant(*content)
            };
            store.append_message(record.id, message)?;
        }
        ids.push(record.id);
    }

    ids.reverse();
    tracing::debug!(count = ids.len(), "seeded demo conversations");
    Ok(ids)
}
