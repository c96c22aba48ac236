mod helpers;

use std::sync::Arc;

use helpers::*;
use olivia::session::fusion::EntrySource;
use olivia::session::{ContextEntry, MessageOut, ServerEvent, WriterStats};
use olivia::socket::dispatch;
use olivia::store::types::Role;
use olivia::store::{transcript, TranscriptStore};

const CONVERSATION: &str = "c1234567890123456789";

#[tokio::test]
async fn reply_is_emitted_and_both_turns_are_indexed() {
    let store = test_store();
    let ada = seed_user(&store, "ada@example.com", "Ada");
    seed_conversation_with_id(&store, CONVERSATION, &ada.id);
    let generator = Arc::new(RecordingGenerator::default());
    let state = build_state(&store, Arc::new(HashEmbedder), generator.clone());
    let (session, mut rx) = open_session(&state, ada.clone());

    dispatch(
        &state.exchange,
        &session,
        &message_in(CONVERSATION, "I adopted a cat named Miso"),
    )
    .await;

    assert_eq!(
        rx.try_recv().unwrap(),
        ServerEvent::MessageOut(MessageOut {
            conversation: CONVERSATION.into(),
            content: "Ada, you said: I adopted a cat named Miso".into(),
        })
    );

    // Nothing was indexed yet when the context was built.
    let context = generator.last_context();
    assert_eq!(context.len(), 1);
    assert_eq!(context.entries()[0].source, EntrySource::Transcript);
    assert_eq!(context.entries()[0].role, Role::User);

    state.exchange.writer().drain().await;
    assert_eq!(state.exchange.writer().stats(), WriterStats { indexed: 2, failed: 0 });
    assert_eq!(fragment_count(&store, CONVERSATION), 2);

    let turns = store.load_transcript(CONVERSATION).unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[1].role, Role::Model);
    assert_eq!(turns[1].content, "Ada, you said: I adopted a cat named Miso");

    let activity = store
        .with_conn(|conn| transcript::last_activity(conn, CONVERSATION))
        .unwrap();
    assert_eq!(activity.as_deref(), Some(turns[0].created_at.as_str()));
}

#[tokio::test]
async fn first_exchange_on_empty_conversation() {
    let store = test_store();
    let u1 = seed_user(&store, "u1@example.com", "Uma");
    seed_conversation_with_id(&store, CONVERSATION, &u1.id);
    let generator = Arc::new(RecordingGenerator::replying("hi there"));
    let state = build_state(&store, Arc::new(HashEmbedder), generator.clone());
    let (session, mut rx) = open_session(&state, u1);

    dispatch(&state.exchange, &session, &message_in(CONVERSATION, "hello")).await;

    let context = generator.last_context();
    assert_eq!(
        context.entries(),
        &[ContextEntry::transcript(Role::User, "hello".into())]
    );
    assert_eq!(
        rx.try_recv().unwrap(),
        ServerEvent::MessageOut(MessageOut {
            conversation: CONVERSATION.into(),
            content: "hi there".into(),
        })
    );

    state.exchange.writer().drain().await;
    let turns = store.load_transcript(CONVERSATION).unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].content, "hi there");
    assert_eq!(fragment_count(&store, CONVERSATION), 2);
}

#[tokio::test]
async fn later_conversation_recalls_earlier_exchange() {
    let store = test_store();
    let ada = seed_user(&store, "ada@example.com", "Ada");
    seed_conversation_with_id(&store, CONVERSATION, &ada.id);
    let generator = Arc::new(RecordingGenerator::default());
    let state = build_state(&store, Arc::new(HashEmbedder), generator.clone());
    let (session, _rx) = open_session(&state, ada.clone());

    dispatch(
        &state.exchange,
        &session,
        &message_in(CONVERSATION, "I adopted a cat named Miso"),
    )
    .await;
    state.exchange.writer().drain().await;

    let second = seed_conversation(&store, &ada.id);
    dispatch(
        &state.exchange,
        &session,
        &message_in(&second, "what is my cat called?"),
    )
    .await;

    let context = generator.last_context();
    assert!(context.has_fragments());
    let memory = &context.entries()[0];
    assert_eq!(memory.role, Role::User);
    assert!(memory.content.starts_with("Relevant past messages:\n\n"));
    assert!(memory.content.contains("I adopted a cat named Miso"));

    // The new conversation's transcript follows, ending with the new turn.
    assert_eq!(context.len(), 2);
    assert_eq!(context.entries()[1].content, "what is my cat called?");
}

#[tokio::test]
async fn fragments_never_cross_users() {
    let store = test_store();
    let ada = seed_user(&store, "ada@example.com", "Ada");
    let bob = seed_user(&store, "bob@example.com", "Bob");
    seed_conversation_with_id(&store, CONVERSATION, &ada.id);
    let bobs = seed_conversation(&store, &bob.id);
    let generator = Arc::new(RecordingGenerator::default());
    let state = build_state(&store, Arc::new(HashEmbedder), generator.clone());
    let (ada_session, _ada_rx) = open_session(&state, ada);
    let (bob_session, mut bob_rx) = open_session(&state, bob);

    dispatch(
        &state.exchange,
        &ada_session,
        &message_in(CONVERSATION, "my bank pin is secret"),
    )
    .await;
    state.exchange.writer().drain().await;

    dispatch(
        &state.exchange,
        &bob_session,
        &message_in(&bobs, "what is the bank pin?"),
    )
    .await;

    assert!(bob_rx.try_recv().is_ok());
    let context = generator.last_context();
    assert!(!context.has_fragments());
    assert!(context
        .entries()
        .iter()
        .all(|e| !e.content.contains("secret")));
}

#[tokio::test]
async fn replies_go_only_to_the_requesting_connection() {
    let store = test_store();
    let ada = seed_user(&store, "ada@example.com", "Ada");
    seed_conversation_with_id(&store, CONVERSATION, &ada.id);
    let state = build_state(
        &store,
        Arc::new(HashEmbedder),
        Arc::new(RecordingGenerator::default()),
    );
    // Same user, two tabs.
    let (first, mut first_rx) = open_session(&state, ada.clone());
    let (_second, mut second_rx) = open_session(&state, ada);
    assert_eq!(state.registry.len(), 2);

    dispatch(&state.exchange, &first, &message_in(CONVERSATION, "hello")).await;

    assert!(first_rx.try_recv().is_ok());
    assert!(second_rx.try_recv().is_err());
}

#[tokio::test]
async fn short_or_missing_conversation_id_is_dropped() {
    let store = test_store();
    let ada = seed_user(&store, "ada@example.com", "Ada");
    let generator = Arc::new(RecordingGenerator::default());
    let state = build_state(&store, Arc::new(HashEmbedder), generator.clone());
    let (session, mut rx) = open_session(&state, ada);

    dispatch(&state.exchange, &session, &message_in("c123", "hello")).await;
    dispatch(
        &state.exchange,
        &session,
        r#"{"event":"message-in","data":{"content":"hello"}}"#,
    )
    .await;

    assert!(rx.try_recv().is_err());
    assert_eq!(generator.calls(), 0);
    state.exchange.writer().drain().await;
    assert_eq!(state.exchange.writer().stats(), WriterStats::default());
}

#[tokio::test]
async fn unrecognised_frames_are_ignored() {
    let store = test_store();
    let ada = seed_user(&store, "ada@example.com", "Ada");
    seed_conversation_with_id(&store, CONVERSATION, &ada.id);
    let generator = Arc::new(RecordingGenerator::default());
    let state = build_state(&store, Arc::new(HashEmbedder), generator.clone());
    let (session, mut rx) = open_session(&state, ada);

    dispatch(&state.exchange, &session, "not json at all").await;
    dispatch(&state.exchange, &session, r#"{"event":"typing","data":{}}"#).await;
    assert!(rx.try_recv().is_err());

    // The connection keeps working afterwards.
    dispatch(&state.exchange, &session, &message_in(CONVERSATION, "still here?")).await;
    assert!(rx.try_recv().is_ok());
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn generation_failure_sends_nothing_and_indexes_nothing() {
    let store = test_store();
    let ada = seed_user(&store, "ada@example.com", "Ada");
    seed_conversation_with_id(&store, CONVERSATION, &ada.id);
    let state = build_state(&store, Arc::new(HashEmbedder), Arc::new(FailingGenerator));
    let (session, mut rx) = open_session(&state, ada);

    dispatch(&state.exchange, &session, &message_in(CONVERSATION, "hello?")).await;
    state.exchange.writer().drain().await;

    assert!(rx.try_recv().is_err());
    // The user turn was already persisted before generation ran.
    let turns = store.load_transcript(CONVERSATION).unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(fragment_count(&store, CONVERSATION), 0);
    assert_eq!(state.exchange.writer().stats(), WriterStats::default());
}

#[tokio::test]
async fn unowned_conversation_aborts_before_generation() {
    let store = test_store();
    let ada = seed_user(&store, "ada@example.com", "Ada");
    let mallory = seed_user(&store, "mallory@example.com", "Mallory");
    seed_conversation_with_id(&store, CONVERSATION, &ada.id);
    let generator = Arc::new(RecordingGenerator::default());
    let state = build_state(&store, Arc::new(HashEmbedder), generator.clone());
    let (session, mut rx) = open_session(&state, mallory);

    dispatch(&state.exchange, &session, &message_in(CONVERSATION, "let me in")).await;

    assert!(rx.try_recv().is_err());
    assert_eq!(generator.calls(), 0);
    assert!(store.load_transcript(CONVERSATION).unwrap().is_empty());
}

#[tokio::test]
async fn embedding_outage_degrades_to_transcript_only() {
    let store = test_store();
    let ada = seed_user(&store, "ada@example.com", "Ada");
    seed_conversation_with_id(&store, CONVERSATION, &ada.id);
    let generator = Arc::new(RecordingGenerator::default());
    let state = build_state(&store, Arc::new(FailingEmbedder), generator.clone());
    let (session, mut rx) = open_session(&state, ada);

    dispatch(&state.exchange, &session, &message_in(CONVERSATION, "hello")).await;

    assert!(rx.try_recv().is_ok());
    assert!(!generator.last_context().has_fragments());

    state.exchange.writer().drain().await;
    assert_eq!(state.exchange.writer().stats(), WriterStats { indexed: 0, failed: 2 });
    // The model turn is still persisted even though it could not be indexed.
    assert_eq!(store.load_transcript(CONVERSATION).unwrap().len(), 2);
}

#[tokio::test]
async fn exchanges_on_one_connection_reply_in_order() {
    let store = test_store();
    let ada = seed_user(&store, "ada@example.com", "Ada");
    seed_conversation_with_id(&store, CONVERSATION, &ada.id);
    let state = build_state(
        &store,
        Arc::new(HashEmbedder),
        Arc::new(RecordingGenerator::default()),
    );
    let (session, mut rx) = open_session(&state, ada);

    for text in ["one", "two", "three"] {
        dispatch(&state.exchange, &session, &message_in(CONVERSATION, text)).await;
    }

    let replies: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|ServerEvent::MessageOut(out)| out.content)
        .collect();
    assert_eq!(
        replies,
        vec!["Ada, you said: one", "Ada, you said: two", "Ada, you said: three"]
    );

    state.exchange.writer().drain().await;
    let user_turns: Vec<String> = store
        .load_transcript(CONVERSATION)
        .unwrap()
        .into_iter()
        .filter(|t| t.role == Role::User)
        .map(|t| t.content)
        .collect();
    assert_eq!(user_turns, vec!["one", "two", "three"]);
}
