//! End-to-end event handling with in-process fakes for every collaborator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use relay_bot::relay::{
    ADMIN_ONLY_TEXT, CLEARED_TEXT, HELP_TEXT, NOT_AUTHORIZED_TEXT, RETRY_LATER_TEXT,
    TOO_FAST_TEXT, UNKNOWN_COMMAND_TEXT, WELCOME_TEXT,
};
use relay_bot::session::Role;
use relay_bot::{
    AllowList, AllowListEntry, ChatMessage, CompletionClient, CompletionError, Relay,
    SqliteAllowList,
};
use relay_channels::{
    ButtonPress, ChannelError, ChannelResult, InboundEvent, IncomingMessage, Keyboard, Transport,
};
use relay_common::{Config, InMemoryKv, KvStore, PresetItem};
use tokio::sync::mpsc;

const ADMIN: i64 = 1;
const MEMBER: i64 = 2;
const EXPIRED: i64 = 3;
const STRANGER: i64 = 4;

// ─────────────────────────────────────────────────────────────────────────────
// Fakes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Sent {
    chat_id: i64,
    text: String,
    keyboard: Option<Keyboard>,
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    answered: Mutex<Vec<String>>,
    fail_sends: AtomicBool,
}

impl RecordingTransport {
    fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|s| s.text.clone()).collect()
    }

    fn last(&self) -> Sent {
        self.sent.lock().unwrap().last().cloned().expect("nothing sent")
    }

    fn record(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) -> ChannelResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed("bot was blocked by the user".into()));
        }
        self.sent.lock().unwrap().push(Sent {
            chat_id,
            text: text.to_string(),
            keyboard,
        });
        Ok(())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn init(&mut self) -> ChannelResult<()> {
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> ChannelResult<()> {
        self.record(chat_id, text, None)
    }

    async fn send_with_buttons(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Keyboard,
    ) -> ChannelResult<()> {
        self.record(chat_id, text, Some(keyboard))
    }

    async fn answer_callback(&self, callback_id: &str, _text: Option<&str>) -> ChannelResult<()> {
        self.answered.lock().unwrap().push(callback_id.to_string());
        Ok(())
    }

    async fn listen(&self, _tx: mpsc::Sender<InboundEvent>) -> ChannelResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> ChannelResult<()> {
        Ok(())
    }

    async fn shutdown(&self) -> ChannelResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedCompletion {
    calls: Mutex<Vec<Vec<ChatMessage>>>,
    fail: AtomicBool,
}

impl ScriptedCompletion {
    fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(CompletionError::Status {
                status: 503,
                excerpt: "upstream overloaded".into(),
            });
        }
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        Ok(format!("echo: {last}"))
    }
}

struct Harness {
    relay: Relay,
    transport: Arc<RecordingTransport>,
    completion: Arc<ScriptedCompletion>,
    allow_list: Arc<SqliteAllowList>,
    kv: Arc<InMemoryKv>,
}

fn presets() -> Vec<PresetItem> {
    vec![
        PresetItem {
            button: "Coder".into(),
            command: "/coder".into(),
            content: "You write idiomatic Rust.".into(),
        },
        PresetItem {
            button: "Poet".into(),
            command: "/poet".into(),
            content: "You answer in verse.".into(),
        },
    ]
}

async fn harness_with(config: Config) -> Harness {
    let now = Utc::now();
    let allow_list = Arc::new(SqliteAllowList::in_memory().unwrap());
    allow_list.insert(&AllowListEntry::admin(ADMIN, now)).await.unwrap();
    allow_list
        .insert(&AllowListEntry::member(MEMBER, 7, now))
        .await
        .unwrap();
    allow_list
        .insert(&AllowListEntry {
            user_id: EXPIRED,
            is_admin: false,
            expires_at: now - Duration::days(1),
        })
        .await
        .unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let completion = Arc::new(ScriptedCompletion::default());
    let kv = Arc::new(InMemoryKv::new());

    let relay = Relay::new(
        &config,
        transport.clone(),
        kv.clone(),
        allow_list.clone(),
        completion.clone(),
    );

    Harness {
        relay,
        transport,
        completion,
        allow_list,
        kv,
    }
}

async fn harness() -> Harness {
    let config = Config {
        presets: presets(),
        ..Config::default()
    };
    harness_with(config).await
}

fn message(user_id: i64, text: &str) -> InboundEvent {
    InboundEvent::Message(IncomingMessage {
        update_id: 1,
        chat_id: user_id + 1000,
        user_id,
        username: Some(format!("user{user_id}")),
        text: text.to_string(),
    })
}

fn button(user_id: i64, data: &str) -> InboundEvent {
    InboundEvent::Button(ButtonPress {
        callback_id: format!("cb-{user_id}"),
        chat_id: user_id + 1000,
        user_id,
        username: None,
        data: data.to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_conversation_turn_round_trip() {
    let h = harness().await;

    h.relay.handle_event(message(MEMBER, "hi")).await.unwrap();

    let calls = h.completion.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0][0].role, Role::System);
    assert_eq!(calls[0][0].content, h.relay.sessions().default_system_prompt());
    assert_eq!(calls[0][1], ChatMessage::user("hi"));

    let reply = h.transport.last();
    assert_eq!(reply.chat_id, MEMBER + 1000);
    assert_eq!(reply.text, "echo: hi");

    let history = h.relay.sessions().get_history(MEMBER).await.unwrap();
    assert_eq!(
        history,
        vec![ChatMessage::user("hi"), ChatMessage::assistant("echo: hi")]
    );
}

#[tokio::test]
async fn test_history_carries_into_next_turn() {
    let h = harness().await;

    h.relay.handle_event(message(MEMBER, "first")).await.unwrap();
    h.relay.handle_event(message(MEMBER, "second")).await.unwrap();

    let calls = h.completion.calls();
    let contents: Vec<_> = calls[1].iter().map(|m| m.content.as_str()).collect();
    assert_eq!(&contents[1..], &["first", "echo: first", "second"]);
}

#[tokio::test]
async fn test_unknown_and_expired_users_are_refused() {
    let h = harness().await;

    h.relay.handle_event(message(STRANGER, "hi")).await.unwrap();
    h.relay.handle_event(message(EXPIRED, "hi")).await.unwrap();

    assert!(h.completion.calls().is_empty());
    assert_eq!(h.transport.texts(), vec![NOT_AUTHORIZED_TEXT, NOT_AUTHORIZED_TEXT]);
}

#[tokio::test]
async fn test_admin_with_any_expiry_may_chat() {
    let h = harness().await;
    h.relay.handle_event(message(ADMIN, "hello")).await.unwrap();
    assert_eq!(h.completion.calls().len(), 1);
}

#[tokio::test]
async fn test_eleventh_message_is_rate_limited() {
    let h = harness().await;

    for i in 0..10 {
        h.relay
            .handle_event(message(MEMBER, &format!("msg {i}")))
            .await
            .unwrap();
    }
    h.relay.handle_event(message(MEMBER, "one too many")).await.unwrap();

    assert_eq!(h.completion.calls().len(), 10);
    assert_eq!(h.transport.last().text, TOO_FAST_TEXT);
}

#[tokio::test]
async fn test_completion_failure_replies_and_keeps_history() {
    let h = harness().await;
    h.relay.handle_event(message(MEMBER, "first")).await.unwrap();

    h.completion.fail.store(true, Ordering::SeqCst);
    let result = h.relay.handle_event(message(MEMBER, "second")).await;

    assert!(result.is_err());
    assert_eq!(h.transport.last().text, RETRY_LATER_TEXT);
    assert_eq!(h.relay.sessions().get_history(MEMBER).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_delivery_is_not_saved() {
    let h = harness().await;
    h.transport.fail_sends.store(true, Ordering::SeqCst);

    let result = h.relay.handle_event(message(MEMBER, "hi")).await;

    assert!(result.is_err());
    assert!(h.relay.sessions().get_history(MEMBER).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_history_trimmed_to_budget() {
    let mut config = Config {
        presets: presets(),
        ..Config::default()
    };
    config.session.default_system_prompt = "sys".into();
    config.session.max_context_chars = 40;
    let h = harness_with(config).await;

    // Each turn stores "qN" and "echo: qN" (2 + 8 chars).
    for i in 1..=6 {
        h.relay
            .handle_event(message(MEMBER, &format!("q{i}")))
            .await
            .unwrap();
    }

    let last_call = h.completion.calls().pop().unwrap();
    let total: usize = last_call.iter().map(|m| m.content.chars().count()).sum();
    assert!(total <= 40, "prompt of {total} chars");
    assert_eq!(last_call.last().unwrap().content, "q6");
    assert_eq!(last_call.len(), 8);

    // What was sent upstream (minus system and new message) plus the new exchange.
    let history = h.relay.sessions().get_history(MEMBER).await.unwrap();
    let sent_history = &last_call[1..last_call.len() - 1];
    assert_eq!(&history[..sent_history.len()], sent_history);
    assert_eq!(history.len(), sent_history.len() + 2);
}

#[tokio::test]
async fn test_trim_with_undecodable_entry_keeps_store_in_step() {
    let mut config = Config {
        presets: presets(),
        ..Config::default()
    };
    config.session.default_system_prompt = "sys".into();
    config.session.max_context_chars = 15;
    let h = harness_with(config).await;

    let b = "B".repeat(10);
    let c = "C".repeat(10);
    h.kv.rpush(
        &format!("user:{MEMBER}:context"),
        &[
            "garbage".to_string(),
            serde_json::to_string(&ChatMessage::user(&b)).unwrap(),
            serde_json::to_string(&ChatMessage::assistant(&c)).unwrap(),
        ],
    )
    .await
    .unwrap();

    h.relay.handle_event(message(MEMBER, "hi")).await.unwrap();

    let last_call = h.completion.calls().pop().unwrap();
    assert_eq!(
        last_call,
        vec![
            ChatMessage::system("sys"),
            ChatMessage::assistant(&c),
            ChatMessage::user("hi"),
        ]
    );

    let history = h.relay.sessions().get_history(MEMBER).await.unwrap();
    assert_eq!(
        history,
        vec![
            ChatMessage::assistant(&c),
            ChatMessage::user("hi"),
            ChatMessage::assistant("echo: hi"),
        ]
    );
    let raw = h.kv.lrange_all(&format!("user:{MEMBER}:context")).await.unwrap();
    assert_eq!(raw.len(), 3);
}

// ─────────────────────────────────────────────────────────────────────────────
// Presets
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_preset_switch_clears_history_and_sets_instruction() {
    let h = harness().await;
    h.relay.handle_event(message(MEMBER, "before")).await.unwrap();

    h.relay.handle_event(message(MEMBER, "/coder")).await.unwrap();
    assert_eq!(h.transport.last().text, "Switched to Coder");
    assert!(h.relay.sessions().get_history(MEMBER).await.unwrap().is_empty());

    h.relay.handle_event(message(MEMBER, "after")).await.unwrap();
    let last_call = h.completion.calls().pop().unwrap();
    assert_eq!(last_call[0], ChatMessage::system("You write idiomatic Rust."));
    assert_eq!(last_call.len(), 2);
}

#[tokio::test]
async fn test_preset_requires_valid_user() {
    let h = harness().await;
    h.relay.handle_event(message(EXPIRED, "/coder")).await.unwrap();

    assert_eq!(h.transport.last().text, NOT_AUTHORIZED_TEXT);
    assert_eq!(h.relay.sessions().current_preset(EXPIRED).await.unwrap(), None);
}

#[tokio::test]
async fn test_preset_button_switches_and_acknowledges() {
    let h = harness().await;
    h.relay.handle_event(button(MEMBER, "/poet")).await.unwrap();

    let preset = h.relay.sessions().current_preset(MEMBER).await.unwrap().unwrap();
    assert_eq!(preset.label, "Poet");
    assert_eq!(h.transport.last().text, "Switched to Poet");
    assert_eq!(*h.transport.answered.lock().unwrap(), vec!["cb-2".to_string()]);
}

#[tokio::test]
async fn test_button_from_stranger_is_refused_but_acknowledged() {
    let h = harness().await;
    h.relay.handle_event(button(STRANGER, "/help")).await.unwrap();

    assert_eq!(h.transport.texts(), vec![NOT_AUTHORIZED_TEXT]);
    assert_eq!(h.transport.answered.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_clear_resets_everything() {
    let h = harness().await;
    h.relay.handle_event(message(MEMBER, "/coder")).await.unwrap();
    h.relay.handle_event(message(MEMBER, "hello")).await.unwrap();

    h.relay.handle_event(message(MEMBER, "/clear")).await.unwrap();

    let reply = h.transport.last();
    assert_eq!(reply.text, CLEARED_TEXT);
    assert_eq!(reply.keyboard.map(|k| k.len()), Some(3));
    assert_eq!(h.relay.sessions().current_preset(MEMBER).await.unwrap(), None);
    assert!(h.relay.sessions().get_history(MEMBER).await.unwrap().is_empty());

    // Only the rate limit counter is left.
    assert_eq!(h.kv.len().await, 1);
    assert_eq!(h.kv.get("ratelimit:2").await.unwrap().as_deref(), Some("3"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Informational commands
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_shows_preset_keyboard() {
    let h = harness().await;
    h.relay.handle_event(message(STRANGER, "/start")).await.unwrap();

    let reply = h.transport.last();
    assert_eq!(reply.text, WELCOME_TEXT);
    let keyboard = reply.keyboard.unwrap();
    assert_eq!(keyboard[0][0].callback_data, "/coder");
    assert_eq!(keyboard[1][0].text, "Poet");
    assert_eq!(keyboard[2][0].callback_data, "/help");
}

#[tokio::test]
async fn test_info_commands() {
    let h = harness().await;
    h.relay.handle_event(message(STRANGER, "/help")).await.unwrap();
    h.relay.handle_event(message(STRANGER, "/id")).await.unwrap();
    h.relay.handle_event(message(STRANGER, "/nonsense")).await.unwrap();

    assert_eq!(
        h.transport.texts(),
        vec![
            HELP_TEXT.to_string(),
            format!("Your user ID: {STRANGER}"),
            UNKNOWN_COMMAND_TEXT.to_string(),
        ]
    );
}

#[tokio::test]
async fn test_expiry_command() {
    let h = harness().await;
    for user in [ADMIN, MEMBER, EXPIRED, STRANGER] {
        h.relay.handle_event(message(user, "/expiry")).await.unwrap();
    }

    let texts = h.transport.texts();
    assert!(texts[0].contains("permanent"));
    assert!(texts[1].starts_with("Your access expires in 6 days 23 hours"));
    assert!(texts[2].starts_with("Your access expired on"));
    assert!(texts[3].contains("not on the allow-list"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Admin commands
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_admin_adds_user_who_can_then_chat() {
    let h = harness().await;

    h.relay.handle_event(message(STRANGER, "hi")).await.unwrap();
    h.relay
        .handle_event(message(ADMIN, &format!("/adduser {STRANGER} 30")))
        .await
        .unwrap();
    assert!(h.transport.last().text.starts_with(&format!("User {STRANGER} added until")));

    let entry = h.allow_list.find(STRANGER).await.unwrap().unwrap();
    assert!(!entry.is_admin);
    assert!(entry.expires_at > Utc::now() + Duration::days(29));

    h.relay.handle_event(message(STRANGER, "hi")).await.unwrap();
    assert_eq!(h.completion.calls().len(), 1);
}

#[tokio::test]
async fn test_adduser_existing_reports_duplicate() {
    let h = harness().await;
    h.relay
        .handle_event(message(ADMIN, &format!("/adduser {MEMBER}")))
        .await
        .unwrap();
    assert!(h.transport.last().text.contains("already on the allow-list"));
}

#[tokio::test]
async fn test_non_admin_cannot_manage_users() {
    let h = harness().await;
    h.relay
        .handle_event(message(MEMBER, &format!("/deleteuser {EXPIRED}")))
        .await
        .unwrap();

    assert_eq!(h.transport.last().text, ADMIN_ONLY_TEXT);
    assert!(h.allow_list.find(EXPIRED).await.unwrap().is_some());
}

#[tokio::test]
async fn test_malformed_admin_arguments_get_hints() {
    let h = harness().await;
    h.relay.handle_event(message(ADMIN, "/adduser abc")).await.unwrap();
    h.relay.handle_event(message(ADMIN, "/extend 2")).await.unwrap();
    h.relay.handle_event(message(ADMIN, "/extend 2 -1")).await.unwrap();

    let texts = h.transport.texts();
    assert_eq!(texts[0], "Invalid user ID format");
    assert!(texts[1].starts_with("Usage:"));
    assert!(texts[2].contains("positive"));
}

#[tokio::test]
async fn test_delete_and_extend() {
    let h = harness().await;

    h.relay
        .handle_event(message(ADMIN, &format!("/deleteuser {ADMIN}")))
        .await
        .unwrap();
    assert!(h.transport.last().text.contains("not found or is an admin"));

    h.relay
        .handle_event(message(ADMIN, &format!("/extend {EXPIRED} 2")))
        .await
        .unwrap();
    assert!(h.transport.last().text.starts_with(&format!("User {EXPIRED} extended until")));
    let entry = h.allow_list.find(EXPIRED).await.unwrap().unwrap();
    assert!(entry.is_valid_at(Utc::now()));

    h.relay
        .handle_event(message(ADMIN, &format!("/deleteuser {MEMBER}")))
        .await
        .unwrap();
    assert_eq!(h.transport.last().text, format!("User {MEMBER} deleted."));
    assert!(h.allow_list.find(MEMBER).await.unwrap().is_none());
}

#[tokio::test]
async fn test_checkuser_lists_and_details() {
    let h = harness().await;

    h.relay.handle_event(message(ADMIN, "/checkuser")).await.unwrap();
    let listing = h.transport.last().text;
    assert!(listing.starts_with("Allow-list (3 users):"));
    assert!(listing.contains(&format!("{ADMIN}: admin")));
    assert!(listing.contains(&format!("{EXPIRED}: expired")));
    assert!(listing.ends_with("/checkuser [id]"));

    h.relay
        .handle_event(message(ADMIN, &format!("/checkuser {MEMBER}")))
        .await
        .unwrap();
    let detail = h.transport.last().text;
    assert!(detail.starts_with(&format!("User {MEMBER}\nAdmin: no\nExpires: ")));

    h.relay.handle_event(message(ADMIN, "/checkuser 999")).await.unwrap();
    assert_eq!(h.transport.last().text, "User 999 not found.");
}
