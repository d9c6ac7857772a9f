use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use async_trait::async_trait;
use chat_channel::{ChatId, MessageId, OutgoingMessage, RecordingSender, SenderOp, UserId};
use chatflow::{
    flow::{
        ButtonCleanup, ErrorPolicy, FlowCompletion, FlowError, StepContext, StepDefinition, StepError, StepHandler,
    },
    prompt::{Button, Keyboard, PromptSpec},
    AdvanceOutcome, ButtonClick, CallbackStoreType, FlowBuilder, FlowDefinition, FlowManager, InboundEvent, ProcessResult,
    RequestContext, StateValue, StepInput,
};
use chrono::{TimeDelta, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

type Completions = Arc<Mutex<Vec<FlowCompletion>>>;

fn signup(completions: Completions) -> FlowDefinition {
    FlowBuilder::new("signup")
        .step_fn("name", PromptSpec::text("What is your name?"), |input, ctx| {
            if input.text.chars().count() <= 2 {
                return Ok(ProcessResult::retry().with_prompt(PromptSpec::text("Name too short, try again")));
            }
            ctx.set("name", input.text.clone());
            Ok(ProcessResult::next())
        })
        .step(
            StepDefinition::from_fn(
                "age",
                PromptSpec::text("How old are you?").with_static_keyboard(Keyboard::new().button("Skip", "skip")),
                |input, ctx| {
                    if input.button_str() == Some("skip") {
                        return Ok(ProcessResult::jump("done"));
                    }
                    let age: i64 = input.text.parse().map_err(|_| StepError::InvalidInput(input.text.clone()))?;
                    ctx.set("age", age);
                    Ok(ProcessResult::next())
                },
            )
            .jumps_to(["done"]),
        )
        .step_fn(
            "done",
            PromptSpec::text("Confirm?").with_static_keyboard(Keyboard::new().button("Confirm", "confirm")),
            |_, _| Ok(ProcessResult::complete()),
        )
        .on_complete(move |done| completions.lock().unwrap().push(done.clone()))
        .build()
        .unwrap()
}

fn setup() -> (Arc<FlowManager>, RecordingSender) {
    let sender = RecordingSender::new();
    let manager = FlowManager::in_memory(Arc::new(sender.clone()));
    (manager, sender)
}

fn request(user: &str) -> RequestContext {
    RequestContext::new(user, format!("chat-{user}"))
}

fn text(user: &str, body: &str) -> InboundEvent {
    InboundEvent::text(user, format!("chat-{user}"), body)
}

fn token(msg: &OutgoingMessage, label: &str) -> String {
    msg.keyboard
        .as_ref()
        .and_then(|kb| kb.buttons().find(|b| b.text == label))
        .and_then(|b| b.callback_token())
        .map(str::to_string)
        .unwrap_or_else(|| panic!("no button '{label}' in {msg:?}"))
}

fn click(user: &str, msg: &OutgoingMessage, label: &str, message: &str) -> InboundEvent {
    InboundEvent::button(
        user,
        format!("chat-{user}"),
        ButtonClick::new(token(msg, label), label).on_message(MessageId::from(message)),
    )
}

fn single_step(name: &str, f: fn(&StepInput, &mut StepContext) -> Result<ProcessResult, StepError>) -> FlowBuilder {
    FlowBuilder::new(name).step_fn("only", PromptSpec::text("go"), f)
}

#[tokio::test]
async fn signup_scenario() {
    let completions = Completions::default();
    let (manager, sender) = setup();
    manager.register_flow(signup(completions.clone()));
    let alice = UserId::from("alice");

    let first = manager.start_flow("signup", request("alice")).await.unwrap();
    assert_eq!(first, Some(MessageId::from("m1")));
    assert_eq!(sender.sent_messages().await.len(), 1);
    assert_eq!(sender.last_message().await.unwrap().visible_text(), "What is your name?");

    let outcome = manager.advance(text("alice", "Al")).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Retried { step: "name".into() });
    assert_eq!(sender.last_message().await.unwrap().visible_text(), "Name too short, try again");
    assert_eq!(manager.current_step(&alice).await.as_deref(), Some("name"));

    let outcome = manager.advance(text("alice", "Alice")).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Moved { step: "age".into() });
    let age_prompt = sender.last_message().await.unwrap();
    assert_eq!(age_prompt.visible_text(), "How old are you?");

    let outcome = manager.advance(click("alice", &age_prompt, "Skip", "m3")).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Moved { step: "done".into() });
    assert_eq!(
        sender.ops().await,
        vec![SenderOp::RemoveKeyboard(ChatId::from("chat-alice"), MessageId::from("m3"))]
    );

    let done_prompt = sender.last_message().await.unwrap();
    let outcome = manager.advance(click("alice", &done_prompt, "Confirm", "m4")).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Completed);
    assert!(!manager.is_user_in_flow(&alice));

    let completions = completions.lock().unwrap();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].flow, "signup");
    assert_eq!(completions[0].user, alice);
    assert_eq!(completions[0].data.to_json(), serde_json::json!({"name": "Alice"}));
}

#[tokio::test]
async fn starting_unknown_flow_fails() {
    let (manager, sender) = setup();
    let err = manager.start_flow("nope", request("u")).await.unwrap_err();
    assert!(matches!(err, FlowError::UnknownFlow(name) if name == "nope"));
    assert!(sender.sent_messages().await.is_empty());
    assert!(!manager.is_user_in_flow(&UserId::from("u")));
}

#[tokio::test]
async fn keyboard_only_prompt_sends_placeholder_with_keyboard() {
    let (manager, sender) = setup();
    manager.register_flow(
        FlowBuilder::new("pick")
            .step_fn(
                "choose",
                PromptSpec::keyboard_only(|_| Ok(Keyboard::new().row(vec![Button::callback("A", "a"), Button::callback("B", "b")]))),
                |input, _| Ok(ProcessResult::complete().with_prompt(PromptSpec::text(format!("picked {}", input.button_str().unwrap_or("?"))))),
            )
            .build()
            .unwrap(),
    );

    manager.start_flow("pick", request("u")).await.unwrap();
    let sent = sender.sent_messages().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].visible_text(), "\u{200B}");
    assert_eq!(sent[0].keyboard.as_ref().map(|kb| kb.button_count()), Some(2));

    let outcome = manager.advance(click("u", &sent[0], "B", "m1")).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Completed);
    assert_eq!(sender.last_message().await.unwrap().visible_text(), "picked b");
}

#[tokio::test]
async fn tokens_never_resolve_for_another_user() {
    let (manager, sender) = setup();
    manager.register_flow(signup(Completions::default()));

    for user in ["alice", "bob"] {
        manager.start_flow("signup", request(user)).await.unwrap();
        manager.advance(text(user, "Someone")).await.unwrap();
    }
    let sent = sender.sent_messages().await;
    let alice_prompt = sent.iter().find(|m| m.chat.as_str() == "chat-alice" && m.keyboard.is_some()).unwrap();
    let alice_token = token(alice_prompt, "Skip");

    assert_eq!(manager.resolve_callback(&UserId::from("bob"), &alice_token), None);
    assert_eq!(manager.resolve_callback(&UserId::from("alice"), &alice_token), Some(StateValue::from("skip")));

    let forged = InboundEvent::button("bob", "chat-bob", ButtonClick::new(alice_token, "Skip"));
    assert_eq!(manager.advance(forged).await.unwrap(), AdvanceOutcome::StaleCallback);
    assert_eq!(manager.current_step(&UserId::from("bob")).await.as_deref(), Some("age"));
}

#[tokio::test]
async fn cancel_is_idempotent_and_clears_tokens() {
    let (manager, sender) = setup();
    manager.register_flow(signup(Completions::default()));
    let user = UserId::from("u");

    assert!(!manager.cancel_flow(&user));

    manager.start_flow("signup", request("u")).await.unwrap();
    manager.advance(text("u", "Alice")).await.unwrap();
    let prompt = sender.last_message().await.unwrap();
    let skip = token(&prompt, "Skip");

    assert!(manager.cancel_flow(&user));
    assert!(!manager.cancel_flow(&user));
    assert!(!manager.is_user_in_flow(&user));
    assert_eq!(manager.resolve_callback(&user, &skip), None);
    assert_eq!(manager.advance(text("u", "30")).await.unwrap(), AdvanceOutcome::NotInFlow);
}

#[tokio::test]
async fn next_on_last_step_completes() {
    let completions = Completions::default();
    let (manager, sender) = setup();
    let hook = completions.clone();
    manager.register_flow(
        single_step("one", |_, ctx| {
            ctx.set("seen", true);
            Ok(ProcessResult::next())
        })
        .on_complete(move |done| hook.lock().unwrap().push(done.clone()))
        .build()
        .unwrap(),
    );

    manager.start_flow("one", request("u")).await.unwrap();
    assert_eq!(manager.advance(text("u", "x")).await.unwrap(), AdvanceOutcome::Completed);
    assert!(!manager.is_user_in_flow(&UserId::from("u")));
    assert_eq!(completions.lock().unwrap()[0].data.get("seen"), Some(&StateValue::Boolean(true)));
    // nothing rendered after completion
    assert_eq!(sender.sent_messages().await.len(), 1);
}

#[tokio::test]
async fn unknown_jump_leaves_the_session_untouched() {
    let (manager, sender) = setup();
    manager.register_flow(
        single_step("lost", |_, ctx| {
            ctx.set("dirty", true);
            Ok(ProcessResult::jump("nowhere"))
        })
        .build()
        .unwrap(),
    );
    let user = UserId::from("u");

    manager.start_flow("lost", request("u")).await.unwrap();
    let err = manager.advance(text("u", "x")).await.unwrap_err();
    assert!(matches!(err, FlowError::UnknownStep { step, .. } if step == "nowhere"));
    assert_eq!(manager.current_step(&user).await.as_deref(), Some("only"));
    assert_eq!(manager.get_user_flow_data(&user, "dirty").await, None);
    assert_eq!(sender.sent_messages().await.len(), 1);
}

#[tokio::test]
async fn send_failure_is_reported_after_the_transition() {
    let (manager, sender) = setup();
    manager.register_flow(signup(Completions::default()));
    let user = UserId::from("u");

    manager.start_flow("signup", request("u")).await.unwrap();
    sender.fail_sends(true);
    let err = manager.advance(text("u", "Alice")).await.unwrap_err();
    assert!(matches!(err, FlowError::Send(_)));
    assert_eq!(manager.current_step(&user).await.as_deref(), Some("age"));
    assert_eq!(manager.get_user_flow_data(&user, "name").await, Some(StateValue::from("Alice")));
}

#[tokio::test]
async fn prompt_failure_aborts_the_transition() {
    let (manager, sender) = setup();
    manager.register_flow(
        FlowBuilder::new("broken")
            .step_fn("a", PromptSpec::text("a"), |_, _| Ok(ProcessResult::next()))
            .step_fn("b", PromptSpec::template("missing"), |_, _| Ok(ProcessResult::next()))
            .build()
            .unwrap(),
    );
    let user = UserId::from("u");

    manager.start_flow("broken", request("u")).await.unwrap();
    let err = manager.advance(text("u", "x")).await.unwrap_err();
    assert!(matches!(err, FlowError::Prompt(_)));
    assert_eq!(manager.current_step(&user).await.as_deref(), Some("a"));
    assert_eq!(sender.sent_messages().await.len(), 1);
}

#[tokio::test]
async fn step_failure_follows_the_error_policy() {
    let failing = |_: &StepInput, _: &mut StepContext| -> Result<ProcessResult, StepError> {
        Err(StepError::ExecutionFailed("backend down".into()))
    };
    let (manager, sender) = setup();
    manager.register_flow(FlowBuilder::new("cancel").step_fn("s", PromptSpec::text("s?"), failing).build().unwrap());
    manager.register_flow(
        FlowBuilder::new("retry")
            .error_policy(ErrorPolicy::Retry)
            .step_fn("s", PromptSpec::text("s again?"), failing)
            .build()
            .unwrap(),
    );
    manager.register_flow(
        FlowBuilder::new("fallback")
            .error_policy(ErrorPolicy::Fallback(PromptSpec::text("something broke, try later")))
            .step_fn("s", PromptSpec::text("s?"), failing)
            .build()
            .unwrap(),
    );

    manager.start_flow("cancel", request("a")).await.unwrap();
    let err = manager.advance(text("a", "x")).await.unwrap_err();
    assert!(matches!(err, FlowError::Step { source: StepError::ExecutionFailed(_), .. }));
    assert!(!manager.is_user_in_flow(&UserId::from("a")));

    manager.start_flow("retry", request("b")).await.unwrap();
    assert_eq!(manager.advance(text("b", "x")).await.unwrap(), AdvanceOutcome::Recovered { step: "s".into() });
    assert_eq!(sender.last_message().await.unwrap().visible_text(), "s again?");

    manager.start_flow("fallback", request("c")).await.unwrap();
    assert_eq!(manager.advance(text("c", "x")).await.unwrap(), AdvanceOutcome::Recovered { step: "s".into() });
    assert_eq!(sender.last_message().await.unwrap().visible_text(), "something broke, try later");
    assert!(manager.is_user_in_flow(&UserId::from("c")));
}

#[tokio::test]
async fn restart_replaces_the_active_session() {
    let (manager, sender) = setup();
    manager.register_flow(signup(Completions::default()));
    let user = UserId::from("u");

    manager.start_flow("signup", request("u")).await.unwrap();
    manager.advance(text("u", "Alice")).await.unwrap();
    let old_prompt = sender.last_message().await.unwrap();

    manager.start_flow("signup", request("u")).await.unwrap();
    assert_eq!(manager.current_step(&user).await.as_deref(), Some("name"));
    assert_eq!(manager.get_user_flow_data(&user, "name").await, None);
    assert_eq!(manager.advance(click("u", &old_prompt, "Skip", "m2")).await.unwrap(), AdvanceOutcome::StaleCallback);
}

#[tokio::test]
async fn flow_data_can_be_read_and_written_from_outside() {
    let (manager, _) = setup();
    manager.register_flow(signup(Completions::default()));
    let user = UserId::from("u");

    let err = manager.set_user_flow_data(&user, "name", "x").await.unwrap_err();
    assert!(matches!(err, FlowError::NoActiveSession(_)));
    assert_eq!(manager.get_user_flow_data(&user, "name").await, None);

    manager.start_flow("signup", request("u")).await.unwrap();
    assert_eq!(manager.set_user_flow_data(&user, "referrer", "ad").await.unwrap(), None);
    assert_eq!(manager.get_user_flow_data(&user, "referrer").await, Some(StateValue::from("ad")));
    assert_eq!(manager.current_step(&user).await.as_deref(), Some("name"));
}

#[tokio::test]
async fn request_data_is_visible_but_not_stored() {
    let (manager, sender) = setup();
    manager.register_flow(
        FlowBuilder::new("greet")
            .step_fn(
                "hello",
                PromptSpec::computed(|ctx| {
                    Ok(match ctx.request("locale").and_then(StateValue::as_str) {
                        Some("de") => "Hallo".to_string(),
                        _ => "Hello".to_string(),
                    })
                }),
                |_, _| Ok(ProcessResult::retry()),
            )
            .build()
            .unwrap(),
    );
    let user = UserId::from("u");

    manager.start_flow("greet", request("u").with_data("locale", "de")).await.unwrap();
    assert_eq!(sender.last_message().await.unwrap().visible_text(), "Hallo");
    assert_eq!(manager.get_user_flow_data(&user, "locale").await, None);

    manager.advance(text("u", "hi")).await.unwrap();
    assert_eq!(sender.last_message().await.unwrap().visible_text(), "Hello");
}

#[tokio::test]
async fn cancel_with_prompt_sends_it_and_ends_the_flow() {
    let completions = Completions::default();
    let hook = completions.clone();
    let (manager, sender) = setup();
    manager.register_flow(
        single_step("quit", |_, _| Ok(ProcessResult::cancel().with_prompt(PromptSpec::text("Bye"))))
            .on_complete(move |done| hook.lock().unwrap().push(done.clone()))
            .build()
            .unwrap(),
    );

    manager.start_flow("quit", request("u")).await.unwrap();
    assert_eq!(manager.advance(text("u", "stop")).await.unwrap(), AdvanceOutcome::Cancelled);
    assert_eq!(sender.last_message().await.unwrap().visible_text(), "Bye");
    assert!(!manager.is_user_in_flow(&UserId::from("u")));
    assert!(completions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn button_cleanup_follows_flow_and_step_policy() {
    let yes = || PromptSpec::text("ok?").with_static_keyboard(Keyboard::new().button("Yes", true));
    let (manager, sender) = setup();
    manager.register_flow(
        FlowBuilder::new("tidy")
            .button_cleanup(ButtonCleanup::Delete)
            .step_fn("ask", yes(), |_, _| Ok(ProcessResult::next()))
            .step(StepDefinition::from_fn("keep", yes(), |_, _| Ok(ProcessResult::next())).button_cleanup(ButtonCleanup::Keep))
            .step_fn("last", yes(), |_, _| Ok(ProcessResult::next()))
            .build()
            .unwrap(),
    );
    let delete_m1 = SenderOp::Delete(ChatId::from("chat-u"), MessageId::from("m1"));

    manager.start_flow("tidy", request("u")).await.unwrap();
    let prompt = sender.last_message().await.unwrap();
    assert_eq!(manager.advance(click("u", &prompt, "Yes", "m1")).await.unwrap(), AdvanceOutcome::Moved { step: "keep".into() });
    assert_eq!(sender.ops().await, vec![delete_m1.clone()]);

    let prompt = sender.last_message().await.unwrap();
    assert_eq!(manager.advance(click("u", &prompt, "Yes", "m2")).await.unwrap(), AdvanceOutcome::Moved { step: "last".into() });
    assert_eq!(sender.ops().await, vec![delete_m1.clone()]);

    // a failed cleanup is logged and the click still counts
    sender.fail_edits(true);
    let prompt = sender.last_message().await.unwrap();
    assert_eq!(manager.advance(click("u", &prompt, "Yes", "m3")).await.unwrap(), AdvanceOutcome::Completed);
    assert_eq!(sender.ops().await, vec![delete_m1]);
}

#[tokio::test]
async fn expired_sessions_are_reaped() {
    let (manager, _) = setup();
    manager.register_flow(signup_with_lifetime(Duration::from_secs(60)));
    let user = UserId::from("u");

    manager.start_flow("signup", request("u")).await.unwrap();
    assert_eq!(manager.reap_expired_at(Utc::now()), 0);
    assert!(manager.is_user_in_flow(&user));

    assert_eq!(manager.reap_expired_at(Utc::now() + TimeDelta::seconds(61)), 1);
    assert!(!manager.is_user_in_flow(&user));
}

fn signup_with_lifetime(lifetime: Duration) -> FlowDefinition {
    FlowBuilder::new("signup")
        .max_lifetime(lifetime)
        .step_fn("name", PromptSpec::text("What is your name?"), |_, _| Ok(ProcessResult::next()))
        .step_fn("age", PromptSpec::text("How old are you?"), |_, _| Ok(ProcessResult::next()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn advance_on_an_expired_session_reports_expiry() {
    let (manager, sender) = setup();
    manager.register_flow(signup_with_lifetime(Duration::ZERO));

    manager.start_flow("signup", request("u")).await.unwrap();
    assert_eq!(manager.advance(text("u", "Alice")).await.unwrap(), AdvanceOutcome::Expired);
    assert!(!manager.is_user_in_flow(&UserId::from("u")));
    assert_eq!(sender.sent_messages().await.len(), 1);
}

#[tokio::test]
async fn background_reaper_drops_expired_sessions() {
    let (manager, _) = setup();
    manager.register_flow(signup_with_lifetime(Duration::ZERO));
    manager.start_flow("signup", request("u")).await.unwrap();

    let shutdown = CancellationToken::new();
    let reaper = manager.spawn_reaper(Duration::from_millis(10), shutdown.clone());
    for _ in 0..100 {
        if !manager.is_user_in_flow(&UserId::from("u")) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!manager.is_user_in_flow(&UserId::from("u")));

    shutdown.cancel();
    reaper.await.unwrap();
}

struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl StepHandler for Gate {
    async fn process(&self, _: &StepInput, ctx: &mut StepContext) -> Result<ProcessResult, StepError> {
        ctx.set("touched", true);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(ProcessResult::next())
    }
}

#[tokio::test]
async fn cancel_during_processing_wins_cleanly() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let (manager, sender) = setup();
    manager.register_flow(
        FlowBuilder::new("slow")
            .step(StepDefinition::new(
                "wait",
                PromptSpec::text("wait"),
                Arc::new(Gate { entered: entered.clone(), release: release.clone() }),
            ))
            .step_fn(
                "after",
                PromptSpec::text("after").with_static_keyboard(Keyboard::new().button("Pay", "pay")),
                |_, _| Ok(ProcessResult::complete()),
            )
            .build()
            .unwrap(),
    );
    let user = UserId::from("u");
    manager.start_flow("slow", request("u")).await.unwrap();
    manager.set_user_flow_data(&user, "plan", "pro").await.unwrap();

    let racing = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.advance(text("u", "go")).await })
    };
    entered.notified().await;
    let reading = {
        let manager = manager.clone();
        let user = user.clone();
        tokio::spawn(async move { manager.get_user_flow_data(&user, "plan").await })
    };
    tokio::task::yield_now().await;
    assert!(manager.cancel_flow(&user));
    release.notify_one();

    assert_eq!(racing.await.unwrap().unwrap(), AdvanceOutcome::Superseded);
    assert_eq!(reading.await.unwrap(), None);
    assert!(!manager.is_user_in_flow(&user));
    assert_eq!(manager.composer().callbacks().count(&user), 0);
    assert_eq!(sender.sent_messages().await.len(), 1);
}

#[tokio::test]
async fn restart_during_processing_keeps_old_buttons_dead() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let (manager, sender) = setup();
    manager.register_flow(
        FlowBuilder::new("slow")
            .step(StepDefinition::new(
                "wait",
                PromptSpec::text("wait"),
                Arc::new(Gate { entered: entered.clone(), release: release.clone() }),
            ))
            .step_fn(
                "after",
                PromptSpec::text("after").with_static_keyboard(Keyboard::new().button("Refund", "refund")),
                |_, _| Ok(ProcessResult::complete()),
            )
            .build()
            .unwrap(),
    );
    manager.register_flow(
        FlowBuilder::new("menu")
            .step_fn(
                "pick",
                PromptSpec::text("pick one").with_static_keyboard(Keyboard::new().button("Tea", "tea")),
                |_, _| Ok(ProcessResult::complete()),
            )
            .build()
            .unwrap(),
    );
    let user = UserId::from("u");
    manager.start_flow("slow", request("u")).await.unwrap();

    let racing = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.advance(text("u", "go")).await })
    };
    entered.notified().await;
    manager.start_flow("menu", request("u")).await.unwrap();
    release.notify_one();

    assert_eq!(racing.await.unwrap().unwrap(), AdvanceOutcome::Superseded);
    assert_eq!(manager.current_step(&user).await.as_deref(), Some("pick"));
    assert_eq!(manager.composer().callbacks().count(&user), 1);

    let sent = sender.sent_messages().await;
    assert_eq!(sent.len(), 2);
    let tea = token(&sent[1], "Tea");
    assert_eq!(manager.resolve_callback(&user, &tea), Some(StateValue::from("tea")));
}

#[tokio::test]
async fn one_users_events_are_serialised() {
    let (manager, _) = setup();
    manager.register_flow(
        FlowBuilder::new("count")
            .step_fn("tap", PromptSpec::text("tap"), |_, ctx| {
                let n = ctx.get("taps").and_then(StateValue::as_number).unwrap_or(0.0);
                ctx.set("taps", n + 1.0);
                Ok(ProcessResult::retry())
            })
            .build()
            .unwrap(),
    );
    manager.start_flow("count", request("u")).await.unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.advance(text("u", "tap")).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), AdvanceOutcome::Retried { step: "tap".into() });
    }
    assert_eq!(
        manager.get_user_flow_data(&UserId::from("u"), "taps").await,
        Some(StateValue::Number(20.0))
    );
}
