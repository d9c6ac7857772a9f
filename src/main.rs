use std::{path::PathBuf, sync::Arc};
use anyhow::{Context, Result};
use chat_channel::{ChatId, ConsoleSender, InlineButtonKind, OutgoingMessage, UserId};
use chatflow::{
    config::{ConfigManager, EngineConfig, EnvConfigManager},
    flow::{
        ButtonClick, ErrorPolicy, FlowBuilder, FlowDefinition, InMemorySessionStore, InboundEvent, ProcessResult,
        RequestContext, StepDefinition, StepError,
    },
    logger::init_tracing,
    prompt::{Button, Keyboard, PromptComposer, PromptSpec},
    AdvanceOutcome, FlowManager, InMemoryCallbackStore, StateValue,
};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, stdin};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "chatflow", about = "Drive multi-step chat flows", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the signup demo flow in this terminal
    Run(RunArgs),

    /// Print the JSON schema of outgoing messages
    Schema,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Log filter override (e.g. error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Also write rolling log files to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// .env file with CHATFLOW_* settings
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Schema => {
            let schema = schemars::schema_for!(OutgoingMessage);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}

fn signup_flow() -> Result<FlowDefinition> {
    let age_keyboard = Keyboard::new().button("Skip", "skip");
    let confirm_keyboard = Keyboard::new().row(vec![
        Button::callback("Confirm", "confirm"),
        Button::callback("Start over", "restart"),
    ]);

    let flow = FlowBuilder::new("signup")
        .step_fn("name", PromptSpec::text("What is your name?"), |input, ctx| {
            let name = input.text.trim();
            if name.chars().count() < 3 {
                return Ok(ProcessResult::retry()
                    .with_prompt(PromptSpec::text("Please use at least three characters. What is your name?")));
            }
            ctx.set("name", name);
            Ok(ProcessResult::next())
        })
        .step(
            StepDefinition::from_fn(
                "age",
                PromptSpec::text("How old are you?").with_static_keyboard(age_keyboard),
                |input, ctx| {
                    if input.button_str() == Some("skip") {
                        return Ok(ProcessResult::jump("done"));
                    }
                    let age: i64 = input
                        .text
                        .trim()
                        .parse()
                        .map_err(|_| StepError::InvalidInput(format!("'{}' is not an age", input.text.trim())))?;
                    ctx.set("age", age);
                    Ok(ProcessResult::next())
                },
            )
            .jumps_to(["done"]),
        )
        .step(
            StepDefinition::from_fn(
                "done",
                PromptSpec::computed(|ctx| {
                    let name = ctx.get("name").and_then(StateValue::as_str).unwrap_or("stranger");
                    let age = ctx
                        .get("age")
                        .and_then(StateValue::as_number)
                        .map(|a| format!("{a}"))
                        .unwrap_or_else(|| "unknown".into());
                    Ok(format!("Name: {name}\nAge: {age}\nAll good?"))
                })
                .with_static_keyboard(confirm_keyboard),
                |input, ctx| match input.button_str() {
                    Some("confirm") => {
                        let name = ctx.get("name").and_then(StateValue::as_str).unwrap_or_default().to_string();
                        Ok(ProcessResult::complete().with_prompt(PromptSpec::text(format!("Welcome aboard, {name}!"))))
                    }
                    Some("restart") => Ok(ProcessResult::jump("name")),
                    _ => Ok(ProcessResult::retry()),
                },
            )
            .jumps_to(["name"]),
        )
        .error_policy(ErrorPolicy::Fallback(PromptSpec::text(
            "That did not look like a number. How old are you?",
        )))
        .on_complete(|done| info!(user = %done.user, data = %done.data.to_json(), "signup completed"))
        .build()?;
    Ok(flow)
}

async fn run(args: RunArgs) -> Result<()> {
    let config = ConfigManager::new(EnvConfigManager::new(args.env_file));
    let mut engine = EngineConfig::from_config(&config).await;
    if let Some(level) = args.log_level {
        engine.log.log_level = level;
    }
    if let Some(dir) = args.log_dir {
        engine.log.log_dir = Some(dir);
    }
    init_tracing(&engine.log).context("could not initialise logging")?;

    let console = ConsoleSender::new();
    let composer = PromptComposer::new(Arc::new(console.clone()), InMemoryCallbackStore::new())
        .with_placeholder(engine.keyboard_placeholder.clone());
    let manager = FlowManager::new(InMemorySessionStore::new(), composer);
    manager.register_flow(signup_flow()?);

    let shutdown = CancellationToken::new();
    let reaper = manager.spawn_reaper(engine.reaper_interval, shutdown.clone());

    let user = UserId::from("console");
    let chat = ChatId::from("console");
    println!("Type /start to begin, /cancel to abort, /quit to leave. Click a button with #N.");

    let mut lines = BufReader::new(stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let line = line.trim();

        match line {
            "" => continue,
            "/quit" => break,
            "/start" => {
                if let Err(err) = manager.start_flow("signup", RequestContext::new(user.clone(), chat.clone())).await {
                    error!(error = %err, "could not start flow");
                }
                continue;
            }
            "/cancel" => {
                if manager.cancel_flow(&user) {
                    println!("(flow cancelled)");
                }
                continue;
            }
            _ => {}
        }

        let event = match line.strip_prefix('#').and_then(|n| n.parse::<usize>().ok()) {
            Some(n) => {
                let Some((message, keyboard)) = console.last_keyboard().await else {
                    println!("(no buttons to click)");
                    continue;
                };
                let Some(button) = keyboard.buttons().nth(n.saturating_sub(1)) else {
                    println!("(no button #{n})");
                    continue;
                };
                match &button.kind {
                    InlineButtonKind::Callback(token) => InboundEvent::button(
                        user.clone(),
                        chat.clone(),
                        ButtonClick::new(token.clone(), button.text.clone()).on_message(message),
                    ),
                    InlineButtonKind::Url(url) => {
                        println!("(opens {url})");
                        continue;
                    }
                }
            }
            None => InboundEvent::text(user.clone(), chat.clone(), line),
        };

        match manager.advance(event).await {
            Ok(AdvanceOutcome::NotInFlow) => println!("(not in a flow, type /start)"),
            Ok(AdvanceOutcome::StaleCallback) => println!("(that button is no longer active)"),
            Ok(AdvanceOutcome::Expired) => println!("(the flow timed out, type /start)"),
            Ok(_) => {}
            Err(err) => error!(error = %err, "flow failed"),
        }
    }

    shutdown.cancel();
    reaper.await.context("session reaper panicked")?;
    info!("bye");
    Ok(())
}
