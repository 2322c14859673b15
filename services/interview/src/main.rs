use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use interview_core::Command;
use interview_core::chat::ChatTurnHandler;
use interview_core::llm::ChatCompletionsClient;
use interview_core::orchestrator::InterviewOrchestrator;
use interview_core::runtime::{SessionInput, SessionRuntime};
use interview_core::session::{InterviewCategory, InterviewConfig, SessionStatus};
use interview_core::store::{SessionStore, StaticIdentity};
use interview_core::voice::{VoiceEvent, VoiceIoWatchdog, VoiceTuning};
use interview_service::config::Config;
use interview_service::console::{self, ConsoleLine, HELP};
use interview_service::file_store::JsonFileStore;
use interview_service::speech::{NativeVoiceBackend, SpeechApi};
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Practice job interviews with an AI interviewer")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Start a new interview, or continue one with --resume
    Start(StartArgs),
    /// Register a user with the local store (defaults to INTERVIEW_USER)
    Register { user_id: Option<String> },
    /// List stored sessions
    Sessions,
    /// Print the transcript of a stored session
    Transcript { session_id: String },
    /// List audio devices usable for voice mode
    Devices,
}

#[derive(Args)]
struct StartArgs {
    /// technical, behavioral, system-design, company-specific or general
    #[arg(long, default_value = "technical")]
    category: String,
    /// The role being interviewed for
    #[arg(long, required_unless_present = "resume")]
    role: Option<String>,
    /// entry, junior, mid, senior or lead
    #[arg(long, default_value = "mid")]
    level: String,
    #[arg(long, default_value_t = 30)]
    minutes: u64,
    #[arg(long)]
    company: Option<String>,
    /// Topics the interviewer should focus on
    #[arg(long)]
    topics: Option<String>,
    /// Short summary of the candidate's background
    #[arg(long)]
    background: Option<String>,
    /// Begin with voice mode on
    #[arg(long)]
    voice: bool,
    /// Do not read interviewer replies aloud
    #[arg(long)]
    no_speak: bool,
    /// Continue an in-progress session instead of starting a new one
    #[arg(long, value_name = "SESSION_ID")]
    resume: Option<String>,
    #[arg(long)]
    input_device: Option<String>,
    #[arg(long)]
    output_device: Option<String>,
}

impl StartArgs {
    fn interview_config(&self) -> InterviewConfig {
        InterviewConfig {
            category: InterviewCategory::parse(&self.category),
            company_name: self.company.clone(),
            job_role: self.role.clone().unwrap_or_default(),
            experience_level: self.level.clone(),
            duration_secs: self.minutes * 60,
            focus_topics: self.topics.clone(),
            resume_summary: self.background.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    // Logs go to stderr so they do not interleave with the conversation.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    // --- 3. Parse Command-Line Arguments ---
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Devices => {
            println!("{}", interview_native_utils::device::get_available_inputs()?);
            println!("{}", interview_native_utils::device::get_available_outputs()?);
            Ok(())
        }
        CliCommand::Register { user_id } => {
            let store = JsonFileStore::open(&config.data_dir).await?;
            let user_id = user_id.unwrap_or_else(|| config.user_id.clone());
            store.register_user(&user_id).await?;
            println!("Registered user '{user_id}'");
            Ok(())
        }
        CliCommand::Sessions => {
            let store = JsonFileStore::open(&config.data_dir).await?;
            for session in store.sessions().await {
                let status = match session.status {
                    SessionStatus::InProgress => "in progress".to_string(),
                    SessionStatus::Completed => match session.score {
                        Some(score) => format!("completed, {score}/100"),
                        None => "completed".to_string(),
                    },
                };
                println!(
                    "{}  {}  {} ({}, {})  {}",
                    session.id,
                    session.created_at.format("%Y-%m-%d %H:%M"),
                    session.config.job_role,
                    session.config.category,
                    session.config.experience_level,
                    status
                );
            }
            Ok(())
        }
        CliCommand::Transcript { session_id } => {
            let store = JsonFileStore::open(&config.data_dir).await?;
            let session = store.get_session(&session_id).await?;
            for entry in store.read_transcript(&session_id).await? {
                println!("{}", console::render_entry(&entry));
            }
            if session.status == SessionStatus::Completed {
                println!("\n{}", console::render_summary(&session));
            }
            Ok(())
        }
        CliCommand::Start(args) => run_interview(&config, args).await,
    }
}

async fn run_interview(config: &Config, args: StartArgs) -> Result<()> {
    // --- 4. Initialize Store and Clients ---
    let store = Arc::new(JsonFileStore::open(&config.data_dir).await?);
    let model = Arc::new(ChatCompletionsClient::new(config.llm_config()));
    let chat = Arc::new(ChatTurnHandler::new(store.clone(), model));

    // Create the command channel to decouple core logic from the runtime.
    let (command_tx, command_rx) = mpsc::channel::<Command>(64);
    let auto_speak = !args.no_speak;

    let orchestrator = match &args.resume {
        Some(session_id) => {
            InterviewOrchestrator::resume(session_id, store.clone(), chat, command_tx, auto_speak)
                .await
                .with_context(|| format!("Failed to resume session {session_id}"))?
        }
        None => {
            let identity = StaticIdentity::new(config.user_id.clone());
            InterviewOrchestrator::start(
                args.interview_config(),
                &identity,
                store.clone(),
                chat,
                command_tx,
                auto_speak,
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to start the interview (run `register` first if '{}' is new)",
                    config.user_id
                )
            })?
        }
    };
    println!(
        "Session {} | {} questions | {} minutes\n{HELP}\n",
        orchestrator.session().id,
        orchestrator.total_questions(),
        orchestrator.remaining_secs().div_ceil(60)
    );

    // --- 5. Voice Devices ---
    // Devices are only opened when voice mode is switched on.
    let (voice_tx, voice_rx) = mpsc::channel::<VoiceEvent>(256);
    let backend = NativeVoiceBackend::new(Arc::new(SpeechApi::new(config)))
        .with_devices(args.input_device.clone(), args.output_device.clone());
    let watchdog = VoiceIoWatchdog::new(Box::new(backend), voice_tx).with_tuning(VoiceTuning {
        voice: config.tts_voice.clone(),
        ..Default::default()
    });

    let (output_tx, mut output_rx) = mpsc::channel::<Command>(64);
    let runtime = SessionRuntime::new(orchestrator, command_rx, output_tx).with_voice(watchdog, voice_rx);

    // --- 6. Session Inputs ---
    let (input_tx, input_rx) = mpsc::channel::<SessionInput>(32);
    if args.voice {
        input_tx.send(SessionInput::EnableVoice).await?;
    }

    // Blocking stdin reads get their own thread so they never hold up shutdown.
    let console_tx = input_tx.clone();
    std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || read_console(console_tx))
        .context("Failed to start console reader")?;

    let ctrl_c_tx = input_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down...");
            let _ = ctrl_c_tx.send(SessionInput::Shutdown).await;
        }
    });
    drop(input_tx);

    let printer = tokio::spawn(async move {
        while let Some(command) = output_rx.recv().await {
            if let Some(text) = console::render_command(&command) {
                println!("{text}");
            }
        }
    });

    // --- 7. Run ---
    let session = runtime.run(input_rx).await;
    if let Err(e) = printer.await {
        tracing::error!("Output task failed: {:?}", e);
    }

    if session.is_in_progress() {
        println!(
            "\nLeft session {} at question {}. Continue with `start --resume {}`.",
            session.id, session.current_question, session.id
        );
    }
    tracing::info!("Shutting down...");
    Ok(())
}

fn read_console(inputs: mpsc::Sender<SessionInput>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to read from stdin: {}", e);
                break;
            }
        };
        let input = match console::parse_line(&line) {
            Ok(ConsoleLine::Input(input)) => input,
            Ok(ConsoleLine::Help) => {
                println!("{HELP}");
                continue;
            }
            Ok(ConsoleLine::Blank) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        let quit = input == SessionInput::Shutdown;
        if inputs.blocking_send(input).is_err() || quit {
            break;
        }
    }
}
