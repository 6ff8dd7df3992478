use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rehab_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use rehab_contracts::events::EventWriter;
use rehab_contracts::prompts::{resolve_master_prompt, MASTER_PROMPTS, TRANSPLANT_TITLE};
use rehab_contracts::session::{SessionState, UnitKey, UnitStatus};
use rehab_contracts::storage::{
    test_mode_acknowledgment, LocalStore, Preferences, SessionLoad, SessionStore, Theme,
};
use rehab_engine::{
    client_for_mode, error_chain_text, export_archive, EngineConfig, GenerationError,
    Orchestrator, OrchestratorOptions, DEFAULT_ARCHIVE_NAME,
};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "rehab-rs", version, about = "Photo restoration orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Run(RunArgs),
    Export(ExportArgs),
    Prefs(PrefsArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    store: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    test_mode: bool,
    #[arg(long)]
    delay_ms: Option<u64>,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    store: PathBuf,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    faces: bool,
    #[arg(long)]
    transplant: bool,
    #[arg(long)]
    test_mode: bool,
    #[arg(long)]
    delay_ms: Option<u64>,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long)]
    store: PathBuf,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct PrefsArgs {
    #[arg(long)]
    store: PathBuf,
    /// light, dark or toggle
    #[arg(long)]
    theme: Option<String>,
    /// on, off or toggle
    #[arg(long)]
    test_mode: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("rehab-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Run(args) => run_pipeline(args),
        Command::Export(args) => run_export(args),
        Command::Prefs(args) => run_prefs(args),
    }
}

struct ChatSession {
    store_root: PathBuf,
    config: EngineConfig,
    events: EventWriter,
    sessions: SessionStore,
    prefs: Preferences,
    test_mode: bool,
    orchestrator: Orchestrator,
}

impl ChatSession {
    fn new(
        store_root: &Path,
        events_path: PathBuf,
        config: EngineConfig,
        force_test_mode: bool,
    ) -> Result<Self> {
        let local = LocalStore::new(store_root);
        let prefs = Preferences::new(local.clone());
        let test_mode = force_test_mode || prefs.test_mode()?;
        let events = EventWriter::for_new_session(events_path);
        let orchestrator = build_orchestrator(test_mode, &config, events.clone())?;
        Ok(Self {
            store_root: store_root.to_path_buf(),
            config,
            events,
            sessions: SessionStore::new(local),
            prefs,
            test_mode,
            orchestrator,
        })
    }

    fn switch_test_mode(&mut self, enabled: bool) -> Result<()> {
        let snapshot = self.orchestrator.snapshot()?;
        let orchestrator = build_orchestrator(enabled, &self.config, self.events.clone())?;
        orchestrator.restore_snapshot(snapshot)?;
        self.orchestrator = orchestrator;
        self.test_mode = enabled;
        Ok(())
    }

    fn handle(&mut self, intent: &Intent, out: &mut Vec<String>) -> Result<()> {
        let orch = &self.orchestrator;
        match intent.action.as_str() {
            "noop" => {}
            "help" => out.push(format!("Commands: {}", CHAT_HELP_COMMANDS.join(" "))),
            "upload" => {
                let Some(path) = value_as_non_empty_string(intent.command_args.get("path")) else {
                    out.push("/upload requires a path".to_string());
                    return Ok(());
                };
                match orch.upload_file(Path::new(&path)) {
                    Ok(()) => out.push(format!("Uploaded {path}")),
                    Err(err) => out.push(format!("Upload failed: {err:#}")),
                }
            }
            "restore" | "iterate" => {
                let title = value_as_non_empty_string(intent.command_args.get("title"))
                    .unwrap_or_default();
                let iterate = intent.action == "iterate";
                if iterate && title.eq_ignore_ascii_case(TRANSPLANT_TITLE) {
                    report(out, orch, orch.iterate_transplant(), |asset| {
                        format!("Iterated {}", asset.title)
                    })?;
                    return Ok(());
                }
                let Some(master) = resolve_master_prompt(&title) else {
                    out.push(format!(
                        "/{} requires a prompt number (1-{}) or title",
                        intent.action,
                        MASTER_PROMPTS.len()
                    ));
                    return Ok(());
                };
                let result = if iterate {
                    orch.iterate(master.title)
                } else {
                    orch.restore(master.title)
                };
                report(out, orch, result, |asset| {
                    format!(
                        "{} {}",
                        if iterate { "Iterated" } else { "Generated" },
                        asset.title
                    )
                })?;
            }
            "generate_all" => match orch.generate_all_missing() {
                Ok(summary) => {
                    out.push(format!(
                        "Batch done: {} generated, {} failed, {} already present",
                        summary.succeeded, summary.failed, summary.skipped
                    ));
                    if let Some(message) = &summary.last_error {
                        out.push(format!("Last error: {message}"));
                    }
                }
                Err(err) => out.push(failure_line(&orch.state()?, &err)),
            },
            "face_closeups" => match orch.generate_face_closeups() {
                Ok(summary) => {
                    out.push(format!(
                        "Faces: {} detected, {} close-ups generated, {} failed",
                        summary.detected, summary.succeeded, summary.failed
                    ));
                    let state = orch.state()?;
                    if let Some(banner) = state.error_message() {
                        out.push(banner.to_string());
                    }
                    out.extend(face_lines(&state));
                }
                Err(err) => out.push(failure_line(&orch.state()?, &err)),
            },
            "regenerate_face" => {
                let Some(id) = intent
                    .command_args
                    .get("id")
                    .and_then(Value::as_u64)
                    .and_then(|id| u32::try_from(id).ok())
                else {
                    out.push("/regen requires a face id (see /status)".to_string());
                    return Ok(());
                };
                report(out, orch, orch.regenerate_face(id), |face| {
                    format!("Regenerated {}", face.title)
                })?;
            }
            "transplant" => {
                report(out, orch, orch.transplant(), |asset| {
                    format!("Generated {}", asset.title)
                })?;
            }
            "iterate_transplant" => {
                report(out, orch, orch.iterate_transplant(), |asset| {
                    format!("Iterated {}", asset.title)
                })?;
            }
            "save" => {
                if orch.save_session(&self.sessions)? {
                    out.push("Session saved.".to_string());
                } else {
                    out.push("Nothing to save yet; upload a photo first.".to_string());
                }
            }
            "load" => {
                if orch.load_session(&self.sessions)? {
                    out.push("Session restored.".to_string());
                    out.extend(status_lines(&orch.state()?, self.test_mode));
                } else {
                    out.push("No saved session.".to_string());
                }
            }
            "export" => {
                let path = value_as_non_empty_string(intent.command_args.get("path"))
                    .map(PathBuf::from)
                    .unwrap_or_else(|| default_archive_path(&self.store_root));
                match orch.export(&path) {
                    Ok(summary) => out.push(format!(
                        "Exported {} images to {}",
                        summary.entries.len(),
                        summary.path.display()
                    )),
                    Err(err) => out.push(format!("Export failed: {err:#}")),
                }
            }
            "reset" => {
                orch.reset()?;
                out.push("Session reset.".to_string());
            }
            "status" => out.extend(status_lines(&orch.state()?, self.test_mode)),
            "show_log" => out.extend(log_lines(&orch.state()?)),
            "show_prompts" => out.extend(prompt_lines(&orch.state()?)),
            "set_theme" => {
                let requested = value_as_non_empty_string(intent.command_args.get("theme"));
                let theme = match requested {
                    None => self.prefs.toggle_theme()?,
                    Some(raw) => match Theme::parse(&raw) {
                        Some(theme) => {
                            self.prefs.set_theme(theme)?;
                            theme
                        }
                        None => {
                            out.push(format!("Unknown theme '{raw}' (light or dark)"));
                            return Ok(());
                        }
                    },
                };
                out.push(format!("Theme: {theme}"));
            }
            "toggle_test_mode" => {
                let enabled = self.prefs.toggle_test_mode()?;
                self.switch_test_mode(enabled)?;
                out.push(test_mode_acknowledgment(enabled));
            }
            "unknown" => {
                if let Some(command) = value_as_non_empty_string(intent.command_args.get("command"))
                {
                    out.push(format!("Unknown command /{command}. Type /help."));
                } else {
                    out.push("Commands start with '/'. Type /help for the list.".to_string());
                }
            }
            other => out.push(format!("Unhandled action {other}")),
        }
        Ok(())
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.store.join("events.jsonl"));
    let config = config_with_delay(args.delay_ms);
    let mut session = ChatSession::new(&args.store, events_path, config, args.test_mode)?;

    let stdin = io::stdin();
    let mut line = String::new();
    println!("Photo rehab chat started. Type /help for commands.");
    if session.test_mode {
        println!("{}", test_mode_acknowledgment(true));
    }
    if session.sessions.has_session()? {
        println!("A saved session is available; /load to resume it.");
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        let mut out = Vec::new();
        session.handle(&intent, &mut out)?;
        for message in out {
            println!("{message}");
        }
    }
    Ok(())
}

fn run_pipeline(args: RunArgs) -> Result<i32> {
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.store.join("events.jsonl"));
    let local = LocalStore::new(&args.store);
    let test_mode = args.test_mode || Preferences::new(local.clone()).test_mode()?;
    let config = config_with_delay(args.delay_ms);
    let orch = build_orchestrator(test_mode, &config, EventWriter::for_new_session(events_path))?;
    let mut failures = 0;

    orch.upload_file(&args.image)?;
    println!("Uploaded {}", args.image.display());

    let batch = orch.generate_all_missing()?;
    println!(
        "Restorations: {} generated, {} failed",
        batch.succeeded, batch.failed
    );
    if let Some(message) = &batch.last_error {
        eprintln!("{message}");
    }
    failures += batch.failed;

    if args.faces || args.transplant {
        match orch.generate_face_closeups() {
            Ok(summary) => {
                println!(
                    "Faces: {} detected, {} close-ups generated, {} failed",
                    summary.detected, summary.succeeded, summary.failed
                );
                failures += summary.failed;
            }
            Err(err) => {
                eprintln!("Face close-ups failed: {}", error_chain_text(&err, 400));
                failures += 1;
            }
        }
    }

    if args.transplant {
        match orch.transplant() {
            Ok(asset) => println!("Generated {}", asset.title),
            Err(err) => {
                eprintln!("Transplant failed: {}", error_chain_text(&err, 400));
                failures += 1;
            }
        }
    }

    orch.save_session(&SessionStore::new(local))?;
    let out = args
        .out
        .clone()
        .unwrap_or_else(|| default_archive_path(&args.store));
    let summary = orch.export(&out)?;
    println!(
        "Exported {} images to {}",
        summary.entries.len(),
        summary.path.display()
    );
    Ok(if failures == 0 { 0 } else { 1 })
}

fn run_export(args: ExportArgs) -> Result<i32> {
    let sessions = SessionStore::new(LocalStore::new(&args.store));
    let snapshot = match sessions.load()? {
        SessionLoad::Restored(snapshot) => snapshot,
        SessionLoad::Absent => bail!("no saved session under {}", args.store.display()),
        SessionLoad::Discarded(reason) => bail!(GenerationError::PersistenceCorrupt(reason)),
    };
    let summary = export_archive(&snapshot, &args.out)?;
    println!(
        "Exported {} images to {}",
        summary.entries.len(),
        summary.path.display()
    );
    Ok(0)
}

fn run_prefs(args: PrefsArgs) -> Result<i32> {
    let prefs = Preferences::new(LocalStore::new(&args.store));
    if let Some(raw) = args.theme.as_deref() {
        match raw.trim().to_ascii_lowercase().as_str() {
            "toggle" => {
                prefs.toggle_theme()?;
            }
            other => match Theme::parse(other) {
                Some(theme) => prefs.set_theme(theme)?,
                None => bail!("unknown theme '{raw}' (light, dark or toggle)"),
            },
        }
    }
    if let Some(raw) = args.test_mode.as_deref() {
        let current = prefs.test_mode()?;
        let Some(enabled) = parse_switch(raw, current) else {
            bail!("unknown test mode '{raw}' (on, off or toggle)");
        };
        prefs.set_test_mode(enabled)?;
        if enabled != current {
            println!("{}", test_mode_acknowledgment(enabled));
        }
    }
    println!("theme: {}", prefs.theme()?);
    println!(
        "test_mode: {}",
        if prefs.test_mode()? { "on" } else { "off" }
    );
    Ok(0)
}

fn build_orchestrator(
    test_mode: bool,
    config: &EngineConfig,
    events: EventWriter,
) -> Result<Orchestrator> {
    Orchestrator::new(
        client_for_mode(test_mode, config),
        OrchestratorOptions {
            api_delay: config.api_delay,
            events: Some(events),
        },
    )
}

fn config_with_delay(delay_ms: Option<u64>) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if let Some(delay_ms) = delay_ms {
        config.api_delay = Duration::from_millis(delay_ms);
    }
    config
}

fn default_archive_path(store: &Path) -> PathBuf {
    store.join(DEFAULT_ARCHIVE_NAME)
}

fn report<T>(
    out: &mut Vec<String>,
    orch: &Orchestrator,
    result: Result<T>,
    describe: impl FnOnce(&T) -> String,
) -> Result<()> {
    match result {
        Ok(value) => out.push(describe(&value)),
        Err(err) => {
            let state = orch.state()?;
            out.push(failure_line(&state, &err));
        }
    }
    Ok(())
}

fn failure_line(state: &SessionState, err: &anyhow::Error) -> String {
    match state.error_message() {
        Some(banner) => format!("Error: {banner}"),
        None => format!("Error: {}", error_chain_text(err, 400)),
    }
}

fn parse_switch(raw: &str, current: bool) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        "toggle" => Some(!current),
        _ => None,
    }
}

fn status_marker(status: UnitStatus, done: bool) -> &'static str {
    match status {
        UnitStatus::Pending => "[..]",
        UnitStatus::Failed if !done => "[!!]",
        _ if done => "[ok]",
        _ => "[  ]",
    }
}

fn prompt_lines(state: &SessionState) -> Vec<String> {
    MASTER_PROMPTS
        .iter()
        .enumerate()
        .map(|(index, master)| {
            let done = state.restoration(master.title).is_some();
            let status = state.unit_status(&UnitKey::Restoration(master.title.to_string()));
            format!("{} {}. {}", status_marker(status, done), index + 1, master.title)
        })
        .collect()
}

fn face_lines(state: &SessionState) -> Vec<String> {
    state
        .face_closeups()
        .iter()
        .map(|face| {
            let status = state.unit_status(&UnitKey::Face(face.id));
            format!("{} {}", status_marker(status, true), face.title)
        })
        .collect()
}

fn status_lines(state: &SessionState, test_mode: bool) -> Vec<String> {
    let mut lines = Vec::new();
    match state.original() {
        Some(original) => lines.push(format!("Original: uploaded ({})", original.mime_type)),
        None => lines.push("Original: none (use /upload PATH)".to_string()),
    }
    lines.push(format!(
        "Mode: {}",
        if test_mode { "test (simulated)" } else { "live" }
    ));
    lines.push("Restorations:".to_string());
    lines.extend(prompt_lines(state).into_iter().map(|line| format!("  {line}")));
    let transplant_done = state.restoration(TRANSPLANT_TITLE).is_some();
    lines.push(format!(
        "  {} {}",
        status_marker(state.unit_status(&UnitKey::Transplant), transplant_done),
        TRANSPLANT_TITLE
    ));
    if state.face_closeups().is_empty() {
        lines.push("Faces: none".to_string());
    } else {
        lines.push("Faces:".to_string());
        lines.extend(face_lines(state).into_iter().map(|line| format!("  {line}")));
    }
    lines.push(format!("Requests: {}", state.api_request_log().len()));
    if let Some(banner) = state.error_message() {
        lines.push(format!("Error: {banner}"));
    }
    lines
}

fn log_lines(state: &SessionState) -> Vec<String> {
    if state.api_request_log().is_empty() {
        return vec!["No API requests yet.".to_string()];
    }
    state
        .api_request_log()
        .iter()
        .map(|entry| format!("#{} {} {}", entry.id, entry.timestamp, entry.kind))
        .collect()
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    let raw = value
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}
