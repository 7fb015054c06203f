// termtrail - remembers your terminal commands and learns from them
//
// This is the main entry point. Parses CLI args and dispatches to handlers.
// The `hook` commands are called by the shell on every prompt, so they never
// print anything and always exit 0.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, Utc};
use std::env;
use std::fs::File;
use std::io::{self, BufWriter};
use std::sync::Arc;
use termtrail_lib::{
    core::{CapturePipeline, ExportFormat, Exporter, Searcher},
    intelligence::{Analyzer, PatternKind, SuggestionEngine},
    shell::{Shell, ShellDetector},
    workflow::WorkflowManager,
    Config, Database,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Grab whatever the user typed
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let command = args[1].as_str();

    // Hooks swallow everything, including a broken config
    if command == "hook" {
        handle_hook(&args[2..]).await;
        return Ok(());
    }

    let config = Config::load().map_err(|e| anyhow!(e.user_message()))?;
    termtrail_lib::logging::init(&config.log_level);

    match command {
        "session" => handle_session(&config, &args[2..]).await,
        "recent" => handle_recent(&config, &args[2..]).await,
        "search" => handle_search(&config, &args[2..]).await,
        "mine" => handle_mine(&config).await,
        "patterns" => handle_patterns(&config, &args[2..]).await,
        "errors" => handle_errors(&config, &args[2..]).await,
        "suggest" => handle_suggest(&config, &args[2..]).await,
        "workflow" => handle_workflow(&config, &args[2..]).await,
        "export" => handle_export(&config, &args[2..]).await,
        "stats" => handle_stats(&config).await,
        "gc" => handle_gc(&config, &args[2..]).await,
        "version" | "-v" | "--version" => {
            println!("termtrail v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "-h" | "--help" => {
            print_usage();
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            Ok(())
        }
    }
}

async fn handle_hook(args: &[String]) {
    let Ok(config) = Config::load() else {
        return;
    };
    termtrail_lib::logging::init(&config.log_level);

    if let Err(e) = run_hook(&config, args).await {
        tracing::warn!(error = %e, "hook failed");
    }
}

async fn run_hook(config: &Config, args: &[String]) -> Result<()> {
    let Some(phase) = args.first() else {
        return Ok(());
    };

    let db = open_database(config).await?;
    let pipeline = CapturePipeline::new(Arc::clone(&db), config.capture_policy())?;

    match phase.as_str() {
        // hook start <session> <cwd> <text...>
        "start" if args.len() >= 4 => {
            let session_id = &args[1];
            let cwd = &args[2];
            let text = args[3..].join(" ");

            pipeline.resume(session_id).await?;
            pipeline.on_command_start(&text, cwd, session_id);
        }
        // hook end <session> <exit_code> <duration_ms>
        "end" => match parse_hook_end(&args[1..]) {
            Some((session_id, exit_code, duration_ms)) => {
                pipeline.resume(session_id).await?;
                pipeline.close(session_id, exit_code, duration_ms);
            }
            None => tracing::debug!(?args, "unreadable hook end, ignored"),
        },
        _ => {}
    }

    pipeline.shutdown().await;
    db.close().await;
    Ok(())
}

/// `<session> <exit_code> <duration_ms>`
///
/// A garbled exit code drops the event. Reading it as 0 would let it solve
/// an open error window.
fn parse_hook_end(args: &[String]) -> Option<(&str, i32, u64)> {
    let [session_id, exit_code, duration_ms, ..] = args else {
        return None;
    };
    let exit_code = exit_code.trim().parse().ok()?;
    let duration_ms = duration_ms.trim().parse().unwrap_or(0);

    Some((session_id.as_str(), exit_code, duration_ms))
}

async fn handle_session(config: &Config, args: &[String]) -> Result<()> {
    let db = open_database(config).await?;
    let pipeline = CapturePipeline::new(Arc::clone(&db), config.capture_policy())?;

    match args.first().map(String::as_str) {
        // session start [shell] [--id <id>]
        Some("start") => {
            let mut shell = ShellDetector::detect();
            let mut id: Option<String> = None;

            let mut i = 1;
            while i < args.len() {
                match args[i].as_str() {
                    "--id" => {
                        i += 1;
                        id = args.get(i).cloned();
                    }
                    other => shell = Shell::from(other),
                }
                i += 1;
            }

            let session_id = match id {
                Some(id) => match pipeline.attach_with_id(&id, shell) {
                    Some(session) => session.id,
                    None => bail!("Session {} has already ended", id),
                },
                None => pipeline.attach(shell),
            };
            pipeline.shutdown().await;

            // the shell captures this and passes it to every hook call
            println!("{}", session_id);
        }
        Some("end") => {
            let session_id = args.get(1).context("usage: termtrail session end <id>")?;

            pipeline.resume(session_id).await?;
            if !pipeline.detach(session_id) {
                eprintln!("No active session {}", session_id);
            }
            pipeline.shutdown().await;
        }
        Some("list") => {
            for session in db.list_sessions(20).await? {
                println!(
                    "{}  {:<10} {:<6} started {}",
                    session.id,
                    session.shell,
                    session.status,
                    session.start_time.format("%Y-%m-%d %H:%M")
                );
            }
        }
        _ => bail!("usage: termtrail session start [shell] [--id <id>] | end <id> | list"),
    }

    Ok(())
}

async fn handle_recent(config: &Config, args: &[String]) -> Result<()> {
    let limit = args
        .first()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(10);
    let session = args.get(1).map(String::as_str);

    let db = open_database(config).await?;
    let commands = Searcher::new(db).recent(session, limit).await?;

    if commands.is_empty() {
        println!("No commands found.");
        return Ok(());
    }

    println!("\nRecent commands:");
    println!("{}", "=".repeat(60));
    for (i, cmd) in commands.iter().enumerate() {
        let status = match cmd.exit_code {
            Some(0) => "ok",
            Some(_) => "FAIL",
            None => "..",
        };
        println!(
            "{:3}. [{:<4}] {:<18} {}",
            i + 1,
            status,
            cmd.semantic_type,
            cmd.text
        );
    }
    println!("{}", "=".repeat(60));

    Ok(())
}

async fn handle_search(config: &Config, args: &[String]) -> Result<()> {
    if args.is_empty() {
        bail!("No search query provided");
    }

    let query = args.join(" ");
    let db = open_database(config).await?;
    let results = Searcher::new(db).search(&query, 20).await?;

    if results.is_empty() {
        println!("No commands found matching '{}'", query);
        return Ok(());
    }

    println!("\nFound {} command(s) matching '{}':", results.len(), query);
    println!("{}", "=".repeat(60));
    for (i, result) in results.iter().enumerate() {
        println!("{:3}. {}  (in {})", i + 1, result.command.text, result.command.directory);
    }
    println!("{}", "=".repeat(60));

    Ok(())
}

async fn handle_mine(config: &Config) -> Result<()> {
    let db = open_database(config).await?;
    let analyzer = Analyzer::new(db, config.miner_config());

    let report = analyzer.analyze(Utc::now()).await?;

    println!(
        "Scanned {} commands across {} sessions, found {} patterns.",
        report.mining.commands_scanned,
        report.mining.sessions_scanned,
        report.mining.patterns.len()
    );
    for pattern in report.mining.patterns.iter().take(10) {
        println!("  {:<11} {:<50} x{}", pattern.kind, pattern.key, pattern.frequency);
    }

    if !report.recent_solutions.is_empty() {
        println!("\nRecent fixes:");
        for pair in &report.recent_solutions {
            println!(
                "  {}  ->  {}",
                pair.problem_text,
                pair.solution_text.as_deref().unwrap_or("")
            );
        }
    }

    Ok(())
}

async fn handle_patterns(config: &Config, args: &[String]) -> Result<()> {
    let kind = match args.first() {
        Some(raw) => Some(raw.parse::<PatternKind>().map_err(|e| anyhow!(e.user_message()))?),
        None => None,
    };

    let db = open_database(config).await?;
    let analyzer = Analyzer::new(db, config.miner_config());
    let patterns = analyzer.miner().list(kind, 50).await?;

    if patterns.is_empty() {
        println!("No patterns yet. Run `termtrail mine` first.");
        return Ok(());
    }

    for (i, pattern) in patterns.iter().enumerate() {
        println!(
            "{:3}. {:<11} {:<50} x{:<4} last {}",
            i + 1,
            pattern.kind,
            pattern.key,
            pattern.frequency,
            pattern.last_seen.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

async fn handle_errors(config: &Config, args: &[String]) -> Result<()> {
    let db = open_database(config).await?;
    let analyzer = Analyzer::new(db, config.miner_config());
    let linker = analyzer.linker();

    let rows = match args.first().map(String::as_str) {
        Some("--unsolved") => linker.unsolved(20).await?,
        Some(_) => linker.solutions_for(&args.join(" "), 20).await?,
        None => linker.solutions(20).await?,
    };

    if rows.is_empty() {
        println!("Nothing recorded yet.");
        return Ok(());
    }

    for row in rows {
        match &row.solution_text {
            Some(solution) => println!("  {}  ->  {}", row.problem_text, solution),
            None => println!("  {}  (unsolved)", row.problem_text),
        }
    }

    Ok(())
}

async fn handle_suggest(config: &Config, args: &[String]) -> Result<()> {
    let db = open_database(config).await?;
    let engine = SuggestionEngine::new(db);

    let suggestions = engine.suggest(args.first().map(String::as_str), 5).await?;
    if suggestions.is_empty() {
        println!("No suggestions yet. Try `termtrail mine` after some history builds up.");
        return Ok(());
    }

    for suggestion in suggestions {
        println!(
            "  {:>3.0}%  {}  ({})",
            suggestion.confidence * 100.0,
            suggestion.command,
            suggestion.reason
        );
    }

    Ok(())
}

async fn handle_workflow(config: &Config, args: &[String]) -> Result<()> {
    let db = open_database(config).await?;
    let manager = WorkflowManager::new(Arc::clone(&db));

    match args.first().map(String::as_str) {
        // workflow create <name> [--description <text>] <command>...
        Some("create") => {
            let name = args.get(1).context("usage: termtrail workflow create <name> [--description <text>] <command>...")?;
            let mut description = String::new();
            let mut commands = Vec::new();

            let mut i = 2;
            while i < args.len() {
                if args[i] == "--description" {
                    i += 1;
                    description = args.get(i).cloned().unwrap_or_default();
                } else {
                    commands.push(args[i].clone());
                }
                i += 1;
            }

            let workflow = manager
                .create(name, &description, commands)
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            println!("Saved workflow '{}' ({} steps)", workflow.name, workflow.commands.len());
        }
        Some("list") => {
            let workflows = manager.list().await?;
            if workflows.is_empty() {
                println!("No workflows yet.");
            }
            for workflow in workflows {
                println!(
                    "  {:<20} {:>3} steps  used {:>3}x  {:>5.1}% ok  {}",
                    workflow.name,
                    workflow.commands.len(),
                    workflow.times_used,
                    workflow.success_rate * 100.0,
                    workflow.description
                );
            }
        }
        Some("show") => {
            let name = args.get(1).context("usage: termtrail workflow show <name>")?;
            let workflow = manager
                .get(name)
                .await?
                .ok_or_else(|| anyhow!("Workflow '{}' not found", name))?;

            println!("{}: {}", workflow.name, workflow.description);
            for (i, command) in workflow.commands.iter().enumerate() {
                println!("  {}. {}", i + 1, command);
            }
        }
        Some("run") => {
            let name = args.get(1).context("usage: termtrail workflow run <name>")?;
            let report = manager.run(name).await.map_err(|e| anyhow!(e.user_message()))?;

            for step in &report.steps {
                println!(
                    "  [{}] {} ({} ms)",
                    if step.succeeded() { "ok" } else { "FAIL" },
                    step.command,
                    step.duration_ms
                );
            }
            println!(
                "{} - used {} times, {:.1}% successful",
                if report.overall_success { "Workflow succeeded" } else { "Workflow failed" },
                report.times_used,
                report.success_rate * 100.0
            );
            if !report.overall_success {
                std::process::exit(1);
            }
        }
        Some("delete") => {
            let name = args.get(1).context("usage: termtrail workflow delete <name>")?;
            if manager.delete(name).await? {
                println!("Deleted workflow '{}'", name);
            } else {
                println!("No workflow named '{}'", name);
            }
        }
        // workflow from-pattern <n> <name> [description...]
        Some("from-pattern") => {
            let index: usize = args
                .get(1)
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .context("usage: termtrail workflow from-pattern <n> <name> [description]")?;
            let name = args.get(2).context("missing workflow name")?;
            let description = args.get(3..).map(|rest| rest.join(" ")).unwrap_or_default();

            let analyzer = Analyzer::new(Arc::clone(&db), config.miner_config());
            let patterns = analyzer.miner().list(None, 50).await?;
            let pattern = patterns
                .get(index - 1)
                .ok_or_else(|| anyhow!("No pattern #{} (see `termtrail patterns`)", index))?;

            let workflow = manager
                .from_pattern(pattern, name, &description)
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            println!("Saved workflow '{}':", workflow.name);
            for (i, command) in workflow.commands.iter().enumerate() {
                println!("  {}. {}", i + 1, command);
            }
        }
        _ => bail!("usage: termtrail workflow create|list|show|run|delete|from-pattern"),
    }

    Ok(())
}

async fn handle_export(config: &Config, args: &[String]) -> Result<()> {
    let format: ExportFormat = args
        .first()
        .map(String::as_str)
        .unwrap_or("json")
        .parse()
        .map_err(|e: termtrail_lib::TrailError| anyhow!(e.user_message()))?;

    let db = open_database(config).await?;
    let exporter = Exporter::new(db);

    let count = match args.get(1) {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("cannot create {}", path))?;
            exporter.export(format, BufWriter::new(file)).await?
        }
        None => exporter.export(format, io::stdout().lock()).await?,
    };

    eprintln!("Exported {} commands.", count);
    Ok(())
}

async fn handle_stats(config: &Config) -> Result<()> {
    let db = open_database(config).await?;
    let analyzer = Analyzer::new(db, config.miner_config());
    let stats = analyzer.stats().await?;

    println!("\ntermtrail Status");
    println!("{}", "=".repeat(60));
    println!("  Commands:    {}", stats.total_commands);
    println!("  Sessions:    {}", stats.total_sessions);
    println!("  Patterns:    {}", stats.total_patterns);
    println!("  Workflows:   {}", stats.total_workflows);
    println!(
        "  Errors:      {} solved, {} unsolved",
        stats.solved_errors, stats.unsolved_errors
    );

    if !stats.by_type.is_empty() {
        println!("\nBy type:");
        for row in &stats.by_type {
            println!(
                "  {:<20} {:>6}  {:>5.1}% failed",
                row.semantic_type,
                row.count,
                row.failure_rate() * 100.0
            );
        }
    }
    println!("{}", "=".repeat(60));

    Ok(())
}

async fn handle_gc(config: &Config, args: &[String]) -> Result<()> {
    let days = match args.first() {
        Some(raw) => Some(raw.parse::<i64>().context("gc takes a number of days")?),
        None => config.retention_days,
    };

    let Some(days) = days.filter(|d| *d > 0) else {
        println!("No retention configured. Set retention_days or pass a number of days.");
        return Ok(());
    };

    let db = open_database(config).await?;
    let removed = db.prune_before(Utc::now() - Duration::days(days)).await?;
    println!("Removed {} commands older than {} days.", removed, days);

    Ok(())
}

async fn open_database(config: &Config) -> Result<Arc<Database>> {
    let db = Database::new(&config.database_path)
        .await
        .with_context(|| format!("cannot open {}", config.database_path.display()))?;
    Ok(Arc::new(db))
}

fn print_usage() {
    println!(
        r#"termtrail v{} - Your terminal remembers what worked

USAGE:
    termtrail <COMMAND> [OPTIONS]

COMMANDS:
    session start [shell] [--id <id>]   Start a session, prints its id
    session end <id>                    End a session
    session list                        Show recent sessions
    hook start <session> <cwd> <cmd>    Called by the shell before a command
    hook end <session> <exit> <ms>      Called by the shell after a command
    recent [limit] [session]            Show recent commands (default: 10)
    search <query>                      Fuzzy search your history
    mine                                Find patterns in your history
    patterns [sequence-2|sequence-3|time-slot]
                                        Show mined patterns
    errors [--unsolved | <text>]        Show failures and what fixed them
    suggest [session]                   Suggest what to run next
    workflow create <name> [--description <text>] <cmd>...
    workflow list | show <name> | run <name> | delete <name>
    workflow from-pattern <n> <name> [description]
    export [json|csv] [file]            Export history (no sensitive commands)
    stats                               Show statistics
    gc [days]                           Delete old history
    version                             Show version
    help                                Show this help

ENVIRONMENT:
    TERMTRAIL_DB     Database path override
    TERMTRAIL_LOG    Log filter, e.g. debug
"#,
        env!("CARGO_PKG_VERSION")
    );
}
