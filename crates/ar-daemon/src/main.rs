//! ARCANOS daemon binary: loads layered configuration, builds the
//! orchestrator with the host adapters, starts the scheduler and the
//! loopback debug transport, then serves the operator REPL until ctrl-c.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use ar_bridge::DebugServerConfig;
use ar_core::config::{Config, ConfigError};
use ar_daemon::adapters::{Adapters, NoopAudio, NoopVision, ProcessTerminal, StdConsole};
use ar_daemon::llm_local::OpenAiCompatLlm;
use ar_daemon::{Orchestrator, TurnError, TurnOptions};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    ar_telemetry::logging::init_logging("ar-daemon", "info");

    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Invalid(errors)) => {
            eprintln!("configuration is invalid:");
            for error in &errors {
                eprintln!("  - {error}");
            }
            std::process::exit(1);
        }
    };

    info!(version = %config.version, "ar-daemon starting");

    let adapters = Adapters {
        llm: Arc::new(OpenAiCompatLlm::new(config.local_llm.clone())),
        terminal: Arc::new(ProcessTerminal),
        vision: Arc::new(NoopVision),
        audio: Arc::new(NoopAudio),
        console: Arc::new(StdConsole),
    };

    let debug_config = config.debug.clone();
    let orchestrator = Orchestrator::new(config, adapters).context("failed to build orchestrator")?;
    orchestrator.bootstrap().await;

    if debug_config.enabled {
        let server_config = DebugServerConfig {
            port: debug_config.port,
            token: debug_config.token.clone(),
            rate_limit_per_minute: debug_config.rate_limit_per_minute,
            metrics_enabled: debug_config.metrics_enabled,
        };
        let host: Arc<dyn ar_bridge::DebugHost> = orchestrator.clone();
        match ar_bridge::serve(
            host,
            server_config,
            orchestrator.audit(),
            orchestrator.shutdown(),
        )
        .await
        {
            Ok(port) => info!(port, "debug transport enabled"),
            Err(e) => error!(error = %e, "failed to start debug transport"),
        }
    }

    run_repl(&orchestrator).await;

    orchestrator.stop().await;
    info!("ar-daemon stopped");
    Ok(())
}

async fn run_repl(orchestrator: &Arc<Orchestrator>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, shutting down");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) => {
                        if !handle_repl_line(orchestrator, text.trim()).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        // Stdin closed (headless run): stay alive for the
                        // scheduler and debug transport until ctrl-c.
                        let _ = tokio::signal::ctrl_c().await;
                        info!("ctrl-c received, shutting down");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "stdin error");
                        break;
                    }
                }
            }
        }
    }
}

/// Returns false when the REPL should exit.
async fn handle_repl_line(orchestrator: &Arc<Orchestrator>, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    match line {
        "exit" | "quit" => return false,
        "see" | "see screen" => {
            if let Err(e) = orchestrator.handle_see(false).await {
                println!("{e}");
            }
            return true;
        }
        "see camera" => {
            if let Err(e) = orchestrator.handle_see(true).await {
                println!("{e}");
            }
            return true;
        }
        "voice" => {
            match orchestrator.handle_voice_turn().await {
                Ok(result) => print_turn_footer(&result.model, result.tokens_used),
                Err(e) => println!("{e}"),
            }
            return true;
        }
        _ => {}
    }

    if let Some(command) = line.strip_prefix("run ") {
        // Output is rendered by the run pipeline itself.
        let _ = orchestrator.handle_run(command.trim(), false).await;
        return true;
    }

    // The orchestrator renders the response text (streamed or whole);
    // the REPL adds only the usage footer.
    match orchestrator.handle_turn(line, TurnOptions::default()).await {
        Ok(result) => print_turn_footer(&result.model, result.tokens_used),
        Err(TurnError::RateLimited { retry_after_secs }) => {
            println!("Rate limit exceeded. Try again in {retry_after_secs}s.");
        }
        Err(e) => println!("{e}"),
    }
    true
}

fn print_turn_footer(model: &str, tokens: u64) {
    println!("  [{model} | {tokens} tokens]");
}
