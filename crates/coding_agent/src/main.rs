use std::io::{self, IsTerminal, Read, Write};
use std::process::ExitCode;

use coding_agent::config::AgentConfig;
use coding_agent::logging::init_tracing;
use coding_agent::provider::{CancelSignal, RunEvent};
use coding_agent::providers;
use coding_agent::runtime::Conversation;
use coding_agent::signals::cancel_on_signal;
use coding_agent::tools::BuiltinToolExecutor;
use coding_agent::transcript::write_transcript;
use shell_capture::CaptureEngine;

fn main() -> ExitCode {
    init_tracing();

    match run() {
        Ok(code) => code,
        Err(error) => {
            eprintln!("coding_agent: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> io::Result<ExitCode> {
    let prompt = prompt_from_args_or_stdin()?;
    if prompt.trim().is_empty() {
        eprintln!("usage: coding_agent [PROMPT...]  (or pipe the prompt on stdin)");
        return Ok(ExitCode::from(2));
    }

    let config = AgentConfig::from_env();
    let provider = providers::provider_from_env().map_err(io::Error::other)?;

    let cwd = std::env::current_dir()?;
    let engine = CaptureEngine::new(config.capture.clone().with_working_dir(cwd));
    let tools = BuiltinToolExecutor::new(engine)
        .with_initial_wait(config.initial_wait)
        .with_tail_lines(config.tail_lines);
    let mut conversation = Conversation::with_tools(provider, tools, config.conversation());

    let cancel = CancelSignal::default();
    let _signals = cancel_on_signal(cancel.clone())?;

    let mut stdout = io::stdout().lock();
    let outcome = conversation.run(&prompt, &cancel, &mut |event| match event {
        RunEvent::Chunk { text, .. } => {
            let _ = writeln!(stdout, "{text}");
            let _ = stdout.flush();
        }
        RunEvent::ToolStarted { tool_name, .. } => eprintln!("[tool] {tool_name} ..."),
        RunEvent::ToolFinished {
            tool_name,
            is_error,
            ..
        } => {
            let status = if is_error { "failed" } else { "ok" };
            eprintln!("[tool] {tool_name} {status}");
        }
        RunEvent::Started { .. }
        | RunEvent::Finished { .. }
        | RunEvent::Failed { .. }
        | RunEvent::Cancelled { .. } => {}
    });

    if config.transcript {
        write_transcript(&mut stdout, conversation.messages())?;
    }

    match outcome {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(error) => {
            eprintln!("coding_agent: {error}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn prompt_from_args_or_stdin() -> io::Result<String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        return Ok(args.join(" "));
    }

    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(String::new());
    }

    let mut prompt = String::new();
    stdin.read_to_string(&mut prompt)?;
    Ok(prompt)
}
