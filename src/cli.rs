use anyhow::Result;
use colored::*;
use termimad::MadSkin;
use tracing::debug;

use crate::commands::{CommandRegistry, CommandResult};
use crate::controller::{Analysis, ConversationController, TurnOutcome};
use crate::input::QueryReader;

const HEADER_WIDTH: usize = 60;

/// Runs the interactive session until the user exits or interrupts a turn.
pub async fn run_classic_cli(mut controller: ConversationController, os_name: &str) -> Result<()> {
    println!("{}", "═".repeat(HEADER_WIDTH).bright_blue());
    println!("{}", "smartcli - natural language to shell".bright_white().bold());
    println!("{}", "═".repeat(HEADER_WIDTH).bright_blue());
    println!(
        "{} {}   {} {}",
        "Provider:".dimmed(),
        controller.provider_name().cyan(),
        "OS:".dimmed(),
        os_name.cyan()
    );
    println!("{}", "─".repeat(HEADER_WIDTH).dimmed());
    println!("{} Type '/help' for available commands", "💡".yellow());
    println!("{} Describe what you want to do and confirm the command", "💬".bright_blue());
    println!();

    let registry = CommandRegistry::new();
    let mut reader = QueryReader::new();

    loop {
        let line = match reader.read(controller.pending_question())? {
            Some(line) => line,
            None => break,
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if registry.is_command(input) {
            let result = match registry.execute(input, &mut controller).await {
                Ok(result) => result,
                Err(e) => CommandResult::error(format!("{:#}", e)),
            };
            if result.exit {
                break;
            }
            display_command_result(result);
            println!();
            continue;
        }

        let outcome = controller.handle_query_until(input, interrupt()).await;
        debug!(trace = ?controller.last_trace(), "turn finished");
        if matches!(outcome, TurnOutcome::Interrupted) {
            println!("\n{}", "Interrupted.".yellow());
            break;
        }
        display_outcome(outcome);
        println!();
    }

    println!("{}", "─".repeat(HEADER_WIDTH).dimmed());
    println!("{}", "Goodbye!".bright_white());
    Ok(())
}

/// Resolves on Ctrl-C. If the handler cannot be installed it never
/// resolves, so a turn is not cut short by the failure.
async fn interrupt() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn display_command_result(result: CommandResult) {
    match result {
        CommandResult { success: true, output, .. } => {
            if !output.trim().is_empty() {
                println!("{}", output);
            }
        }
        CommandResult { success: false, error: Some(error), .. } => {
            println!("{} {}", "Error:".red(), error);
        }
        _ => {}
    }
}

fn display_outcome(outcome: TurnOutcome) {
    match outcome {
        TurnOutcome::BudgetExceeded { used, budget } => {
            println!(
                "{} history is ~{} tokens, over the budget of {}. Use /clear to start over.",
                "Context full:".red().bold(),
                used,
                budget
            );
        }
        TurnOutcome::TransportFailed(e) => {
            println!("{} {}", "Model unavailable:".red().bold(), e);
        }
        TurnOutcome::ParseFailed(e) => {
            println!("{} {}", "Could not understand the reply:".red().bold(), e.reason);
            println!("{}", e.raw_snippet.dimmed());
        }
        TurnOutcome::Question { explanation, question } => {
            if !explanation.is_empty() {
                println!("{} {}", "Explanation:".bright_blue().bold(), explanation);
            }
            println!("{} {}", "?".bright_yellow().bold(), question.bright_yellow());
        }
        TurnOutcome::NoCommand { explanation } => {
            if explanation.is_empty() {
                println!("{}", "No command was suggested.".yellow());
            } else {
                println!("{} {}", "Explanation:".bright_blue().bold(), explanation);
            }
        }
        TurnOutcome::Blocked { suggestion, error } => {
            println!("{} {}", "Suggested:".bright_blue().bold(), suggestion.command.bright_cyan());
            println!("{} {}", "Blocked:".red().bold(), error);
        }
        TurnOutcome::Skipped { .. } => {
            println!("{}", "Skipped.".dimmed());
        }
        TurnOutcome::FollowUpDeclined { pre_command } => {
            println!("{} {}", "Not run:".yellow(), pre_command);
        }
        TurnOutcome::FollowUpExhausted { suggestion } => {
            println!(
                "{} the assistant asked for more output ({}) after its follow-up. Try rephrasing the request.",
                "Gave up:".yellow().bold(),
                suggestion.pre_command
            );
        }
        TurnOutcome::Executed {
            command,
            result,
            analysis,
        } => {
            if !result.stdout.is_empty() {
                println!("{}", result.stdout);
            }
            match result.check(&command) {
                Ok(()) => {
                    if !result.stderr.is_empty() {
                        println!("{}", result.stderr.yellow());
                    }
                    println!("{}", format!("✓ {}", command).green());
                }
                // stderr is part of the error text
                Err(e) => println!("{}", format!("✗ {}", e).red()),
            }
            match analysis {
                Some(Analysis::Done(text)) => {
                    println!("\n{}", "Analysis".bright_white().bold());
                    render_markdown(&text);
                }
                Some(Analysis::Failed(e)) => {
                    println!("{} {}", "Analysis failed:".red(), e);
                }
                Some(Analysis::OverBudget { used, budget }) => {
                    println!(
                        "{} output brought history to ~{} of {} tokens. Use /clear first.",
                        "Analysis skipped:".yellow(),
                        used,
                        budget
                    );
                }
                None => {}
            }
        }
        TurnOutcome::ExecutionFailed(e) => {
            println!("{} {}", "Execution failed:".red().bold(), e);
        }
        TurnOutcome::InputFailed(e) => {
            println!("{} {}", "Input error:".red().bold(), e);
        }
        TurnOutcome::Interrupted => {}
    }
}

pub fn render_markdown(text: &str) {
    let skin = MadSkin::default();
    skin.print_text(text);
}
