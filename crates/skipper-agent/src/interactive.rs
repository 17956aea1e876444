//! Interactive session: the same validate/gate/execute pipeline as
//! batch mode, driven by a synchronous command prompt. Identical inputs
//! produce identical StepResults in both modes.

use anyhow::Result;
use serde_json::json;
use skipper_core::truncate_preview;

use crate::controller::Controller;

const HELP: &str = "commands:
  plan             request a fresh plan for the current goal
  next             ask the oracle for one next step and enqueue it
  step             run one queued step
  run              run queued steps until done or out of budget
  read <path>      read a file as a step
  write <path> <content>
                   write a file as a step
  exec <command>   run a shell command as a step
  retrieve <query> search the workspace index as a step
  search <query>   web search (not recorded as a step)
  fetch <url>      fetch a page as text (not recorded as a step)
  goal <text>      replace the goal
  history          show recorded steps
  help             show this text
  quit             flush the run log and exit";

#[derive(Debug, PartialEq, Eq)]
pub enum SessionControl {
    Continue,
    Quit,
}

pub struct Session<'a> {
    controller: Controller<'a>,
}

impl<'a> Session<'a> {
    pub fn new(controller: Controller<'a>) -> Self {
        Self { controller }
    }

    /// Blocking prompt loop over stdin. Ends on `quit` or EOF.
    pub fn run(&mut self) -> Result<()> {
        use std::io::{BufRead, Write};
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        println!("goal: {}", self.controller.goal());
        println!("type 'help' for commands");
        loop {
            print!("skipper> ");
            stdout.flush()?;
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }
            if self.handle_line(line.trim()) == SessionControl::Quit {
                break;
            }
        }
        self.controller.flush_log();
        Ok(())
    }

    pub fn handle_line(&mut self, line: &str) -> SessionControl {
        let (command, rest) = split_command(line);
        match command {
            "" => {}
            "plan" => match self.controller.seed_plan() {
                Ok(count) => println!("queued {count} step(s)"),
                Err(err) => println!("plan failed: {err}"),
            },
            "next" => {
                if self.controller.request_next() {
                    println!("queued 1 step ({} pending)", self.controller.queue_len());
                } else {
                    println!("oracle has nothing more to propose");
                }
            }
            "step" => {
                if !self.controller.run_one() {
                    println!("queue is empty");
                }
            }
            "run" => {
                let outcome = self.controller.drain();
                println!("run finished: {outcome:?}");
            }
            "read" => self.submit_step(json!({"action": "read", "target": rest})),
            "exec" => self.submit_step(json!({"action": "exec", "target": rest})),
            "retrieve" => self.submit_step(json!({"action": "retrieve", "target": rest})),
            "write" => {
                let (path, content) = split_command(rest);
                self.submit_step(json!({"action": "write", "target": path, "content": content}));
            }
            "search" => self.web_search(rest),
            "fetch" => self.fetch_page(rest),
            "goal" => {
                if rest.is_empty() {
                    println!("goal: {}", self.controller.goal());
                } else {
                    self.controller.set_goal(rest);
                    println!("goal updated");
                }
            }
            "history" => self.print_history(),
            "help" => println!("{HELP}"),
            "quit" | "exit" => return SessionControl::Quit,
            other => println!("unknown command '{other}' (try 'help')"),
        }
        SessionControl::Continue
    }

    pub fn controller(&self) -> &Controller<'a> {
        &self.controller
    }

    fn submit_step(&mut self, value: serde_json::Value) {
        self.controller.submit(value);
    }

    fn web_search(&self, query: &str) {
        if query.is_empty() {
            println!("usage: search <query>");
            return;
        }
        match skipper_tools::web::web_search(query, 5) {
            Ok(results) if results.is_empty() => println!("no results"),
            Ok(results) => {
                for result in results {
                    println!("{}  {}", result.title, result.url);
                }
            }
            Err(err) => println!("search failed: {err}"),
        }
    }

    fn fetch_page(&self, url: &str) {
        if url.is_empty() {
            println!("usage: fetch <url>");
            return;
        }
        match skipper_tools::web::fetch_page(url, skipper_core::PREVIEW_MAX_CHARS) {
            Ok(text) => println!("{text}"),
            Err(err) => println!("fetch failed: {err}"),
        }
    }

    fn print_history(&self) {
        if self.controller.history().is_empty() {
            println!("no steps recorded yet");
            return;
        }
        for (i, entry) in self.controller.history().iter().enumerate() {
            let action = entry
                .step
                .get("action")
                .and_then(|v| v.as_str())
                .unwrap_or("?");
            let target = entry
                .step
                .get("target")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            println!(
                "{}. {} {} -> {}",
                i + 1,
                action,
                truncate_preview(target, 80),
                entry.result.label()
            );
        }
    }
}

fn split_command(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    }
}
