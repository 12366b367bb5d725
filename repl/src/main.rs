mod commands;
mod display;
mod history;
mod input;
mod prompt;

use commands::{CommandHandler, CommandResult};
use driver::{BlockingDatabaseDriver, DatabaseDriver};
use input::{InputBuffer, Line};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor, Result};
use std::io;
use std::time::Instant;

pub struct Repl {
	editor: Editor<(), DefaultHistory>,
	command_handler: CommandHandler,
	driver: BlockingDatabaseDriver,
	history: history::HistoryManager,
	input: InputBuffer,
	query_count: usize,
	start_time: Instant,
}

impl Repl {
	pub fn new(server_address: Option<String>) -> Result<Self> {
		let config = Config::builder()
			.history_ignore_space(true)
			.edit_mode(rustyline::EditMode::Emacs)
			.build();
		let mut editor = Editor::with_config(config)?;

		let history = history::HistoryManager::new();
		history.load(&mut editor);

		let driver = match server_address {
			Some(address) => DatabaseDriver::with_server(address),
			None => DatabaseDriver::new(),
		};
		let driver = BlockingDatabaseDriver::new(driver).map_err(|e| ReadlineError::Io(io::Error::other(e)))?;

		Ok(Self {
			editor,
			command_handler: CommandHandler,
			driver,
			history,
			input: InputBuffer::new(),
			query_count: 0,
			start_time: Instant::now(),
		})
	}

	pub fn run(&mut self) -> Result<()> {
		display::print_welcome(self.driver.server_address());

		loop {
			let prompt_str = prompt::generate_prompt(self.input.is_pending(), self.query_count);

			match self.editor.readline(&prompt_str) {
				Ok(line) => {
					if !self.handle_line(line)? {
						break;
					}
				}
				Err(ReadlineError::Interrupted) => {
					self.handle_interrupt();
				}
				Err(ReadlineError::Eof) => {
					println!();
					display::print_goodbye(self.query_count, self.start_time.elapsed());
					break;
				}
				Err(err) => {
					display::print_error(&format!("Readline error: {:?}", err));
					break;
				}
			}
		}

		self.history.save(&mut self.editor)
	}

	/// Returns false once the user asked to leave.
	fn handle_line(&mut self, line: String) -> Result<bool> {
		if !line.trim().is_empty() {
			self.editor.add_history_entry(&line)?;
		}

		match self.input.push_line(&line) {
			Line::Pending => Ok(true),
			Line::Statement(statement) => {
				if !statement.is_empty() {
					self.execute_statement(&statement);
				}
				Ok(true)
			}
			Line::Command(parts) => match self.command_handler.handle(&parts, &mut self.driver) {
				CommandResult::Continue => Ok(true),
				CommandResult::Exit => {
					display::print_goodbye(self.query_count, self.start_time.elapsed());
					Ok(false)
				}
				CommandResult::Error(msg) => {
					display::print_error(&msg);
					Ok(true)
				}
			},
		}
	}

	fn execute_statement(&mut self, statement: &str) {
		let query = match input::parse_statement(statement) {
			Ok(query) => query,
			Err(msg) => {
				display::print_error(&msg);
				return;
			}
		};

		self.query_count += 1;
		match self.driver.execute(&query) {
			Ok(result) => display::print_execution_result(&result),
			Err(e) => display::print_query_error(&e),
		}
	}

	fn handle_interrupt(&mut self) {
		if self.input.is_pending() {
			display::print_warning("Cancelled multiline input");
			self.input.clear();
		} else {
			display::print_hint("Use .exit or Ctrl+D to quit");
		}
	}
}

fn main() -> Result<()> {
	// pine [host:port]
	let server_address = std::env::args().nth(1);
	let mut repl = Repl::new(server_address)?;
	repl.run()
}
