use super::display;
use colored::Colorize;
use driver::BlockingDatabaseDriver;

#[derive(Debug, PartialEq)]
pub enum Command {
	Help,
	Exit,
	Ping,
	Tables,
	/// Show the server address, or switch to a new one
	Server(Option<String>),
}

impl Command {
	/// Parse a dot-command. Names are case-insensitive, so `.PING` works too.
	pub fn parse(parts: &[String]) -> Result<Self, String> {
		let Some(name) = parts.first() else {
			return Err("Empty command".to_string());
		};

		match name.to_ascii_lowercase().as_str() {
			".help" | ".h" | ".?" => Ok(Command::Help),
			".exit" | ".quit" | ".q" => Ok(Command::Exit),
			".ping" => Ok(Command::Ping),
			".tables" => Ok(Command::Tables),
			".server" => Ok(Command::Server(parts.get(1).cloned())),
			_ => Err(format!("Unknown command: {}. Type .help for help.", name)),
		}
	}
}

pub enum CommandResult {
	Continue,
	Exit,
	Error(String),
}

pub struct CommandHandler;

impl CommandHandler {
	pub fn handle(&self, parts: &[String], driver: &mut BlockingDatabaseDriver) -> CommandResult {
		let command = match Command::parse(parts) {
			Ok(command) => command,
			Err(msg) => return CommandResult::Error(msg),
		};

		match command {
			Command::Help => {
				self.show_help();
				CommandResult::Continue
			}
			Command::Exit => CommandResult::Exit,
			Command::Ping => match driver.ping() {
				Ok(elapsed) => {
					display::print_success(&format!("PONG from {} in {:.1?}", driver.server_address(), elapsed));
					CommandResult::Continue
				}
				Err(e) => CommandResult::Error(format!("Ping failed: {}", e)),
			},
			Command::Tables => match driver.list_tables() {
				Ok(tables) => {
					self.show_tables(&tables);
					CommandResult::Continue
				}
				Err(e) => CommandResult::Error(format!("Failed to list tables: {}", e)),
			},
			Command::Server(Some(address)) => {
				display::print_info(&format!("Server address set to: {}", address));
				driver.set_server_address(address);
				CommandResult::Continue
			}
			Command::Server(None) => {
				display::print_info(&format!("Current server: {}", driver.server_address()));
				CommandResult::Continue
			}
		}
	}

	fn show_help(&self) {
		println!("\n{}", "PineDB Shell Commands".bright_cyan().bold());
		println!("{}", "─".repeat(50).bright_black());

		let commands = [
			(".help, .h, .?", "Show this help message"),
			(".exit, .quit, .q", "Leave the shell"),
			(".ping", "Ping the server"),
			(".tables", "List all tables"),
			(".server [address]", "Show or set the server address (host:port)"),
		];
		for (cmd, desc) in commands {
			println!("  {:20} {}", cmd.bright_green(), desc.bright_white());
		}

		println!("\n{}", "Query Input:".bright_yellow());
		println!("  • Queries are JSON objects ending with ';'");
		println!("    {}", r#"{"type": "select", "table": "people", "from": 1, "to": 10};"#.dimmed());
		println!("  • Lines without ';' continue the query, a trailing '\\' is ignored");
		println!("  • Ctrl+C cancels the current input, Ctrl+D exits");
		println!();
	}

	fn show_tables(&self, tables: &[String]) {
		if tables.is_empty() {
			display::print_info("No tables found");
		} else {
			display::print_info(&format!("Found {} table(s):", tables.len()));
			for table in tables {
				println!("  • {}", table.bright_green());
			}
		}
	}
}
