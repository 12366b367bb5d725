use colored::Colorize;
use driver::{DriverError, ExecutionResult};
use std::time::Duration;

pub fn print_welcome(server_address: &str) {
	println!("\n{}", "╔═══════════════════════════════════════╗".bright_cyan());
	println!("{}", "║          PineDB interactive shell     ║".bright_cyan().bold());
	println!("{}", "╚═══════════════════════════════════════╝".bright_cyan());
	println!();
	println!("Server: {}", server_address.bright_cyan());
	println!(
		"Type {} for help, {} to exit",
		".help".bright_green(),
		".exit".bright_green()
	);
	println!();
}

pub fn print_goodbye(query_count: usize, duration: Duration) {
	println!();
	println!("{}", "─".repeat(40).bright_black());
	println!("{}", "Bye bye! :)".bright_cyan());
	println!("   Executed {} queries in {:.1?}", query_count, duration);
	println!();
}

pub fn print_error(msg: &str) {
	println!("{} {}", "✗".bright_red().bold(), msg.bright_red());
}

pub fn print_warning(msg: &str) {
	println!("{} {}", "⚠".bright_yellow(), msg.bright_yellow());
}

pub fn print_info(msg: &str) {
	println!("{} {}", "ℹ".bright_blue(), msg.bright_white());
}

pub fn print_success(msg: &str) {
	println!("{} {}", "✓".bright_green().bold(), msg.bright_green());
}

pub fn print_hint(msg: &str) {
	println!("{} {}", "›".bright_white(), msg.bright_white().dimmed());
}

pub fn print_execution_result(result: &ExecutionResult) {
	println!("{}", result.render());
	println!(
		"  {} {:.3}ms",
		"Time:".bright_black(),
		result.execution_time.as_secs_f64() * 1000.0
	);
}

/// Server-side failures are shown as `<code> <message>`.
pub fn print_query_error(error: &DriverError) {
	match error {
		DriverError::Server { code, message, .. } => {
			print_error(&format!("{:?} {}", code, message));
		}
		DriverError::Client(e) => print_error(&e.to_string()),
	}
	if error.is_busy() {
		print_hint("The server is saturated, try again shortly");
	}
}
