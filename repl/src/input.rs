use pine_core::Query;

/// What a line of input amounted to.
#[derive(Debug, PartialEq)]
pub enum Line {
	/// A dot-command, split on whitespace.
	Command(Vec<String>),
	/// A finished statement with its `;` removed.
	Statement(String),
	/// More lines are needed.
	Pending,
}

/// Collects statement text across lines until one ends in `;`.
#[derive(Debug, Default)]
pub struct InputBuffer {
	text: String,
}

impl InputBuffer {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_pending(&self) -> bool {
		!self.text.is_empty()
	}

	pub fn clear(&mut self) {
		self.text.clear();
	}

	pub fn push_line(&mut self, line: &str) -> Line {
		let trimmed = line.trim();

		// Commands are only recognised at the start of a statement
		if !self.is_pending() && trimmed.starts_with('.') {
			return Line::Command(trimmed.split_whitespace().map(str::to_owned).collect());
		}

		// A trailing backslash is an explicit continuation marker
		let trimmed = trimmed.strip_suffix('\\').unwrap_or(trimmed).trim_end();
		if trimmed.is_empty() {
			return if self.is_pending() { Line::Pending } else { Line::Statement(String::new()) };
		}

		if self.is_pending() {
			self.text.push('\n');
		}
		self.text.push_str(trimmed);

		match self.text.strip_suffix(';') {
			Some(statement) => {
				let statement = statement.trim().to_string();
				self.text.clear();
				Line::Statement(statement)
			}
			None => Line::Pending,
		}
	}
}

/// Statements are JSON queries, e.g. `{"type": "list_tables"};`
pub fn parse_statement(statement: &str) -> Result<Query, String> {
	serde_json::from_str(statement).map_err(|e| format!("Invalid query: {}", e))
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn test_single_line_statement() {
		let mut input = InputBuffer::new();
		assert_eq!(
			input.push_line(r#"{"type": "count", "table": "t"};"#),
			Line::Statement(r#"{"type": "count", "table": "t"}"#.to_string())
		);
		assert!(!input.is_pending());
	}

	#[test]
	fn test_statement_spans_lines() {
		let mut input = InputBuffer::new();
		assert_eq!(input.push_line(r#"{"type": "delete",\"#), Line::Pending);
		assert_eq!(input.push_line(""), Line::Pending);
		assert_eq!(input.push_line(r#" "table": "t", "row_id": 3}  ;"#), Line::Statement(
			"{\"type\": \"delete\",\n\"table\": \"t\", \"row_id\": 3}".to_string()
		));

		let query = parse_statement(r#"{"type": "delete", "table": "t", "row_id": 3}"#).unwrap();
		assert_eq!(query, Query::Delete { table: "t".into(), row_id: 3 });
	}

	#[test]
	fn test_commands_only_at_statement_start() {
		let mut input = InputBuffer::new();
		assert_eq!(
			input.push_line("  .server 127.0.0.1:7000 "),
			Line::Command(vec![".server".to_string(), "127.0.0.1:7000".to_string()])
		);

		assert_eq!(input.push_line(r#"{"type":"#), Line::Pending);
		assert_eq!(input.push_line(r#"".ping"}"#), Line::Pending);
		input.clear();
		assert!(!input.is_pending());
	}

	#[test]
	fn test_blank_line_is_empty_statement() {
		let mut input = InputBuffer::new();
		assert_eq!(input.push_line("   "), Line::Statement(String::new()));
	}

	#[test]
	fn test_parse_statement_rejects_unknown_type() {
		assert!(parse_statement(r#"{"type": "vacuum"}"#).is_err());
		assert_eq!(parse_statement(r#"{"type": "list_tables"}"#), Ok(Query::ListTables));
	}
}
