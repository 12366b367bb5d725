use rustyline::history::DefaultHistory;
use rustyline::{Editor, Result};
use std::path::PathBuf;

/// Line history kept in `.pine_history` under the home directory, or the
/// working directory when no home is known.
pub struct HistoryManager {
	path: PathBuf,
}

impl HistoryManager {
	pub fn new() -> Self {
		let base = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
		Self {
			path: base.join(".pine_history"),
		}
	}

	pub fn load(&self, editor: &mut Editor<(), DefaultHistory>) {
		// No history yet on first run
		let _ = editor.load_history(&self.path);
	}

	pub fn save(&self, editor: &mut Editor<(), DefaultHistory>) -> Result<()> {
		editor.save_history(&self.path)
	}
}
