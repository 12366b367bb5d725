use colored::Colorize;

pub fn generate_prompt(pending: bool, query_count: usize) -> String {
	if pending {
		"    ... ".bright_black().to_string()
	} else {
		format!(
			"{}{}> ",
			"pine".bright_green().bold(),
			format!("[{}]", query_count).bright_black()
		)
	}
}
