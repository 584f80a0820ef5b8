pub fn render_schema(channel: &str) -> String {
	let init = include_str!("../../../sql/init.sql");
	let expanded = expand_includes(init);

	expanded.replace("<CHANNEL>", channel)
}

/// Splits a script on `;`, leaving dollar-quoted function bodies intact.
pub fn split_statements(sql: &str) -> Vec<String> {
	let mut statements = Vec::new();
	let mut current = String::new();
	let mut in_dollar_quote = false;
	let mut rest = sql;

	while let Some(c) = rest.chars().next() {
		if rest.starts_with("$$") {
			in_dollar_quote = !in_dollar_quote;

			current.push_str("$$");

			rest = &rest[2..];

			continue;
		}
		if c == ';' && !in_dollar_quote {
			push_statement(&mut statements, &current);
			current.clear();
		} else {
			current.push(c);
		}

		rest = &rest[c.len_utf8()..];
	}

	push_statement(&mut statements, &current);

	statements
}

fn push_statement(statements: &mut Vec<String>, statement: &str) {
	let trimmed = statement.trim();

	if !trimmed.is_empty() {
		statements.push(trimmed.to_string());
	}
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_message_recipients.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_message_recipients.sql")),
				"functions/001_notify_message_recipients.sql" => out.push_str(include_str!(
					"../../../sql/functions/001_notify_message_recipients.sql"
				)),
				"triggers/001_message_recipients_notify.sql" => out.push_str(include_str!(
					"../../../sql/triggers/001_message_recipients_notify.sql"
				)),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_every_include_with_channel() {
		let sql = render_schema("recipients_feed");

		assert!(!sql.contains("\\ir "));
		assert!(!sql.contains("<CHANNEL>"));
		assert!(sql.contains("CREATE TABLE IF NOT EXISTS message_recipients"));
		assert!(sql.contains("'recipients_feed'"));
		assert!(sql.contains("AFTER TRUNCATE ON message_recipients"));
	}

	#[test]
	fn keeps_function_bodies_in_one_statement() {
		let statements = split_statements(&render_schema("recipients_feed"));
		let function = statements
			.iter()
			.find(|statement| statement.starts_with("CREATE OR REPLACE FUNCTION"))
			.expect("Expected the notify function statement.");

		assert!(function.contains("PERFORM pg_notify("));
		assert!(function.contains("RETURN NULL;"));
		assert!(function.ends_with("LANGUAGE plpgsql"));
		assert!(statements.iter().all(|statement| !statement.is_empty()));
	}

	#[test]
	fn splits_plain_statements() {
		let statements = split_statements("SELECT 1; ;\nSELECT 2;");

		assert_eq!(statements, vec!["SELECT 1".to_string(), "SELECT 2".to_string()]);
	}
}
