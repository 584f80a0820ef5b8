//! Command-line pieces shared by the unread binaries.

use std::path::PathBuf;

use clap::{
	Args,
	builder::{
		Styles,
		styling::{AnsiColor, Effects},
	},
};

use unread_config::Config;

/// `<crate version>-<git sha>-<target triple>`, as printed by `--version`.
pub const VERSION: &str = concat!(
	env!("CARGO_PKG_VERSION"),
	"-",
	env!("VERGEN_GIT_SHA"),
	"-",
	env!("VERGEN_CARGO_TARGET_TRIPLE"),
);

/// The `--config` flag every unread binary takes. Flatten it into the binary's own arguments.
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
	/// Path to the unread TOML config.
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}
impl ConfigArgs {
	/// Loads, normalizes, and validates the config file.
	pub fn load(&self) -> unread_config::Result<Config> {
		unread_config::load(&self.config)
	}
}

pub fn styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Blue.on_default() | Effects::BOLD | Effects::UNDERLINE)
		.usage(AnsiColor::Blue.on_default() | Effects::BOLD)
		.literal(AnsiColor::Magenta.on_default())
		.placeholder(AnsiColor::White.on_default() | Effects::DIMMED)
		.error(AnsiColor::Red.on_default() | Effects::BOLD)
		.invalid(AnsiColor::Yellow.on_default() | Effects::BOLD)
}
