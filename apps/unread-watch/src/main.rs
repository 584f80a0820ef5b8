use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = unread_watch::Args::parse();

	unread_watch::run(args).await
}
