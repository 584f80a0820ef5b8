pub mod watcher;

use std::{sync::Arc, time::Duration};

use clap::Parser;
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

use unread_cli::ConfigArgs;
use unread_service::{PgChangeFeed, PgCountSource, UnreadCountService};
use unread_storage::db::Db;

#[derive(Debug, Parser)]
#[command(
	version = unread_cli::VERSION,
	rename_all = "kebab",
	styles = unread_cli::styles(),
)]
pub struct Args {
	#[command(flatten)]
	pub config: ConfigArgs,
	/// Fetch the count once, print it, and exit.
	#[arg(long)]
	pub once: bool,
	/// How often the badge is re-read from the cache.
	#[arg(long, value_name = "MS", default_value_t = 250)]
	pub render_interval_ms: u64,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = args.config.load()?;

	init_tracing(&config);

	let db = Db::connect(&config.storage.postgres).await?;

	db.ensure_schema(&config.feed.channel).await?;

	let source = Arc::new(PgCountSource::new(db.clone(), config.viewer.recipient_id));
	let service = UnreadCountService::new(source, config.feed.relation.clone(), Handle::current());

	if args.once {
		let count = service.refresh().await?;

		println!("{count}");

		service.dispose();

		return Ok(());
	}

	let feed = PgChangeFeed::new(db, &config.feed);
	let interval = Duration::from_millis(args.render_interval_ms.max(1));

	watcher::watch(&service, &feed, interval).await;

	Ok(())
}

fn init_tracing(config: &unread_config::Config) {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();
}
