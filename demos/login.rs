//! Signs in through the browser, then fetches the signed-in profile through the request pipeline.
//!
//! Reads the same `AZURE_*`/`GRAPH_*` environment as embedders; set `GRAPH_DEBUG=1` for verbose
//! logs.

// crates.io
use color_eyre::Result;
use tracing_subscriber::EnvFilter;
// self
use graph_broker::{
	config::Settings, context::GraphContext, envelope, flows::DEFAULT_LOGIN_TIMEOUT,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let settings = Settings::from_env()?;
	let default_level = if settings.debug { "graph_broker=debug" } else { "graph_broker=info" };

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
		)
		.with_writer(std::io::stderr)
		.init();

	let ctx = GraphContext::from_settings(settings)?;

	println!("{}", ctx.handle_status().await);

	let login = ctx.handle_login(DEFAULT_LOGIN_TIMEOUT).await;

	println!("{login}");

	if !login.is_success() {
		return Ok(());
	}

	println!("{}", envelope::guarded(ctx.client.get("me")).await);

	Ok(())
}
