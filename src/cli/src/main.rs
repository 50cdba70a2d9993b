#![deny(
  unsafe_code,
  // reason = "Let's just not do it"
)]
#![deny(
  clippy::unwrap_used,
  clippy::expect_used,
  clippy::panic,
  clippy::unreachable,
  // reason = "We have to handle errors properly"
)]

mod config;
mod process;
mod service;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let config = config::Manager::new().await?;

  let services_config = config.values().await?;
  let filter = tracing_subscriber::EnvFilter::builder()
    .with_default_directive(services_config.log_level.into())
    .parse_lossy(services_config.log_directive.as_deref().unwrap_or_default());
  tracing_subscriber::fmt().with_env_filter(filter).init();

  let services = service::Container::new(services_config);
  let processes = process::Container::new(config, services);

  processes.spawn().await?;
  tokio::signal::ctrl_c().await?;
  processes.cancel().await;

  Ok(())
}
