use clap::Parser;
use fb_trace_bridge::config::{connect_to_db, LaunchConfig};
use fb_trace_bridge::persister::PgSlowLog;
use fb_trace_bridge::pipeline::SlowQueryPipeline;
use fb_trace_bridge::supervisor::{Supervisor, TraceCommand};
use std::time::Duration;
use tokio::task::spawn_local;
use tracing::{error, info, instrument};
use tracing_config_helper::LogOutput;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let current_thread_runner = tokio::task::LocalSet::new();
    current_thread_runner
        .run_until(async {
            // load env vars so clap can use it when parsing a config
            println!("Loading env vars");
            dotenv::dotenv().ok();
            let config = LaunchConfig::parse();
            tracing_config_helper::setup_console_logging_or_panic(if config.log_json {
                LogOutput::Json
            } else {
                LogOutput::Compact
            });
            let join_handle = match start_bridge(config).await {
                Ok(join_handle) => join_handle,
                Err(e) => {
                    error!("Failed to start trace bridge: {e}");
                    std::process::exit(1);
                }
            };
            join_handle
                .await
                .expect("trace supervisor shouldn't ever return");
        })
        .await
}

#[instrument(level = "error", skip_all)]
async fn start_bridge(
    config: LaunchConfig,
) -> Result<tokio::task::JoinHandle<()>, Box<dyn std::error::Error>> {
    info!("Using config: {:#?}", config);
    let con = connect_to_db(&config.db)?;
    let insert_timeout = config.db.insert_timeout();
    let pipeline = SlowQueryPipeline::new(
        config.trace_format,
        config.statement_capture,
        PgSlowLog::new(con, insert_timeout),
    );
    let mut supervisor = Supervisor::new(
        TraceCommand::fbtracemgr(&config.trace),
        Duration::from_secs(config.restart_delay_secs),
        config.stderr_banner,
        pipeline,
    );
    Ok(spawn_local(async move {
        supervisor.run_forever().await;
    }))
}

