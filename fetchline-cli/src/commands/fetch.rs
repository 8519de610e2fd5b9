//! Fetch command - push URIs through the pipeline and report outcomes.

use crate::error::CliError;
use crate::runner::CliRunner;
use clap::Args;
use fetchline::delivery::RequestListener;
use fetchline::{
    CancelCause, Delivered, ErrorCause, FetchRequest, Outcome, Pipeline, RequestHandle, RequestId,
    RequestLevel, RequestOptions,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct FetchArgs {
    /// Resource URIs (http(s)://, file:// or absolute paths)
    #[arg(required = true)]
    pub uris: Vec<String>,

    /// Submit each URI this many times to exercise coalescing
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub repeat: u32,

    /// Deepest source to use: net, local or memory
    #[arg(long, default_value = "net")]
    pub level: RequestLevel,

    /// Processing fingerprint forwarded to the decoder
    #[arg(long)]
    pub processing: Option<String>,

    /// Bypass the memory cache
    #[arg(long)]
    pub no_memory_cache: bool,

    /// Bypass the persistent cache
    #[arg(long)]
    pub no_disk_cache: bool,

    /// Run each request inline instead of through the lanes
    #[arg(long)]
    pub sync: bool,
}

impl FetchArgs {
    /// Request options described by the flags.
    pub fn request_options(&self) -> RequestOptions {
        let mut options = RequestOptions::default()
            .with_memory_cache(!self.no_memory_cache)
            .with_disk_cache(!self.no_disk_cache)
            .with_sync(self.sync)
            .with_level(self.level);
        if let Some(processing) = &self.processing {
            options = options.with_processing(processing.clone());
        }
        options
    }
}

/// Logs lifecycle callbacks at debug level.
struct LogListener;

impl RequestListener for LogListener {
    fn on_started(&self, id: RequestId) {
        debug!(request = %id, "Request started");
    }

    fn on_progress(&self, id: RequestId, completed: u64, total: Option<u64>) {
        debug!(request = %id, completed, ?total, "Download progress");
    }

    fn on_completed(&self, id: RequestId, delivered: &Delivered) {
        debug!(request = %id, from = %delivered.from, "Request completed");
    }

    fn on_failed(&self, id: RequestId, cause: &ErrorCause) {
        debug!(request = %id, %cause, "Request failed");
    }

    fn on_canceled(&self, id: RequestId, cause: CancelCause) {
        debug!(request = %id, %cause, "Request canceled");
    }
}

/// Run the fetch command.
pub fn run(args: FetchArgs, runner: &CliRunner) -> Result<(), CliError> {
    runner.log_startup("fetch");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    runtime.block_on(async {
        let pipeline = runner.build_pipeline()?;
        let started = Instant::now();

        let outcomes = if args.sync {
            execute_all(&pipeline, &args).await
        } else {
            submit_all(&pipeline, &args).await
        };

        pipeline.shutdown();
        pipeline.join().await;

        let total = outcomes.len();
        let mut failed = 0;
        for (uri, outcome) in &outcomes {
            if !outcome.is_completed() {
                failed += 1;
            }
            println!("{}", describe(uri, outcome));
        }

        let stats = pipeline.stats();
        println!();
        println!(
            "{} requests in {:.2?}: {} downloads ({} coalesced), {} loads ({} coalesced)",
            total,
            started.elapsed(),
            stats.downloads.new_requests,
            stats.downloads.coalesced_requests,
            stats.loads.new_requests,
            stats.loads.coalesced_requests,
        );
        pipeline.log_stats();

        if failed > 0 {
            return Err(CliError::Incomplete { failed, total });
        }
        info!(total, "All requests completed");
        Ok(())
    })
}

async fn submit_all(pipeline: &Pipeline, args: &FetchArgs) -> Vec<(String, Outcome)> {
    let listener = Arc::new(LogListener);
    let options = args.request_options();

    let mut handles: Vec<(String, RequestHandle)> = Vec::new();
    for uri in &args.uris {
        for _ in 0..args.repeat {
            let request = FetchRequest::new(uri.clone())
                .options(options.clone())
                .listener(&listener);
            handles.push((uri.clone(), pipeline.submit(request)));
        }
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (uri, mut handle) in handles {
        outcomes.push((uri, handle.wait().await));
    }
    outcomes
}

async fn execute_all(pipeline: &Pipeline, args: &FetchArgs) -> Vec<(String, Outcome)> {
    let listener = Arc::new(LogListener);
    let options = args.request_options();

    let mut outcomes = Vec::new();
    for uri in &args.uris {
        for _ in 0..args.repeat {
            let request = FetchRequest::new(uri.clone())
                .options(options.clone())
                .listener(&listener);
            outcomes.push((uri.clone(), pipeline.execute(request).await));
        }
    }
    outcomes
}

/// One output line per request.
fn describe(uri: &str, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Completed(delivered) => format!(
            "ok        {} ({} bytes from {})",
            uri,
            delivered.artifact.data().len(),
            delivered.from
        ),
        Outcome::Failed(cause) => format!("failed    {} ({})", uri, cause),
        Outcome::Canceled(cause) => format!("canceled  {} ({})", uri, cause),
    }
}
