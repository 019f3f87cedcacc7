use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "watchgate", version, about = "Alert aggregation and notification dispatch engine")]
pub struct Args {
    /// Evaluate every enabled rule once and exit, instead of starting the HTTP server.
    #[arg(long, default_value_t = false)]
    pub run_once: bool,
}
