use clap::Parser;
use client::clock::{self, Clock, SystemClock};
use client::network::ChatClient;
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay host to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// Relay port
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Name shown to the other participants
    #[arg(short, long)]
    username: String,

    /// Time server used to correct outbound timestamps
    #[arg(long, default_value = "pool.ntp.org:123")]
    ntp_server: String,

    /// Skip time synchronization and trust the local clock
    #[arg(long)]
    local_clock: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let clock: Box<dyn Clock> = if args.local_clock {
        Box::new(SystemClock)
    } else {
        clock::synchronized_clock(&args.ntp_server).await
    };

    let addr = format!("{}:{}", args.server, args.port);
    info!("Connecting to relay at {}", addr);

    let mut client = ChatClient::new(&addr, &args.username, clock).await?;
    client.run().await?;

    Ok(())
}
