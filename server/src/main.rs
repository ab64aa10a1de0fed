use clap::Parser;
use log::info;
use server::network::{RelayServer, DEFAULT_POLL_TIMEOUT};
use server::session_manager::{EvictionPolicy, DEFAULT_IDLE_SECS};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (binds all interfaces)
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Seconds of inactivity before a session is evicted
    #[arg(long, default_value_t = DEFAULT_IDLE_SECS, value_parser = clap::value_parser!(i64).range(1..))]
    idle_secs: i64,

    /// Evict after this many relay turns without sending, instead of by
    /// idle time
    #[arg(long)]
    missed_turns: Option<u32>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let policy = match args.missed_turns {
        Some(limit) => EvictionPolicy::MissedTurns(limit),
        None => {
            let idle = chrono::Duration::try_seconds(args.idle_secs)
                .ok_or("--idle-secs is out of range")?;
            EvictionPolicy::IdleFor(idle)
        }
    };

    info!("Starting relay on port {} ({:?})", args.port, policy);

    let mut relay = RelayServer::bind(
        &format!("0.0.0.0:{}", args.port),
        policy,
        DEFAULT_POLL_TIMEOUT,
    )
    .await?;

    tokio::select! {
        result = relay.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down relay");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_threshold_must_be_positive() {
        assert!(Args::try_parse_from(["server", "--idle-secs", "0"]).is_err());
        assert!(Args::try_parse_from(["server", "--idle-secs", "-5"]).is_err());

        let args = Args::try_parse_from(["server", "--idle-secs", "90"]).unwrap();
        assert_eq!(args.idle_secs, 90);
    }
}
