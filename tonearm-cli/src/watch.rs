use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use tonearm_client::GatewayEvent;

use crate::config::ConfigArgs;

#[derive(Debug, Parser)]
#[command(after_help = EXAMPLES_TEXT)]
pub struct Watch {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[arg(long, short = 'n', help = "Only show events of this node")]
    pub node: Option<String>,

    #[arg(long, help = "Also show periodic stats and player updates")]
    pub verbose: bool,
}

const EXAMPLES_TEXT: &str = r#"
EXAMPLES:
    # Watch every node of the configuration
    tonearm watch -c tonearm.yaml

    # Watch one node including stats and player updates
    tonearm watch -c tonearm.yaml --node queued-1 --verbose

NOTE:
    - Press Ctrl+C to stop watching
"#;

pub async fn handle_watch(watch: Watch) -> Result<()> {
    let client = watch.config.connect().await?;
    let mut events = client.subscribe();

    for node in client.get_nodes(false) {
        println!(
            "{:<16} pool={:<12} available={}",
            node.name(),
            node.pool(),
            node.is_available()
        );
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.next() => {
                let Some(event) = event else { break };
                if watch.node.as_deref().is_some_and(|node| node != event.node()) {
                    continue;
                }
                if let Some(line) = describe(&event, watch.verbose) {
                    println!("{}", line);
                }
            }
        }
    }

    client.close();
    Ok(())
}

fn describe(event: &GatewayEvent, verbose: bool) -> Option<String> {
    let line = match event {
        GatewayEvent::Ready(e) => format!(
            "[{}] ready session={} resumed={}",
            e.node, e.payload.session_id, e.payload.resumed
        ),
        GatewayEvent::Stats(e) if verbose => format!(
            "[{}] stats playing={}/{} cpu={:.2}",
            e.node, e.payload.playing_players, e.payload.players, e.payload.cpu.system_load
        ),
        GatewayEvent::PlayerUpdate(e) if verbose => format!(
            "[{}] guild {} position={}ms connected={}",
            e.node, e.payload.guild_id, e.payload.state.position, e.payload.state.connected
        ),
        GatewayEvent::TrackStart(e) => format!(
            "[{}] guild {} started {} - {}",
            e.node, e.payload.guild_id, e.payload.track.info.author, e.payload.track.info.title
        ),
        GatewayEvent::TrackEnd(e) => format!(
            "[{}] guild {} ended {} ({})",
            e.node, e.payload.guild_id, e.payload.track.info.title, e.payload.reason
        ),
        GatewayEvent::TrackStuck(e) => format!(
            "[{}] guild {} stuck after {}ms",
            e.node, e.payload.guild_id, e.payload.threshold_ms
        ),
        GatewayEvent::TrackException(e) => format!(
            "[{}] guild {} exception: {}",
            e.node,
            e.payload.guild_id,
            e.payload.exception.message.as_deref().unwrap_or("unknown")
        ),
        GatewayEvent::WebSocketClosed(e) => format!(
            "[{}] guild {} voice closed code={} reason={}",
            e.node, e.payload.guild_id, e.payload.code, e.payload.reason
        ),
        GatewayEvent::NodeDisconnected(e) => match (e.payload.code, e.payload.cause) {
            (Some(code), _) => format!("[{}] disconnected code={} {}", e.node, code, e.payload.reason),
            (None, Some(cause)) => format!("[{}] connection failed ({}): {}", e.node, cause, e.payload.reason),
            (None, None) => format!("[{}] disconnected", e.node),
        },
        _ => return None,
    };
    Some(line)
}
