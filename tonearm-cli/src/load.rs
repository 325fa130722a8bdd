use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::Arc;
use tonearm_client::Node;
use tonearm_core::{LoadResult, Pool, Track};

use crate::config::ConfigArgs;

#[derive(Debug, Parser)]
#[command(after_help = EXAMPLES_TEXT)]
pub struct Load {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[arg(long, short = 'p', default_value = "queued", help = "Pool to load from. Default: queued")]
    pub pool: String,

    #[arg(long, short = 'r', help = "Voice region hint used to pick the node")]
    pub region: Option<String>,

    #[arg(help = "Identifier to resolve, e.g. a URL or ytsearch:query")]
    pub identifier: String,
}

const EXAMPLES_TEXT: &str = r#"
EXAMPLES:
    # Search on the best queued node
    tonearm load -c tonearm.yaml "ytsearch:never gonna give you up"

    # Resolve a stream URL on the continuous pool
    tonearm load -c tonearm.yaml --pool continuous https://radio.example.org/live
"#;

pub async fn handle_load(load: Load) -> Result<()> {
    let client = load.config.connect().await?;
    let pool = Pool::new(load.pool);

    let candidates: Vec<Arc<Node>> = client
        .get_nodes(true)
        .into_iter()
        .filter(|node| node.pool() == &pool)
        .collect();
    let node = client
        .load_balancer()
        .select_node(&candidates, load.region.as_deref())
        .ok_or_else(|| anyhow!("no available node in pool {}", pool))?;

    println!("loading on {}", node.name());
    let result = node.load_item(&load.identifier).await?;
    match &result {
        LoadResult::Empty => println!("nothing found"),
        LoadResult::Error(e) => println!(
            "load failed ({:?}): {}",
            e.severity,
            e.message.as_deref().unwrap_or(&e.cause)
        ),
        LoadResult::Playlist(playlist) => {
            println!("playlist {} ({} tracks)", playlist.info.name, playlist.tracks.len());
            print_tracks(&result.tracks());
        }
        LoadResult::Track(_) | LoadResult::Search(_) => print_tracks(&result.tracks()),
    }

    client.close();
    Ok(())
}

fn print_tracks(tracks: &[&Track]) {
    for (index, track) in tracks.iter().enumerate() {
        println!(
            "{:>3}. {} - {} [{}]",
            index + 1,
            track.info.author,
            track.info.title,
            format_length(track.info.length, track.info.is_stream)
        );
    }
}

fn format_length(length_ms: u64, is_stream: bool) -> String {
    if is_stream {
        return "live".to_string();
    }
    let seconds = length_ms / 1000;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
