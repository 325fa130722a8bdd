use anyhow::Result;
use clap::Parser;
use std::collections::BTreeMap;
use std::sync::Arc;
use tonearm_client::{Node, PENALTY_BLOCK, PENALTY_SOFT_BLOCK};

use crate::config::ConfigArgs;

#[derive(Debug, Parser)]
#[command(after_help = EXAMPLES_TEXT)]
pub struct Rankings {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[arg(long, short = 'p', help = "Only rank the nodes of this pool")]
    pub pool: Option<String>,

    #[arg(long, short = 'r', help = "Voice region hint used for the region penalty")]
    pub region: Option<String>,
}

const EXAMPLES_TEXT: &str = r#"
EXAMPLES:
    # Rank every pool
    tonearm rankings -c tonearm.yaml

    # Rank the queued pool for a guild in europe
    tonearm rankings -c tonearm.yaml --pool queued --region europe
"#;

pub async fn handle_rankings(rankings: Rankings) -> Result<()> {
    let client = rankings.config.connect().await?;

    let mut pools: BTreeMap<String, Vec<Arc<Node>>> = BTreeMap::new();
    for node in client.get_nodes(false) {
        pools
            .entry(node.pool().as_str().to_string())
            .or_default()
            .push(node);
    }

    for (pool, nodes) in pools {
        if rankings.pool.as_deref().is_some_and(|wanted| wanted != pool) {
            continue;
        }
        println!("pool {}", pool);
        for (name, total) in client
            .load_balancer()
            .rankings(&nodes, rankings.region.as_deref())
        {
            println!("  {:<16} {}", name, format_penalty(total));
        }
    }

    client.close();
    Ok(())
}

fn format_penalty(total: i64) -> String {
    if total >= PENALTY_BLOCK {
        "blocked".to_string()
    } else if total > PENALTY_SOFT_BLOCK / 2 {
        // base penalties may be negative, so the soft block is not a lower bound
        format!("{} (region mismatch)", total - PENALTY_SOFT_BLOCK)
    } else {
        total.to_string()
    }
}
