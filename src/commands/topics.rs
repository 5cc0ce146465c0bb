use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::TopicsArgs;
use crate::client::AnnotatorApi;
use crate::config::ClientConfig;

pub async fn run(config: &ClientConfig, args: TopicsArgs) -> Result<()> {
    let api = AnnotatorApi::new(config).context("failed to build http client")?;
    let topics = api
        .topics(args.set)
        .await
        .with_context(|| format!("failed to fetch {} topics", args.set.as_str()))?;

    info!(set = args.set.as_str(), topics = topics.len(), "topics fetched");

    let mut output = io::BufWriter::new(io::stdout().lock());
    if args.json {
        serde_json::to_writer_pretty(&mut output, &topics)
            .context("failed to serialize topics json output")?;
        writeln!(output)?;
    } else {
        for (idx, topic) in topics.iter().enumerate() {
            writeln!(output, "{:>3}. {topic}", idx + 1)?;
        }
    }
    output.flush()?;
    Ok(())
}
