use std::io::{self, Write};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::info;

use crate::cli::SearchArgs;
use crate::client::AnnotatorApi;
use crate::config::ClientConfig;
use crate::workflow::controller::Controller;
use crate::workflow::stagger::RenderEvent;

pub async fn run(config: &ClientConfig, args: SearchArgs) -> Result<()> {
    let api = AnnotatorApi::new(config).context("failed to build http client")?;

    if args.json {
        let results = api
            .search(&args.topic)
            .await
            .with_context(|| format!("search failed for topic {:?}", args.topic))?;
        let mut payload = Map::new();
        payload.insert(
            "query".to_string(),
            Value::String(results.query.unwrap_or_else(|| args.topic.clone())),
        );
        for (key, documents) in results.panels {
            payload.insert(
                key,
                serde_json::to_value(documents).context("failed to serialize panel documents")?,
            );
        }
        let mut output = io::BufWriter::new(io::stdout().lock());
        serde_json::to_writer_pretty(&mut output, &payload)
            .context("failed to serialize search json output")?;
        writeln!(output)?;
        output.flush()?;
        return Ok(());
    }

    let (mut controller, mut events) = Controller::new(api, config.clone());
    controller.type_topic(&args.topic)?;
    let summary = controller
        .search()
        .await
        .with_context(|| format!("search failed for topic {:?}", args.topic))?;

    while let Some(event) = events.recv().await {
        let finished = matches!(
            event,
            RenderEvent::Done { generation } if generation == summary.generation
        );
        if let Some(text) = controller.render_event(event) {
            let mut output = io::stdout().lock();
            writeln!(output, "{text}")?;
            output.flush()?;
        }
        if finished {
            break;
        }
    }

    info!(query = %summary.query, cards = summary.cards, "search rendered");
    Ok(())
}
