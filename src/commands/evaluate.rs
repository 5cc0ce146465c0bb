use std::fs;
use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::EvaluateArgs;
use crate::client::AnnotatorApi;
use crate::config::ClientConfig;
use crate::model::{EvaluationBatch, NdcgResult};
use crate::workflow::view::render_ndcg;

pub async fn run(config: &ClientConfig, args: EvaluateArgs) -> Result<()> {
    let raw = fs::read(&args.batch)
        .with_context(|| format!("failed to read {}", args.batch.display()))?;
    let batch: EvaluationBatch = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", args.batch.display()))?;
    check_panels(config, &batch)?;

    info!(
        path = %args.batch.display(),
        query = %batch.query,
        documents = batch.document_count(),
        "submitting evaluation batch"
    );

    let api = AnnotatorApi::new(config).context("failed to build http client")?;
    let stored = api
        .store_scores(&batch)
        .await
        .context("failed to store scores")?;
    info!(message = stored.message.as_deref().unwrap_or(""), "scores stored");

    let ndcg = api
        .evaluate(&batch)
        .await
        .context("failed to compute ndcg")?;

    let mut output = io::BufWriter::new(io::stdout().lock());
    write_ndcg_table(&mut output, config, &batch.query, &ndcg)?;
    output.flush()?;
    Ok(())
}

fn check_panels(config: &ClientConfig, batch: &EvaluationBatch) -> Result<()> {
    for key in batch.panels.keys() {
        if config.panel_label(key).is_none() {
            bail!("batch panel {key} is not one of the configured model panels");
        }
    }
    for panel in &config.panels {
        if !batch.panels.contains_key(&panel.key) {
            warn!(panel = %panel.key, "batch has no documents for configured panel");
        }
    }
    Ok(())
}

fn write_ndcg_table(
    output: &mut impl Write,
    config: &ClientConfig,
    query: &str,
    ndcg: &NdcgResult,
) -> io::Result<()> {
    writeln!(output, "Query: {query}")?;
    for panel in &config.panels {
        let scores = ndcg.for_panel(&panel.key);
        let rendered = if scores.is_empty() {
            "no score".to_string()
        } else {
            render_ndcg(&scores)
        };
        writeln!(output, "{:<12} {}", panel.label, rendered)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;
    use crate::config::test_config;

    #[test]
    fn ndcg_table_lists_every_configured_panel() {
        let config = test_config("http://127.0.0.1:5000", PathBuf::from("out"));
        let ndcg = NdcgResult::from_value(json!({
            "1": {"model_1_documents": 1.0, "model_4_documents": 0.25},
            "3": {"model_1_documents": 0.5}
        }))
        .expect("ndcg parses");

        let mut buffer = Vec::new();
        write_ndcg_table(&mut buffer, &config, "solar panels", &ndcg).expect("write succeeds");
        let table = String::from_utf8(buffer).expect("utf8 output");
        let lines = table.lines().collect::<Vec<&str>>();
        assert_eq!(lines[0], "Query: solar panels");
        assert_eq!(lines[1], "BM25         NDCG@1=1.0000 NDCG@3=0.5000");
        assert_eq!(lines[2], "Mistral      no score");
        assert_eq!(lines[4], "CLIP         NDCG@1=0.2500");
    }

    #[test]
    fn unknown_batch_panel_is_rejected() {
        let config = test_config("http://127.0.0.1:5000", PathBuf::from("out"));
        let batch: EvaluationBatch = serde_json::from_value(json!({
            "query": "solar panels",
            "BM25_documents": []
        }))
        .expect("batch parses");
        let error = check_panels(&config, &batch).expect_err("named keys are not accepted");
        assert!(error.to_string().contains("BM25_documents"));
    }
}
