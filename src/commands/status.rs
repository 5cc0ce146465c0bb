use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::client::AnnotatorApi;
use crate::config::ClientConfig;
use crate::workflow::answer::CandidateAnswer;

#[derive(Debug, Default, Serialize)]
struct StatusReport {
    server_url: String,
    stored_score_keys: Option<Vec<String>>,
    last_query: Option<String>,
    result_counts: Option<Vec<PanelCount>>,
    answers: Option<Vec<AnswerStatus>>,
    top_documents: Option<usize>,
}

#[derive(Debug, Serialize)]
struct PanelCount {
    key: String,
    label: String,
    documents: usize,
}

#[derive(Debug, Serialize)]
struct AnswerStatus {
    candidate: String,
    ready: bool,
}

pub async fn run(config: &ClientConfig, args: StatusArgs) -> Result<()> {
    let api = AnnotatorApi::new(config).context("failed to build http client")?;
    info!(server_url = %config.server_url, "status requested");
    let report = collect_report(&api, config).await;

    let mut output = io::BufWriter::new(io::stdout().lock());
    if args.json {
        serde_json::to_writer_pretty(&mut output, &report)
            .context("failed to serialize status json output")?;
        writeln!(output)?;
    } else {
        write_text_report(&mut output, &report)?;
    }
    output.flush()?;
    Ok(())
}

async fn collect_report(api: &AnnotatorApi, config: &ClientConfig) -> StatusReport {
    let mut report = StatusReport {
        server_url: config.server_url.clone(),
        ..StatusReport::default()
    };

    match api.retrieve_scores().await {
        Ok(scores) => {
            let keys = scores.keys().cloned().collect::<Vec<String>>();
            info!(keys = keys.len(), "loaded stored scores");
            report.stored_score_keys = Some(keys);
        }
        Err(err) => warn!(error = %err, "stored scores unavailable"),
    }

    match api.retrieve_results().await {
        Ok(results) => {
            let counts = config
                .panels
                .iter()
                .map(|panel| PanelCount {
                    key: panel.key.clone(),
                    label: panel.label.clone(),
                    documents: results.panels.get(&panel.key).map_or(0, Vec::len),
                })
                .collect::<Vec<PanelCount>>();
            info!(
                query = %results.query.as_deref().unwrap_or(""),
                panels = counts.len(),
                "loaded last search results"
            );
            report.last_query = results.query;
            report.result_counts = Some(counts);
        }
        Err(err) => warn!(error = %err, "last search results unavailable"),
    }

    match api.retrieve_llm_answers().await {
        Ok(answers) => {
            let statuses = answers
                .iter()
                .map(|(key, completion)| {
                    let candidate = CandidateAnswer::from_completion(key, completion);
                    AnswerStatus {
                        candidate: candidate.name().to_string(),
                        ready: matches!(candidate, CandidateAnswer::Ready { .. }),
                    }
                })
                .collect::<Vec<AnswerStatus>>();
            info!(candidates = statuses.len(), "loaded generated answers");
            report.answers = Some(statuses);
        }
        Err(err) => warn!(error = %err, "generated answers unavailable"),
    }

    match api.retrieve_top_documents().await {
        Ok(documents) => {
            info!(documents = documents.len(), "loaded answer context documents");
            report.top_documents = Some(documents.len());
        }
        Err(err) => warn!(error = %err, "answer context documents unavailable"),
    }

    report
}

fn write_text_report(output: &mut impl Write, report: &StatusReport) -> io::Result<()> {
    writeln!(output, "Server: {}", report.server_url)?;
    match &report.stored_score_keys {
        Some(keys) if !keys.is_empty() => writeln!(output, "Stored scores: {}", keys.join(", "))?,
        Some(_) => writeln!(output, "Stored scores: none")?,
        None => writeln!(output, "Stored scores: unavailable")?,
    }
    writeln!(
        output,
        "Last query: {}",
        report.last_query.as_deref().unwrap_or("unavailable")
    )?;
    if let Some(counts) = &report.result_counts {
        for count in counts {
            writeln!(
                output,
                "  {:<12} {:<20} {} documents",
                count.label, count.key, count.documents
            )?;
        }
    }
    match &report.answers {
        Some(answers) if !answers.is_empty() => {
            for answer in answers {
                let state = if answer.ready { "ready" } else { "failed" };
                writeln!(output, "Answer {}: {state}", answer.candidate)?;
            }
        }
        Some(_) => writeln!(output, "Answers: none")?,
        None => writeln!(output, "Answers: unavailable")?,
    }
    match report.top_documents {
        Some(count) => writeln!(output, "Answer context documents: {count}"),
        None => writeln!(output, "Answer context documents: unavailable"),
    }
}
