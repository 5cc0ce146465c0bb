use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::cli::AnnotateArgs;
use crate::client::AnnotatorApi;
use crate::config::ClientConfig;
use crate::workflow::pool::{AnnotationPool, PoolError, seeded_rng};
use crate::util::{condense_whitespace, truncate_chars};
use crate::workflow::view::{DocumentCard, JudgmentField};

const PREVIEW_CHARS: usize = 200;

pub async fn run(config: &ClientConfig, args: AnnotateArgs) -> Result<()> {
    let api = AnnotatorApi::new(config).context("failed to build http client")?;
    let results = api
        .retrieve_results()
        .await
        .context("failed to load the last search results")?;

    let mut rng = seeded_rng(args.seed);
    let mut pool = AnnotationPool::from_results(results, &mut rng);
    info!(query = %pool.query, documents = pool.cards.len(), "annotation pool ready");

    if args.auto_fill {
        pool.auto_fill(&mut rng);
    } else {
        judge_interactively(&mut pool).await?;
    }

    let submission = match pool.submission(&args.annotator_name, args.annotator_url.as_deref()) {
        Ok(submission) => submission,
        Err(err) => {
            warn!(error = %err, "annotations not saved");
            bail!("annotations not saved: {err}");
        }
    };

    let response = api
        .save_annotations(&submission)
        .await
        .context("failed to save annotations")?;
    info!(
        annotator = %submission.annotator_name,
        annotations = submission.annotations.len(),
        "annotations saved"
    );

    let mut output = io::stdout().lock();
    writeln!(
        output,
        "{}",
        response
            .message
            .unwrap_or_else(|| "Annotations saved".to_string())
    )?;
    Ok(())
}

async fn judge_interactively(pool: &mut AnnotationPool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let total = pool.cards.len();

    for idx in 0..total {
        write_card(idx, total, &pool.cards[idx])?;
        loop {
            prompt("relevance completeness (0-3 0-3)> ")?;
            let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
                return Ok(());
            };
            match apply_line(pool, idx, &line) {
                Ok(()) => break,
                Err(err) => {
                    let mut output = io::stdout().lock();
                    writeln!(output, "{err}")?;
                }
            }
        }
    }
    Ok(())
}

fn apply_line(pool: &mut AnnotationPool, idx: usize, line: &str) -> Result<(), PoolError> {
    let mut parts = line.split_whitespace();
    let relevance = parts.next().unwrap_or("");
    let completeness = parts.next().unwrap_or("");
    pool.set_grade(idx, JudgmentField::Relevance, relevance)?;
    pool.set_grade(idx, JudgmentField::Completeness, completeness)?;
    Ok(())
}

fn write_card(idx: usize, total: usize, card: &DocumentCard) -> io::Result<()> {
    let mut output = io::stdout().lock();
    writeln!(output, "[{}/{}] {}", idx + 1, total, card.document.title)?;
    writeln!(
        output,
        "    {}",
        truncate_chars(&condense_whitespace(&card.document.content), PREVIEW_CHARS)
    )?;
    output.flush()
}

fn prompt(text: &str) -> io::Result<()> {
    let mut output = io::stdout().lock();
    write!(output, "{text}")?;
    output.flush()
}
