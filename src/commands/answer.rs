use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::{AnswerArgs, AnswerParamArgs};
use crate::client::AnnotatorApi;
use crate::config::ClientConfig;
use crate::workflow::answer::{AnswerParam, AnswerView, run_pipeline, write_comparison_page};
use crate::workflow::pool::seeded_rng;

pub async fn run(config: &ClientConfig, args: AnswerArgs) -> Result<()> {
    let param = resolve_param(&args.param)?;
    let api = AnnotatorApi::new(config).context("failed to build http client")?;

    let query = match api.retrieve_results().await {
        Ok(results) => results.query.unwrap_or_default(),
        Err(err) => {
            warn!(error = %err, "could not load the current query");
            String::new()
        }
    };

    let mut rng = seeded_rng(args.seed);
    let outcome = run_pipeline(&api, param, &mut rng).await;
    let page = write_comparison_page(&config.output_dir, &query, &outcome)?;
    info!(path = %page.display(), param = %param, "comparison page written");

    let mut output = io::BufWriter::new(io::stdout().lock());
    if let Some(message) = &outcome.prepared {
        writeln!(output, "{message}")?;
    }
    writeln!(output, "{}", outcome.view.render_text())?;
    if let AnswerView::Blind(pair) = &outcome.view {
        writeln!(
            output,
            "Placement: left={} right={}",
            pair.left.name(),
            pair.right.name()
        )?;
    }
    writeln!(output, "Page: {}", page.display())?;
    output.flush()?;
    Ok(())
}

fn resolve_param(args: &AnswerParamArgs) -> Result<AnswerParam> {
    let param = match (&args.top_n, &args.ndcg) {
        (Some(raw), _) => AnswerParam::top_n(raw)?,
        (None, Some(raw)) => AnswerParam::ndcg(raw)?,
        (None, None) => anyhow::bail!("either --top-n or --ndcg is required"),
    };
    Ok(param)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_param_reports_validation_feedback() {
        let args = AnswerParamArgs {
            top_n: None,
            ndcg: Some("5".to_string()),
        };
        let error = resolve_param(&args).expect_err("ndcg cutoff 5 is out of range");
        assert_eq!(error.to_string(), "ndcg must be between 1 and 3, got 5");

        let args = AnswerParamArgs {
            top_n: Some("4".to_string()),
            ndcg: None,
        };
        assert_eq!(
            resolve_param(&args).expect("valid top-n"),
            AnswerParam::TopN(4)
        );
    }
}
