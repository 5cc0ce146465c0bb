use std::io::{self, Write};

use anyhow::{Context, Result};

use crate::cli::RandomArgs;
use crate::client::AnnotatorApi;
use crate::config::ClientConfig;
use crate::workflow::controller::{ContextPreview, Controller, WorkflowError};

pub async fn run(config: &ClientConfig, args: RandomArgs) -> Result<()> {
    let api = AnnotatorApi::new(config).context("failed to build http client")?;
    let (mut controller, _events) = Controller::new(api, config.clone());

    let preview = match controller.random_context(args.kind).await {
        Ok(preview) => preview,
        Err(WorkflowError::MissingImage) => {
            let mut output = io::stdout().lock();
            writeln!(output, "alert: no image available")?;
            return Ok(());
        }
        Err(err) => return Err(err).context("failed to fetch random context"),
    };

    let mut output = io::BufWriter::new(io::stdout().lock());
    write_preview(&mut output, &preview)?;
    output.flush()?;
    Ok(())
}

pub fn write_preview(output: &mut impl Write, preview: &ContextPreview) -> io::Result<()> {
    match preview {
        ContextPreview::Document { title, content } => {
            writeln!(output, "Title: {title}")?;
            writeln!(output, "Content: {content}")
        }
        ContextPreview::Image {
            title,
            width,
            height,
            path,
        } => {
            if let Some(title) = title {
                writeln!(output, "Title: {title}")?;
            }
            writeln!(output, "Image: {width}x{height} {}", path.display())
        }
    }
}
