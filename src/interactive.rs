//! Interactive question loop.
//!
//! Reads questions line by line until `quit` (any case) or end of input.
//! A failed question prints an error and the loop continues; the session
//! only ends when the user leaves.

use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{ModelInvocationError, QueryError};
use crate::pipeline::{Answer, QueryPipeline};

const QUESTION_PROMPT: &str = "Enter your question (or 'quit' to exit): ";
const SOURCES_PROMPT: &str = "Show retrieved documents? (y/N): ";

/// Run the loop on `input`/`output`. Returns when the user quits or input ends.
pub async fn run_interactive<R, W>(pipeline: &QueryPipeline, mut input: R, output: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    loop {
        write!(output, "\n{}", QUESTION_PROMPT)?;
        output.flush()?;

        let Some(line) = read_line(&mut input).await? else {
            writeln!(output)?;
            break;
        };
        let question = line.trim();
        if question.eq_ignore_ascii_case("quit") {
            break;
        }
        if question.is_empty() {
            continue;
        }

        match pipeline.answer(question).await {
            Ok(answer) => {
                writeln!(output, "\nAnswer: {}", answer.text)?;

                write!(output, "\n{}", SOURCES_PROMPT)?;
                output.flush()?;
                let show = read_line(&mut input)
                    .await?
                    .map(|l| matches!(l.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
                    .unwrap_or(false);
                if show {
                    write_sources(output, &answer)?;
                }
            }
            Err(e) => writeln!(output, "\nError: {}", describe_error(&e))?,
        }
    }

    Ok(())
}

/// Print the retrieved chunks of an answer, numbered from 1.
pub fn write_sources<W: Write>(output: &mut W, answer: &Answer) -> Result<()> {
    writeln!(output, "\nRetrieved documents:")?;
    for (i, source) in answer.sources.iter().enumerate() {
        writeln!(
            output,
            "\nDocument {} ({}, offset {}, score {:.3}):",
            i + 1,
            source.source(),
            source.position(),
            source.score
        )?;
        writeln!(output, "{}", source.chunk.text)?;
    }
    Ok(())
}

/// Error text with a hint for the common provider failures.
pub fn describe_error(err: &QueryError) -> String {
    match err {
        QueryError::Model(model_err) if model_err.is_auth() => {
            format!("{} (check the model API key)", err)
        }
        QueryError::Model(model_err) if model_err.is_rate_limited() => {
            format!("{} (rate limited or quota exhausted; try again later)", err)
        }
        QueryError::Model(ModelInvocationError::Timeout { .. }) => {
            format!("{} (consider raising model.timeout_secs)", err)
        }
        _ => err.to_string(),
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(input: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}
