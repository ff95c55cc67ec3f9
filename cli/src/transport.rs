//! Line-delimited JSON transport
//!
//! One request object per line, one response object per line:
//! `{"input": "..."}` in, `{"prediction": "..."}` or `{"error": "..."}` out.

use question_bank::QuestionMatcher;
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Reply to a line that is not a JSON object
pub const INVALID_JSON: &str = "Invalid JSON format";

/// Reply to a request without a usable `input`
pub const NO_INPUT: &str = "No input provided";

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictResponse {
    Prediction(String),
    Error(String),
}

/// Async JSON-lines transport over any reader/writer pair
pub struct JsonLineTransport<R, W> {
    reader: BufReader<R>,
    writer: W,
}

impl JsonLineTransport<tokio::io::Stdin, tokio::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> JsonLineTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Next non-blank line, `None` at EOF
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            let line = line.trim();
            if !line.is_empty() {
                return Ok(Some(line.to_string()));
            }
        }
    }

    pub async fn write_response(&mut self, response: &PredictResponse) -> io::Result<()> {
        let json = serde_json::to_string(response)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}

/// Extract the query from one request line
pub fn parse_request(line: &str) -> Result<String, PredictResponse> {
    let request: PredictRequest = serde_json::from_str(line).map_err(|e| {
        tracing::warn!("Rejected request line: {}", e);
        PredictResponse::Error(INVALID_JSON.to_string())
    })?;

    request
        .input
        .filter(|input| !input.trim().is_empty())
        .ok_or_else(|| PredictResponse::Error(NO_INPUT.to_string()))
}

/// Answer requests until EOF. Returns the number of requests handled.
pub async fn serve<R, W>(
    matcher: &QuestionMatcher,
    transport: &mut JsonLineTransport<R, W>,
) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut handled = 0;
    while let Some(line) = transport.read_line().await? {
        let response = match parse_request(&line) {
            Ok(query) => match matcher.answer_question(&query).await {
                Ok(answer) => PredictResponse::Prediction(answer),
                Err(e) => {
                    tracing::error!("Query failed: {}", e);
                    PredictResponse::Error(e.to_string())
                }
            },
            Err(rejected) => rejected,
        };

        transport.write_response(&response).await?;
        handled += 1;
    }

    tracing::info!("Input closed after {} requests", handled);
    Ok(handled)
}
