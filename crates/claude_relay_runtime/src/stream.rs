use serde_json::Value;

/// Upper bound for one buffered stdout line before it is discarded.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Incremental newline-delimited JSON splitter for one child stdout stream.
///
/// Chunks may split a line (or a UTF-8 sequence) anywhere; the trailing partial line is
/// buffered until its newline arrives. Lines that fail to parse are dropped and counted.
#[derive(Clone, Debug)]
pub struct LineJsonStreamParser {
    buffer: Vec<u8>,
    max_line_bytes: usize,
    discarding: bool,
    malformed_line_count: u64,
}

impl Default for LineJsonStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineJsonStreamParser {
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    /// Create a parser that drops any line longer than `max_line_bytes`.
    /// A zero limit is raised to one byte.
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            max_line_bytes: max_line_bytes.max(1),
            discarding: false,
            malformed_line_count: 0,
        }
    }

    /// Append one raw chunk and return every value completed by it, in line order.
    /// Allocation: O(chunk) buffer growth + parsed values. Complexity: O(chunk + completed lines).
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        let mut parsed = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|byte| *byte == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                self.buffer.clear();
                continue;
            }

            if self.buffer.len() + head.len() > self.max_line_bytes {
                self.buffer.clear();
                self.malformed_line_count += 1;
                continue;
            }

            if self.buffer.is_empty() {
                self.parse_line(head, &mut parsed);
            } else {
                self.buffer.extend_from_slice(head);
                let line = std::mem::take(&mut self.buffer);
                self.parse_line(&line, &mut parsed);
                self.buffer = line;
                self.buffer.clear();
            }
        }

        if !self.discarding && !rest.is_empty() {
            if self.buffer.len() + rest.len() > self.max_line_bytes {
                tracing::warn!(
                    limit = self.max_line_bytes,
                    "stdout line exceeds limit; discarding until next newline"
                );
                self.buffer.clear();
                self.discarding = true;
                self.malformed_line_count += 1;
            } else {
                self.buffer.extend_from_slice(rest);
            }
        }

        parsed
    }

    /// Convenience wrapper over [`feed`](Self::feed) for text chunks.
    pub fn feed_str(&mut self, chunk: &str) -> Vec<Value> {
        self.feed(chunk.as_bytes())
    }

    /// Bytes currently held for an unterminated line.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn malformed_line_count(&self) -> u64 {
        self.malformed_line_count
    }

    /// Parse a final line left without a trailing newline at end of stream.
    pub fn finish(mut self) -> Option<Value> {
        if self.discarding || self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        let mut parsed = Vec::with_capacity(1);
        self.parse_line(&line, &mut parsed);
        parsed.pop()
    }

    fn parse_line(&mut self, line: &[u8], out: &mut Vec<Value>) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        match serde_json::from_slice::<Value>(line) {
            Ok(value) => out.push(value),
            Err(_) => self.malformed_line_count += 1,
        }
    }
}

/// One event from the CLI's `stream-json` output, reduced to the fields the runner reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    SystemInit {
        session_id: Option<String>,
    },
    Assistant {
        texts: Vec<String>,
    },
    Result {
        result: Option<String>,
        session_id: Option<String>,
    },
    Other,
}

impl StreamEvent {
    /// Classify one parsed line. Unknown shapes and missing fields never fail.
    pub fn from_value(value: &Value) -> Self {
        match value.get("type").and_then(Value::as_str) {
            Some("system") if value.get("subtype").and_then(Value::as_str) == Some("init") => {
                Self::SystemInit {
                    session_id: session_id_of(value),
                }
            }
            Some("assistant") => Self::Assistant {
                texts: assistant_texts(value),
            },
            Some("result") => Self::Result {
                result: value
                    .get("result")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
                session_id: session_id_of(value),
            },
            _ => Self::Other,
        }
    }
}

fn session_id_of(value: &Value) -> Option<String> {
    value
        .get("session_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(ToOwned::to_owned)
}

fn assistant_texts(value: &Value) -> Vec<String> {
    let Some(content) = value.pointer("/message/content").and_then(Value::as_array) else {
        return Vec::new();
    };
    content
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
