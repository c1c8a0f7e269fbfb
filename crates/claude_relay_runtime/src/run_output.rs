use serde_json::Value;

use crate::stream::StreamEvent;

/// Per-run accumulation of assistant text and the session id the CLI reported.
///
/// Text blocks win over the terminal `result` payload; the payload is only used when no
/// text block ever arrived. A session id from `result` replaces one seen at `init`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunOutputCollector {
    text: String,
    session_id: Option<String>,
}

impl RunOutputCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify and apply one parsed stdout line.
    pub fn push_value(&mut self, value: &Value, on_chunk: &mut impl FnMut(&str)) {
        self.push_event(StreamEvent::from_value(value), on_chunk);
    }

    /// Apply one event. `on_chunk` receives the accumulated text at most once per event,
    /// and only when the event grew it.
    pub fn push_event(&mut self, event: StreamEvent, on_chunk: &mut impl FnMut(&str)) {
        match event {
            StreamEvent::SystemInit { session_id } => {
                if session_id.is_some() {
                    self.session_id = session_id;
                }
            }
            StreamEvent::Assistant { texts } => {
                if texts.is_empty() {
                    return;
                }
                for text in &texts {
                    self.text.push_str(text);
                }
                on_chunk(&self.text);
            }
            StreamEvent::Result { result, session_id } => {
                if let Some(result) = result {
                    if self.text.is_empty() && !result.is_empty() {
                        self.text = result;
                        on_chunk(&self.text);
                    }
                }
                if session_id.is_some() {
                    self.session_id = session_id;
                }
            }
            StreamEvent::Other => {}
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn into_parts(self) -> (String, Option<String>) {
        (self.text, self.session_id)
    }
}
