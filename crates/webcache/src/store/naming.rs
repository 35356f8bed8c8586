//! Payload file naming.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const PREFIX: &str = "doc";

/// Invents unique payload file names: `doc<millis>-<seq><suffix>`.
#[derive(Debug)]
pub struct FileNamer {
    sequence: AtomicU64,
    suffixes: HashMap<String, String>,
}

impl Default for FileNamer {
    fn default() -> Self {
        let suffixes = [
            ("text/html", ".html"),
            ("text/plain", ".txt"),
            ("image/jpeg", ".jpg"),
        ]
        .into_iter()
        .map(|(ct, suffix)| (ct.to_string(), suffix.to_string()))
        .collect();

        Self {
            sequence: AtomicU64::new(0),
            suffixes,
        }
    }
}

impl FileNamer {
    /// Map a content type to a suffix ahead of the guessed one.
    pub fn set_suffix(&mut self, content_type: &str, suffix: impl Into<String>) {
        self.suffixes
            .insert(content_type.to_ascii_lowercase(), suffix.into());
    }

    pub fn suffix_for(&self, content_type: &str) -> String {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if let Some(suffix) = self.suffixes.get(&essence) {
            return suffix.clone();
        }

        mime_guess::get_mime_extensions_str(&essence)
            .and_then(|extensions| extensions.first())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default()
    }

    pub fn next_name(&self, content_type: &str) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{PREFIX}{millis}-{seq}{}", self.suffix_for(content_type))
    }
}

/// True for names this module could have produced. Only such files are ever
/// removed by erase and prune.
pub fn is_payload_name(name: &str) -> bool {
    name.strip_prefix(PREFIX)
        .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
}
