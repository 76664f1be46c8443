//! Secret masking capability.
//!
//! Tool output coming back from remote servers can echo credentials that were
//! handed to those servers (env vars, auth headers). Every piece of text that
//! leaves the tool bridge goes through a [`SecretMasker`] first.

use std::sync::Arc;

use secrecy::{ExposeSecret, Secret};

const REDACTED: &str = "[REDACTED]";

/// Opaque `mask(text) -> text` capability.
pub trait SecretMasker: Send + Sync {
    fn mask(&self, text: &str) -> String;
}

pub type SharedMasker = Arc<dyn SecretMasker>;

impl<F> SecretMasker for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn mask(&self, text: &str) -> String {
        self(text)
    }
}

/// Passes text through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMasker;

impl SecretMasker for NoopMasker {
    fn mask(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Redacts a fixed set of known secret values, including their base64 and
/// hex encodings.
#[derive(Default)]
pub struct SecretListMasker {
    needles: Vec<Secret<String>>,
}

impl SecretListMasker {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut masker = Self::default();
        for secret in secrets {
            masker.add(secret);
        }
        masker
    }

    /// Register one more secret value. Empty values are ignored.
    pub fn add(&mut self, secret: impl Into<String>) {
        let value = secret.into();
        if value.is_empty() {
            return;
        }
        for needle in redaction_needles(&value) {
            self.needles.push(Secret::new(needle));
        }
        // Longest first so a raw value never leaves a partial encoding behind.
        self.needles
            .sort_by_key(|n| std::cmp::Reverse(n.expose_secret().len()));
    }

    pub fn is_empty(&self) -> bool {
        self.needles.is_empty()
    }
}

impl std::fmt::Debug for SecretListMasker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretListMasker")
            .field("needles", &self.needles.len())
            .finish()
    }
}

impl SecretMasker for SecretListMasker {
    fn mask(&self, text: &str) -> String {
        let mut out = text.to_string();
        for needle in &self.needles {
            let needle = needle.expose_secret();
            if out.contains(needle.as_str()) {
                out = out.replace(needle.as_str(), REDACTED);
            }
        }
        out
    }
}

/// The raw value plus its base64 (standard and URL-safe) and lowercase hex
/// encodings.
fn redaction_needles(value: &str) -> Vec<String> {
    use base64::Engine;

    let mut needles = vec![value.to_string()];

    let b64_std = base64::engine::general_purpose::STANDARD.encode(value.as_bytes());
    let b64_url = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(value.as_bytes());
    let hex = value
        .as_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();

    for encoded in [b64_std, b64_url, hex] {
        if encoded != value && !needles.contains(&encoded) {
            needles.push(encoded);
        }
    }

    needles
}
