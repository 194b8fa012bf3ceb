//! Redaction of secrets before a log line is stored or emitted.

use super::shell;

pub const MASK: &str = "********";

const PEM_REDACTED: &str = "[REDACTED PRIVATE KEY]";

/// Environment variables whose assigned value is always a secret.
const SECRET_VARS: &[&str] = &[
    "BORG_PASSPHRASE",
    "BORG_NEW_PASSPHRASE",
    "RESTIC_PASSWORD",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_ACCESS_KEY_ID",
    "B2_ACCOUNT_KEY",
    "AZURE_ACCOUNT_KEY",
    "SSHPASS",
];

/// Very short values would mask unrelated text.
const MIN_SECRET_LEN: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct SecretMasker {
    secrets: Vec<String>,
}

impl SecretMasker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, secret: &str) {
        if secret.len() < MIN_SECRET_LEN || self.secrets.iter().any(|s| s == secret) {
            return;
        }
        self.secrets.push(secret.to_string());
        // Longest first so a secret containing another is replaced whole.
        self.secrets.sort_by(|a, b| b.len().cmp(&a.len()));
    }

    pub fn mask(&self, text: &str) -> String {
        let mut out = mask_pem_blocks(text);
        for secret in &self.secrets {
            let quoted = shell::quoted_body(secret);
            if quoted != *secret && out.contains(&quoted) {
                out = out.replace(&quoted, MASK);
            }
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), MASK);
            }
        }
        mask_assignments(&out)
    }
}

fn mask_pem_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("-----BEGIN") {
        let header_end = match rest[start..].find("PRIVATE KEY-----") {
            Some(i) => start + i + "PRIVATE KEY-----".len(),
            None => break,
        };
        out.push_str(&rest[..start]);
        out.push_str(PEM_REDACTED);
        rest = match rest[header_end..].find("-----END") {
            Some(i) => {
                let footer = header_end + i;
                match rest[footer..].find("PRIVATE KEY-----") {
                    Some(j) => &rest[footer + j + "PRIVATE KEY-----".len()..],
                    None => "",
                }
            }
            None => "",
        };
    }
    out.push_str(rest);
    out
}

fn mask_assignments(text: &str) -> String {
    let mut out = text.to_string();
    for var in SECRET_VARS {
        let needle = format!("{var}=");
        let mut search_from = 0;
        while let Some(pos) = out[search_from..].find(&needle) {
            let start = search_from + pos;
            let preceded_by_ident = out[..start]
                .chars()
                .next_back()
                .map(|c| c.is_ascii_alphanumeric() || c == '_')
                .unwrap_or(false);
            let value_start = start + needle.len();
            if preceded_by_ident {
                search_from = value_start;
                continue;
            }
            let (value_end, inner_start, inner_end) = value_span(&out, value_start);
            if inner_end > inner_start {
                out.replace_range(inner_start..inner_end, MASK);
                search_from = inner_start + MASK.len();
            } else {
                search_from = value_end;
            }
        }
    }
    out
}

/// Returns (end of the whole value, start of the secret text, end of the secret text).
fn value_span(text: &str, start: usize) -> (usize, usize, usize) {
    let bytes = text.as_bytes();
    match bytes.get(start) {
        Some(b'\'') => {
            let end = text[start + 1..].find('\'').map(|i| start + 1 + i).unwrap_or(text.len());
            (end, start + 1, end)
        }
        Some(b'"') => {
            let mut i = start + 1;
            while i < bytes.len() {
                if bytes[i] == b'\\' {
                    i += 2;
                    continue;
                }
                if bytes[i] == b'"' {
                    break;
                }
                i += 1;
            }
            let end = i.min(bytes.len());
            (end, start + 1, end)
        }
        _ => {
            let end = text[start..]
                .find(|c: char| c.is_whitespace() || c == ';' || c == '&' || c == '|')
                .map(|i| start + i)
                .unwrap_or(text.len());
            (end, start, end)
        }
    }
}
