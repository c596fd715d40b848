use percent_encoding::percent_decode_str;
use sha2::{Digest, Sha256};

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..4])
}

/// Turns a challenge or category name into a single safe path segment.
///
/// The result only contains `[a-z0-9-]`, never starts with `-`, never has
/// two hyphens in a row and is never empty. Names that sanitize to nothing
/// get an `unnamed-<hash>` placeholder so distinct names stay distinct.
pub fn sanitize_segment(name: &str) -> String {
    let mut out = String::with_capacity(name.len());

    for c in name.to_lowercase().chars() {
        let c = if c == ' ' { '-' } else { c };
        match c {
            'a'..='z' | '0'..='9' => out.push(c),
            '-' if !out.is_empty() && !out.ends_with('-') => out.push('-'),
            _ => {}
        }
    }

    if out.is_empty() {
        return format!("unnamed-{}", short_hash(name));
    }
    out
}

/// File name for an attachment link such as `/files/<hash>/dump.zip?token=...`.
pub fn attachment_file_name(file_url: &str) -> String {
    let path = file_url.split(['?', '#']).next().unwrap_or_default();
    let raw = path.rsplit('/').next().unwrap_or_default();
    let decoded = percent_decode_str(raw).decode_utf8_lossy();

    let name = decoded.trim().trim_start_matches('.');
    if name.is_empty() || name.contains(['/', '\\', '\0']) {
        return format!("attachment-{}", short_hash(file_url));
    }
    name.to_string()
}

/// Inserts `-<n>` before the extension: `dump.tar.gz` -> `dump-2.tar.gz`.
pub fn numbered_file_name(name: &str, n: usize) -> String {
    match name.find('.') {
        Some(dot) => format!("{}-{}{}", &name[..dot], n, &name[dot..]),
        None => format!("{}-{}", name, n),
    }
}
