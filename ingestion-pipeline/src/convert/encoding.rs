use tracing::{debug, warn};

/// Decodes raw text bytes: strict UTF-8 first, then the Windows-1252 /
/// Latin-1 family, finally lossy UTF-8 with replacement characters.
pub fn decode_text(data: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(data) {
        return text.to_string();
    }

    let (decoded, _, had_errors) = encoding_rs::WINDOWS_1252.decode(data);
    if !had_errors {
        debug!("decoded text as windows-1252");
        return decoded.into_owned();
    }

    // ISO-8859-1 maps every byte, so this step cannot fail.
    let latin1: String = data.iter().map(|&b| b as char).collect();
    if !latin1.is_empty() {
        debug!("decoded text as iso-8859-1");
        return latin1;
    }

    warn!("falling back to lossy utf-8 decoding");
    String::from_utf8_lossy(data).into_owned()
}

/// Heuristic binary check: null bytes or a high ratio of non-printable
/// characters in the leading sample.
pub fn is_binary(data: &[u8]) -> bool {
    let sample = &data[..data.len().min(8192)];
    if sample.is_empty() {
        return false;
    }

    if sample.contains(&0) {
        return true;
    }

    let non_printable = sample
        .iter()
        .filter(|&&b| b < 32 && !matches!(b, 9 | 10 | 13))
        .count();

    (non_printable as f64 / sample.len() as f64) > 0.3
}
