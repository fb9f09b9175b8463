//! Sliding-window text chunker with boundary snapping.
//!
//! Splits document body text into overlapping windows of roughly
//! `chunk_size` bytes. Each cut point except the last is pulled backward
//! to the nearest sentence terminator (`.`) inside the window, falling
//! back to the nearest space, so chunks avoid splitting mid-sentence or
//! mid-word. Pure and deterministic for given inputs.

/// Split `text` into trimmed, overlapping chunks.
///
/// Returns a single-element vector containing the trimmed input when it
/// fits in one window. Successive windows advance by `chunk_size - overlap`;
/// the advance is clamped strictly positive so a misconfigured
/// `overlap >= chunk_size` still terminates.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.len() <= chunk_size {
        return vec![text.trim().to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < text.len() {
        let mut end = (start + chunk_size).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }

        // Not the last window: snap the cut to a sentence or word boundary.
        if end < text.len() {
            match text[start..end].rfind('.') {
                Some(dot) if dot > 0 => end = start + dot + 1,
                _ => {
                    if let Some(space) = text[start..end].rfind(' ') {
                        if space > 0 {
                            end = start + space;
                        }
                    }
                }
            }
        }

        chunks.push(text[start..end].trim().to_string());

        if end >= text.len() {
            break;
        }
        // Clamped so the window always moves forward.
        start = (end.saturating_sub(overlap)).max(start + 1);
        while !text.is_char_boundary(start) {
            start += 1;
        }
    }

    chunks
}
