//! Block-aligned chunking of canonical text.

/// Separator placed between blocks inside a chunk and between chunk outputs
pub const BLOCK_SEPARATOR: &str = "\n\n";

/// Greedily pack `pieces` into ordered, non-overlapping chunks of at most
/// `threshold` characters. Pieces are never split; a piece longer than the
/// threshold becomes a chunk of its own.
pub fn chunk_texts<S: AsRef<str>>(pieces: &[S], threshold: usize) -> Vec<String> {
    let separator_len = BLOCK_SEPARATOR.chars().count();
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for piece in pieces {
        let piece = piece.as_ref();
        let piece_len = piece.chars().count();

        if !current.is_empty() && current_len + separator_len + piece_len > threshold {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if !current.is_empty() {
            current.push_str(BLOCK_SEPARATOR);
            current_len += separator_len;
        }
        current.push_str(piece);
        current_len += piece_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
