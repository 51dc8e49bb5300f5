/// Characters the splitter prefers to break on, checked from the end of the
/// window backwards.
const BOUNDARY_CHARS: [char; 6] = [' ', '\n', '\t', '.', '!', '?'];

/// Truncate to at most `max_chars` characters, always on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Split text into windows of at most `chunk_size` characters, breaking at
/// the last boundary character in the back half of each window so words and
/// sentences stay intact. Deterministic: same input, same chunks.
pub fn split_text(text: &str, chunk_size: usize) -> Vec<String> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + chunk_size).min(chars.len());

        if end < chars.len() {
            let floor = start + chunk_size / 2;
            if let Some(boundary) = (floor + 1..=end)
                .rev()
                .find(|&index| BOUNDARY_CHARS.contains(&chars[index]))
            {
                end = boundary + 1;
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        start = end;
    }

    chunks
}

/// Deterministic context header prepended to chunk text before embedding, so
/// the vector carries document-level signal alongside the chunk body.
pub fn build_embedding_context(
    filename: &str,
    topic: Option<&str>,
    tags: &[String],
    chunk_text: &str,
) -> String {
    let mut parts = vec![format!("file: {filename}")];

    if let Some(topic) = topic.filter(|value| !value.is_empty()) {
        parts.push(format!("topic: {topic}"));
    }
    if !tags.is_empty() {
        parts.push(format!("tags: {}", tags.join(", ")));
    }
    parts.push(format!("content: {chunk_text}"));

    parts.join(" | ")
}
