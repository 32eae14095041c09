/// Trocea el texto por párrafos, acumulando hasta `max_chars` caracteres.
/// Un párrafo que por sí solo supera el límite se corta en trozos de
/// `max_chars` respetando los límites de carácter UTF-8.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        let para_len = paragraph.chars().count();
        let current_len = current.chars().count();

        if current_len + para_len + 2 > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        if para_len > max_chars {
            let chars: Vec<char> = paragraph.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
