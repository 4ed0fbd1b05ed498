use serde::{Deserialize, Serialize};

/// Separador de líneas que usan tanto el coordinador (al generar inputs)
/// como el worker (al partirlos).
pub const LINE_SEPARATOR: &str = "\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Posición dentro del split; es la única identidad del chunk.
    pub index: usize,
    pub content: String,
}

/// Parte el contenido de un input en chunks de una línea.
///
/// Las líneas vacías se conservan como chunks vacíos, así que un contenido
/// vacío produce exactamente un chunk vacío y un separador final produce un
/// último chunk vacío.
pub fn split_into_chunks(content: &str) -> Vec<Chunk> {
    content
        .split(LINE_SEPARATOR)
        .enumerate()
        .map(|(index, line)| Chunk {
            index,
            content: line.to_string(),
        })
        .collect()
}

/// Une líneas con el mismo separador que usa `split_into_chunks`.
pub fn join_lines<I, S>(lines: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .map(|l| l.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(LINE_SEPARATOR)
}
