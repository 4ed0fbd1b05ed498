use std::collections::{BTreeMap, HashSet};

use crate::chunk::Chunk;

/// Trabajo pendiente: índice de chunk -> contenido.
pub type RemainingWork = BTreeMap<usize, String>;

/// Resta los chunks ya marcados como hechos a la secuencia completa.
///
/// Índices en `done` que no existen en `chunks` se ignoran.
pub fn remaining_work(chunks: &[Chunk], done: &HashSet<usize>) -> RemainingWork {
    chunks
        .iter()
        .filter(|c| !done.contains(&c.index))
        .map(|c| (c.index, c.content.clone()))
        .collect()
}

/// Índices marcados como hechos que no corresponden a ningún chunk actual.
pub fn stale_markers(chunk_count: usize, done: &HashSet<usize>) -> Vec<usize> {
    let mut stale: Vec<usize> = done.iter().copied().filter(|i| *i >= chunk_count).collect();
    stale.sort_unstable();
    stale
}
