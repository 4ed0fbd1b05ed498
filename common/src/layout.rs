//! Convención de claves dentro del namespace de una ejecución.
//!
//! - entradas:    `input-files/<input>.txt`
//! - marcadores:  `output-files/<input>/<index>.txt`

pub const INPUT_ROOT: &str = "input-files";
pub const OUTPUT_ROOT: &str = "output-files";
pub const BLOB_SUFFIX: &str = ".txt";

pub fn input_key(input_name: &str) -> String {
    format!("{}/{}{}", INPUT_ROOT, input_name, BLOB_SUFFIX)
}

/// Prefijo bajo el que viven los marcadores de un input (con `/` final).
pub fn output_prefix(input_name: &str) -> String {
    format!("{}/{}/", OUTPUT_ROOT, input_name)
}

pub fn marker_key(input_name: &str, index: usize) -> String {
    format!("{}{}{}", output_prefix(input_name), index, BLOB_SUFFIX)
}

/// Nombre del archivo local que el coordinador usa para un input.
pub fn input_file_name(input_name: &str) -> String {
    format!("{}{}", input_name, BLOB_SUFFIX)
}
