//! Output truncation for captured command output.
//!
//! Middle-omission keeps both the start of the output and its final lines,
//! where errors usually end up.

/// Truncate `output` to roughly `max_chars` characters by dropping the middle.
///
/// Splits on character boundaries, never inside a multi-byte sequence.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    if output.len() <= max_chars {
        return output.to_owned();
    }

    let total = output.chars().count();
    if total <= max_chars {
        return output.to_owned();
    }

    let half = max_chars / 2;
    let head: String = output.chars().take(half).collect();
    let tail: String = output.chars().skip(total - half).collect();
    let omitted = total - 2 * half;

    format!("{head}\n... [{omitted} chars omitted] ...\n{tail}")
}
