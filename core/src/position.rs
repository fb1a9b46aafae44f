//! Conversions between character offsets in a block of text and
//! line/column positions.
//!
//! Offsets and columns produced here count `char`s. The host addresses
//! columns in bytes, so anything headed for the host goes through
//! [`char_to_byte_col`] first.

/// Line/column inside a block of text. Both are zero based and `col` counts
/// characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub col: usize,
}

/// Map a character offset into `text` to a line/column. Offsets past the end
/// clamp to the end of the text.
pub fn offset_to_position(text: &str, offset: usize) -> Position {
    let mut position = Position::default();
    for ch in text.chars().take(offset) {
        if ch == '\n' {
            position.line += 1;
            position.col = 0;
        } else {
            position.col += 1;
        }
    }
    position
}

/// Inverse of [`offset_to_position`]. Columns past the end of their line
/// clamp to the line end.
pub fn position_to_offset(text: &str, position: Position) -> usize {
    let mut offset = 0;
    for (index, line) in text.split('\n').enumerate() {
        let len = line.chars().count();
        if index == position.line {
            return offset + position.col.min(len);
        }
        offset += len + 1;
    }
    text.chars().count()
}

/// Byte index of the `col`-th character of `line`, or the line length when
/// `col` is past the end.
pub fn char_to_byte_col(line: &str, col: usize) -> usize {
    line.char_indices()
        .nth(col)
        .map_or(line.len(), |(index, _)| index)
}

/// Number of characters that start before byte index `byte` in `line`.
pub fn byte_to_char_col(line: &str, byte: usize) -> usize {
    line.char_indices()
        .take_while(|(index, _)| *index < byte)
        .count()
}
