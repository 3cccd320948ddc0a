use std::io::{self, Write};

use crossterm::{
    cursor, queue,
    style::Print,
    terminal::{Clear, ClearType},
};

mod compose;
mod input;
mod kitty;

pub use compose::{compose_frame, ComposeOptions};
pub use input::{CellSize, EventMapper, UiEvent};
pub use kitty::{DrawParams, KittyRenderer};

/// Replaces the contents of terminal row `row` with `label`, cut to `columns`.
pub fn write_status_line<W: Write>(
    writer: &mut W,
    row: u16,
    columns: u16,
    label: &str,
) -> io::Result<()> {
    let text: String = label.chars().take(usize::from(columns)).collect();
    queue!(
        writer,
        cursor::MoveTo(0, row),
        Clear(ClearType::CurrentLine),
        Print(text)
    )?;
    writer.flush()
}
