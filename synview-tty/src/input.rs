use crossterm::event::{
    Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use synview_core::{Command, LayoutMode, Modifiers, ScrollDirection, ZoomMode, ZOOM_PERCENTAGES};

/// Size of one terminal cell in view pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSize {
    pub width: f64,
    pub height: f64,
}

impl Default for CellSize {
    fn default() -> Self {
        Self {
            width: 8.0,
            height: 16.0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum UiEvent {
    Command(Command),
    Click { x: f64, y: f64, modifiers: Modifiers },
    Drag { delta_x: f64, delta_y: f64 },
    Wheel {
        direction: ScrollDirection,
        x: f64,
        y: f64,
        modifiers: Modifiers,
    },
    Resize { columns: u16, rows: u16 },
    Reload,
    ToggleSyncBoxes,
    Quit,
    None,
}

/// Turns terminal events into preview actions. Digits typed before a key
/// form a count: `12G` jumps to page 12, `3j` moves three pages, `150z`
/// zooms to 150%.
#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    cell: CellSize,
    drag_origin: Option<(f64, f64)>,
}

impl EventMapper {
    pub const PAN_STEP: f64 = 48.0;
    /// Largest count a digit prefix can build up to.
    pub const MAX_COUNT: usize = 99_999;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cell_size(&mut self, cell: CellSize) {
        self.cell = cell;
    }

    pub fn cell_size(&self) -> CellSize {
        self.cell
    }

    pub fn pending_input(&self) -> Option<String> {
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(key) if key.kind != KeyEventKind::Release => self.map_key(key),
            Event::Mouse(mouse) => self.map_mouse(mouse),
            Event::Resize(columns, rows) => {
                self.reset_count();
                UiEvent::Resize { columns, rows }
            }
            _ => UiEvent::None,
        }
    }

    fn map_key(&mut self, KeyEvent { code, modifiers, .. }: KeyEvent) -> UiEvent {
        match (code, modifiers) {
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                UiEvent::Quit
            }
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Left, modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.pan(-Self::PAN_STEP, 0.0)
            }
            (KeyCode::Right, modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.pan(Self::PAN_STEP, 0.0)
            }
            (KeyCode::Up, modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.pan(0.0, -Self::PAN_STEP)
            }
            (KeyCode::Down, modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.pan(0.0, Self::PAN_STEP)
            }
            (KeyCode::Char('h'), KeyModifiers::NONE) | (KeyCode::Left, KeyModifiers::NONE) => {
                self.pan(-Self::PAN_STEP, 0.0)
            }
            (KeyCode::Char('l'), KeyModifiers::NONE) | (KeyCode::Right, KeyModifiers::NONE) => {
                self.pan(Self::PAN_STEP, 0.0)
            }
            (KeyCode::Char('K'), KeyModifiers::SHIFT) => self.pan(0.0, -Self::PAN_STEP),
            (KeyCode::Char('J'), KeyModifiers::SHIFT) => self.pan(0.0, Self::PAN_STEP),
            (KeyCode::Char('j'), KeyModifiers::NONE)
            | (KeyCode::Down, KeyModifiers::NONE)
            | (KeyCode::PageDown, _)
            | (KeyCode::Char(' '), KeyModifiers::NONE) => {
                let count = self.take_count();
                UiEvent::Command(Command::NextPage { count })
            }
            (KeyCode::Char('k'), KeyModifiers::NONE)
            | (KeyCode::Up, KeyModifiers::NONE)
            | (KeyCode::PageUp, _) => {
                let count = self.take_count();
                UiEvent::Command(Command::PrevPage { count })
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                let page = self.take_page().unwrap_or(0);
                UiEvent::Command(Command::GotoPage { page })
            }
            (KeyCode::Char('G'), KeyModifiers::SHIFT) | (KeyCode::End, _) => {
                let page = self.take_page().unwrap_or(usize::MAX);
                UiEvent::Command(Command::GotoPage { page })
            }
            (KeyCode::Char('+'), _) | (KeyCode::Char('='), _) => {
                let steps = self.take_count();
                UiEvent::Command(Command::ZoomIn { steps })
            }
            (KeyCode::Char('-'), _) => {
                let steps = self.take_count();
                UiEvent::Command(Command::ZoomOut { steps })
            }
            (KeyCode::Char('z'), KeyModifiers::NONE) => {
                let percent = self
                    .pending_count
                    .and_then(|count| u32::try_from(count).ok())
                    .filter(|percent| ZOOM_PERCENTAGES.contains(percent));
                self.reset_count();
                match percent {
                    Some(percent) => {
                        UiEvent::Command(Command::SetZoom(ZoomMode::Percent(percent)))
                    }
                    None => UiEvent::None,
                }
            }
            (KeyCode::Char('w'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::SetZoom(ZoomMode::FitWidth))
            }
            (KeyCode::Char('b'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::SetZoom(ZoomMode::BestFit))
            }
            (KeyCode::Char('s'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::SetLayout(LayoutMode::SinglePage))
            }
            (KeyCode::Char('c'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::SetLayout(LayoutMode::Continuous))
            }
            (KeyCode::Tab, _) => {
                self.reset_count();
                UiEvent::Command(Command::ToggleLayout)
            }
            (KeyCode::Char('p'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::TogglePause)
            }
            (KeyCode::Char('r'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Reload
            }
            (KeyCode::Char('x'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::ToggleSyncBoxes
            }
            (KeyCode::Char('q'), _) | (KeyCode::Esc, _) => {
                self.reset_count();
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_mouse(&mut self, mouse: MouseEvent) -> UiEvent {
        let (x, y) = self.cell_center(mouse.column, mouse.row);
        let modifiers = Modifiers {
            ctrl: mouse.modifiers.contains(KeyModifiers::CONTROL),
            shift: mouse.modifiers.contains(KeyModifiers::SHIFT),
        };
        let wheel = |direction| UiEvent::Wheel {
            direction,
            x,
            y,
            modifiers,
        };

        match mouse.kind {
            MouseEventKind::ScrollUp => wheel(ScrollDirection::Up),
            MouseEventKind::ScrollDown => wheel(ScrollDirection::Down),
            MouseEventKind::ScrollLeft => wheel(ScrollDirection::Left),
            MouseEventKind::ScrollRight => wheel(ScrollDirection::Right),
            MouseEventKind::Down(MouseButton::Left) => {
                self.drag_origin = Some((x, y));
                UiEvent::Click { x, y, modifiers }
            }
            MouseEventKind::Drag(MouseButton::Left) => match self.drag_origin.replace((x, y)) {
                Some((origin_x, origin_y)) => UiEvent::Drag {
                    delta_x: x - origin_x,
                    delta_y: y - origin_y,
                },
                None => UiEvent::None,
            },
            MouseEventKind::Up(MouseButton::Left) => {
                self.drag_origin = None;
                UiEvent::None
            }
            _ => UiEvent::None,
        }
    }

    fn cell_center(&self, column: u16, row: u16) -> (f64, f64) {
        (
            (f64::from(column) + 0.5) * self.cell.width,
            (f64::from(row) + 0.5) * self.cell.height,
        )
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current * 10 + digit;
        if next > Self::MAX_COUNT {
            return;
        }
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    /// The typed count read as a 1-based page number.
    fn take_page(&mut self) -> Option<usize> {
        let page = self.pending_count.take().map(|page| page.saturating_sub(1));
        self.pending_digits.clear();
        page
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    fn pan(&mut self, delta_x: f64, delta_y: f64) -> UiEvent {
        let multiplier = self.take_count() as f64;
        UiEvent::Command(Command::Pan {
            delta_x: delta_x * multiplier,
            delta_y: delta_y * multiplier,
        })
    }
}
