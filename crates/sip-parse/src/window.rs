//! Token windows over the caller's buffer.

/// Half-open byte range `[begin, end)` into the buffer handed to
/// [`crate::Preparser::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub begin: usize,
    pub end: usize,
}

impl Window {
    pub fn at(offset: usize) -> Self {
        Self {
            begin: offset,
            end: offset,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slice<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.begin..self.end]
    }
}

/// Shifts a window left by `discard` bytes, the amount the caller drops from
/// the front of its buffer between two calls.
///
/// Windows always start at or after the discard point, so the subtraction
/// never wraps; `saturating_sub` keeps a corrupt window from panicking.
pub fn rebase(window: Window, discard: usize) -> Window {
    Window {
        begin: window.begin.saturating_sub(discard),
        end: window.end.saturating_sub(discard),
    }
}
