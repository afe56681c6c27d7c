//! Holds the [`StackPusher`] type and methods

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

/// A helper for pushing machine words into a full-descending stack
pub(crate) struct StackPusher(*mut usize);

impl StackPusher {
    /// Make a new full-descending stack from the given pointer
    ///
    /// It will not write to the given pointer, but it will write immediately
    /// below it - because this is a Full Descending stack.
    ///
    /// # Safety
    ///
    /// There must be enough free space below the given pointer to accept all
    /// the items you are going to push.
    pub(crate) unsafe fn new(stack_top: *mut usize) -> StackPusher {
        StackPusher(stack_top)
    }

    /// Push a word onto the stack, moving the pointer down
    pub(crate) fn push(&mut self, value: usize) {
        // SAFETY: the caller of `new` promised us the space
        unsafe {
            self.0 = self.0.offset(-1);
            self.0.write_volatile(value);
        }
    }

    /// Push `count` zero words
    pub(crate) fn push_zeros(&mut self, count: usize) {
        for _ in 0..count {
            self.push(0);
        }
    }

    /// Get the current stack pointer
    pub(crate) fn current(&self) -> *mut usize {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushes_full_descending() {
        let mut words = [0xAAusize; 4];
        let top = unsafe { words.as_mut_ptr().add(4) };
        let mut pusher = unsafe { StackPusher::new(top) };
        pusher.push(1);
        pusher.push(2);
        pusher.push_zeros(1);
        assert_eq!(pusher.current(), unsafe { top.offset(-3) });
        assert_eq!(words, [0xAA, 0, 2, 1]);
    }
}

// End of File
