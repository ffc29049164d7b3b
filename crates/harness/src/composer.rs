// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composer buffer: the immutable `(text, cursor)` value backing task
//! composition. Every editing operation returns a new value; the cursor
//! counts characters and is always clamped to `[0, len]`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposerBuffer {
    pub text: String,
    pub cursor: usize,
}

impl ComposerBuffer {
    pub fn new(text: impl Into<String>, cursor: usize) -> Self {
        let text = text.into();
        let cursor = cursor.min(text.chars().count());
        Self { text, cursor }
    }

    fn len(&self) -> usize {
        self.text.chars().count()
    }

    fn byte_index(&self, char_index: usize) -> usize {
        self.text
            .char_indices()
            .nth(char_index)
            .map(|(i, _)| i)
            .unwrap_or(self.text.len())
    }

    /// Insert text at the cursor; the cursor lands after the insertion.
    pub fn insert(&self, input: &str) -> Self {
        let at = self.byte_index(self.cursor);
        let mut text = self.text.clone();
        text.insert_str(at, input);
        Self { text, cursor: self.cursor + input.chars().count() }
    }

    /// Delete the character before the cursor.
    pub fn backspace(&self) -> Self {
        if self.cursor == 0 {
            return self.clone();
        }
        let start = self.byte_index(self.cursor - 1);
        let end = self.byte_index(self.cursor);
        let mut text = self.text.clone();
        text.replace_range(start..end, "");
        Self { text, cursor: self.cursor - 1 }
    }

    /// Delete the character under the cursor.
    pub fn delete(&self) -> Self {
        if self.cursor >= self.len() {
            return self.clone();
        }
        let start = self.byte_index(self.cursor);
        let end = self.byte_index(self.cursor + 1);
        let mut text = self.text.clone();
        text.replace_range(start..end, "");
        Self { text, cursor: self.cursor }
    }

    pub fn move_left(&self) -> Self {
        Self { text: self.text.clone(), cursor: self.cursor.saturating_sub(1) }
    }

    pub fn move_right(&self) -> Self {
        Self { text: self.text.clone(), cursor: (self.cursor + 1).min(self.len()) }
    }

    pub fn home(&self) -> Self {
        Self { text: self.text.clone(), cursor: 0 }
    }

    pub fn end(&self) -> Self {
        Self { text: self.text.clone(), cursor: self.len() }
    }

    /// Replace the whole text, clamping the cursor into the new bounds.
    pub fn replace(&self, text: impl Into<String>) -> Self {
        Self::new(text, self.cursor)
    }
}

#[cfg(test)]
#[path = "composer_tests.rs"]
mod tests;
