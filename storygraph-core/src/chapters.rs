//! Chapter map: the ordered chapter boundaries of the source document.
//!
//! Boundary detection happens outside the engine. The map it produces is
//! validated once and then used to cut each chapter's text out of the static
//! document by line range.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from validating or slicing a chapter map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChapterMapError {
    #[error("chapter at position {position} has index {found}, expected {position}")]
    NonContiguous { position: usize, found: u32 },

    #[error("chapter {index} has an invalid line range {start}..={end}")]
    BadRange { index: u32, start: usize, end: usize },

    #[error("chapter {index} overlaps the previous chapter")]
    Overlap { index: u32 },

    #[error("chapter {index} refers to unknown book {book}")]
    UnknownBook { index: u32, book: u32 },

    #[error("no chapter with index {0}")]
    UnknownChapter(u32),

    #[error("chapter {index} ends at line {end} but the document has {lines} lines")]
    PastEnd { index: u32, end: usize, lines: usize },
}

/// One chapter boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterBoundary {
    /// Zero-based position in reading order.
    pub index: u32,
    /// Chapter heading.
    pub title: String,
    /// Zero-based index of the containing book.
    #[serde(default)]
    pub book_index: u32,
    /// Heading of the containing book.
    #[serde(default)]
    pub book_title: String,
    /// 1-based chapter number within its book.
    #[serde(default)]
    pub chapter_number: u32,
    /// 1-based first line, inclusive.
    pub start_line: usize,
    /// 1-based last line, inclusive.
    pub end_line: usize,
}

impl ChapterBoundary {
    /// Number of lines spanned.
    pub fn line_count(&self) -> usize {
        self.end_line + 1 - self.start_line
    }
}

/// A book (part/volume) grouping several chapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookBoundary {
    pub index: u32,
    pub title: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// Ordered chapter boundaries plus the books that contain them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterMap {
    pub chapters: Vec<ChapterBoundary>,
    #[serde(default)]
    pub books: Vec<BookBoundary>,
}

impl ChapterMap {
    /// Build a map without books.
    pub fn new(chapters: Vec<ChapterBoundary>) -> Self {
        Self {
            chapters,
            books: Vec::new(),
        }
    }

    /// Attach book boundaries.
    pub fn with_books(mut self, books: Vec<BookBoundary>) -> Self {
        self.books = books;
        self
    }

    /// Number of chapters.
    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    /// Whether the map has no chapters.
    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    /// Chapter by index.
    pub fn get(&self, index: u32) -> Option<&ChapterBoundary> {
        self.chapters.get(index as usize).filter(|c| c.index == index)
    }

    /// Book containing a chapter, if books are known.
    pub fn book_of(&self, index: u32) -> Option<&BookBoundary> {
        let chapter = self.get(index)?;
        self.books.iter().find(|b| b.index == chapter.book_index)
    }

    /// Check indices are contiguous from zero and ranges are well formed and
    /// in reading order.
    pub fn validate(&self) -> Result<(), ChapterMapError> {
        let mut previous_end = 0;
        for (position, chapter) in self.chapters.iter().enumerate() {
            if chapter.index as usize != position {
                return Err(ChapterMapError::NonContiguous {
                    position,
                    found: chapter.index,
                });
            }
            if chapter.start_line == 0 || chapter.end_line < chapter.start_line {
                return Err(ChapterMapError::BadRange {
                    index: chapter.index,
                    start: chapter.start_line,
                    end: chapter.end_line,
                });
            }
            if chapter.start_line <= previous_end {
                return Err(ChapterMapError::Overlap {
                    index: chapter.index,
                });
            }
            previous_end = chapter.end_line;
            if !self.books.is_empty() && !self.books.iter().any(|b| b.index == chapter.book_index) {
                return Err(ChapterMapError::UnknownBook {
                    index: chapter.index,
                    book: chapter.book_index,
                });
            }
        }
        Ok(())
    }

    /// Cut a chapter's text out of the full document.
    pub fn slice(&self, text: &str, index: u32) -> Result<String, ChapterMapError> {
        let chapter = self.get(index).ok_or(ChapterMapError::UnknownChapter(index))?;
        let lines: Vec<&str> = text.lines().collect();
        if chapter.end_line > lines.len() {
            return Err(ChapterMapError::PastEnd {
                index,
                end: chapter.end_line,
                lines: lines.len(),
            });
        }
        Ok(lines[chapter.start_line - 1..chapter.end_line].join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(index: u32, start: usize, end: usize) -> ChapterBoundary {
        ChapterBoundary {
            index,
            title: format!("CHAPTER {}", index + 1),
            book_index: 0,
            book_title: "BOOK ONE".into(),
            chapter_number: index + 1,
            start_line: start,
            end_line: end,
        }
    }

    #[test]
    fn test_slice_by_line_range() {
        let text = "BOOK ONE\nCHAPTER I\nWell, Prince.\nCHAPTER II\nAnna Pavlovna smiled.\nThe end.";
        let map = ChapterMap::new(vec![chapter(0, 2, 3), chapter(1, 4, 6)]);
        assert!(map.validate().is_ok());

        assert_eq!(map.slice(text, 0).unwrap(), "CHAPTER I\nWell, Prince.");
        assert_eq!(map.slice(text, 1).unwrap(), "CHAPTER II\nAnna Pavlovna smiled.\nThe end.");
        assert_eq!(map.slice(text, 2), Err(ChapterMapError::UnknownChapter(2)));
        assert_eq!(map.get(1).map(ChapterBoundary::line_count), Some(3));
    }

    #[test]
    fn test_slice_past_end() {
        let map = ChapterMap::new(vec![chapter(0, 1, 10)]);
        assert!(matches!(map.slice("one line", 0), Err(ChapterMapError::PastEnd { .. })));
    }

    #[test]
    fn test_validate_rejects_gaps_and_overlaps() {
        let gap = ChapterMap::new(vec![chapter(0, 1, 2), chapter(2, 3, 4)]);
        assert_eq!(
            gap.validate(),
            Err(ChapterMapError::NonContiguous { position: 1, found: 2 })
        );

        let overlap = ChapterMap::new(vec![chapter(0, 1, 5), chapter(1, 5, 8)]);
        assert_eq!(overlap.validate(), Err(ChapterMapError::Overlap { index: 1 }));

        let inverted = ChapterMap::new(vec![chapter(0, 4, 2)]);
        assert!(matches!(inverted.validate(), Err(ChapterMapError::BadRange { .. })));
    }

    #[test]
    fn test_books() {
        let map = ChapterMap::new(vec![chapter(0, 2, 3)]).with_books(vec![BookBoundary {
            index: 0,
            title: "BOOK ONE".into(),
            start_line: 1,
            end_line: 3,
        }]);
        assert!(map.validate().is_ok());
        assert_eq!(map.book_of(0).map(|b| b.title.as_str()), Some("BOOK ONE"));

        let orphan = ChapterMap::new(vec![ChapterBoundary {
            book_index: 3,
            ..chapter(0, 2, 3)
        }])
        .with_books(map.books.clone());
        assert_eq!(
            orphan.validate(),
            Err(ChapterMapError::UnknownBook { index: 0, book: 3 })
        );
    }
}
