//! Level-1 lookup index: page number → page.
//!
//! Small tables keep their page pointers inline in the table state, so no
//! allocation besides the pages themselves is ever made. Larger tables own a
//! growable array that starts empty and is replaced wholesale when it fills
//! up; the replacement is allocated by the caller outside the table lock and
//! handed to [`LookupIndex::install`].

use std::mem;

use crate::error::{Error, Result};
use crate::page::Page;

/// Page count up to which the index is stored inline.
pub const EMBEDDED_PAGES: usize = 16;

/// Number of page pointers a dynamic index grows by.
pub const LEVEL1_GROW_STEP: usize = 32;

pub(crate) enum LookupIndex<T> {
    Embedded {
        pages: [Option<Page<T>>; EMBEDDED_PAGES],
        len: usize,
    },
    Dynamic {
        pages: Vec<Page<T>>,
    },
}

impl<T> LookupIndex<T> {
    /// Picks the representation for a table of at most `max_pages` pages.
    pub(crate) fn for_capacity(max_pages: usize) -> Self {
        if max_pages <= EMBEDDED_PAGES {
            LookupIndex::Embedded {
                pages: [const { None }; EMBEDDED_PAGES],
                len: 0,
            }
        } else {
            LookupIndex::Dynamic { pages: Vec::new() }
        }
    }

    pub(crate) fn is_embedded(&self) -> bool {
        matches!(self, LookupIndex::Embedded { .. })
    }

    /// Number of installed pages.
    pub(crate) fn len(&self) -> usize {
        match self {
            LookupIndex::Embedded { len, .. } => *len,
            LookupIndex::Dynamic { pages } => pages.len(),
        }
    }

    /// Number of pages that can be installed without replacing the index.
    pub(crate) fn capacity(&self) -> usize {
        match self {
            LookupIndex::Embedded { .. } => EMBEDDED_PAGES,
            LookupIndex::Dynamic { pages } => pages.capacity(),
        }
    }

    #[inline]
    pub(crate) fn page(&self, number: usize) -> Option<&Page<T>> {
        match self {
            LookupIndex::Embedded { pages, len } => {
                if number < *len {
                    pages[number].as_ref()
                } else {
                    None
                }
            }
            LookupIndex::Dynamic { pages } => pages.get(number),
        }
    }

    #[inline]
    pub(crate) fn page_mut(&mut self, number: usize) -> Option<&mut Page<T>> {
        match self {
            LookupIndex::Embedded { pages, len } => {
                if number < *len {
                    pages[number].as_mut()
                } else {
                    None
                }
            }
            LookupIndex::Dynamic { pages } => pages.get_mut(number),
        }
    }

    /// Capacity the index must be replaced with before one more page fits,
    /// or `None` if there is room already.
    pub(crate) fn growth_target(&self, max_pages: usize) -> Option<usize> {
        match self {
            LookupIndex::Embedded { .. } => None,
            LookupIndex::Dynamic { pages } => {
                if pages.len() < pages.capacity() {
                    None
                } else {
                    Some((pages.capacity() + LEVEL1_GROW_STEP).min(max_pages))
                }
            }
        }
    }

    /// Allocates an empty replacement array able to hold `capacity` pages.
    pub(crate) fn reserve(capacity: usize) -> Result<Vec<Page<T>>> {
        let mut pages = Vec::new();
        pages
            .try_reserve_exact(capacity)
            .map_err(|_| Error::OutOfMemory)?;
        Ok(pages)
    }

    /// Appends `page`, switching to `replacement` first if one is given.
    ///
    /// Returns the retired array so that the caller can free it after
    /// dropping the lock. Nothing here allocates: the caller guarantees that
    /// either the current index has room or `replacement` does.
    pub(crate) fn install(
        &mut self,
        page: Page<T>,
        replacement: Option<Vec<Page<T>>>,
    ) -> Option<Vec<Page<T>>> {
        match self {
            LookupIndex::Embedded { pages, len } => {
                debug_assert!(replacement.is_none());
                debug_assert!(*len < EMBEDDED_PAGES);
                pages[*len] = Some(page);
                *len += 1;
                replacement
            }
            LookupIndex::Dynamic { pages } => {
                let retired = replacement.map(|mut fresh| {
                    debug_assert!(fresh.capacity() > pages.len());
                    fresh.append(pages);
                    mem::replace(pages, fresh)
                });
                debug_assert!(pages.len() < pages.capacity());
                pages.push(page);
                retired
            }
        }
    }

    /// Detaches every page, leaving an empty index behind.
    pub(crate) fn take_pages(&mut self) -> Vec<Page<T>> {
        match self {
            LookupIndex::Embedded { pages, len } => {
                *len = 0;
                pages.iter_mut().filter_map(Option::take).collect()
            }
            LookupIndex::Dynamic { pages } => mem::take(pages),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PAGE_CAPACITY;

    #[test]
    fn test_small_tables_embed() {
        let index = LookupIndex::<u64>::for_capacity(2);
        assert!(index.is_embedded());
        assert_eq!(index.capacity(), EMBEDDED_PAGES);
        assert_eq!(index.growth_target(2), None);

        let index = LookupIndex::<u64>::for_capacity(EMBEDDED_PAGES + 1);
        assert!(!index.is_embedded());
        assert_eq!(index.capacity(), 0);
    }

    #[test]
    fn test_embedded_install() {
        let mut index = LookupIndex::<u64>::for_capacity(4);
        assert!(index.page(0).is_none());

        let retired = index.install(Page::with_free_run(0).unwrap(), None);
        assert!(retired.is_none());
        assert_eq!(index.len(), 1);
        assert!(index.page(0).is_some());
        assert!(index.page(1).is_none());
    }

    #[test]
    fn test_dynamic_growth_replaces_array() {
        let max_pages = 40;
        let mut index = LookupIndex::<u64>::for_capacity(max_pages);
        assert_eq!(index.growth_target(max_pages), Some(LEVEL1_GROW_STEP));

        let fresh = LookupIndex::reserve(LEVEL1_GROW_STEP).unwrap();
        let retired = index.install(Page::with_free_run(0).unwrap(), Some(fresh));
        assert!(retired.is_some_and(|old| old.is_empty()));
        assert!(index.capacity() >= LEVEL1_GROW_STEP);
        assert_eq!(index.growth_target(max_pages), None);

        let retired = index.install(
            Page::with_free_run(PAGE_CAPACITY as u32).unwrap(),
            None,
        );
        assert!(retired.is_none());
        assert_eq!(index.len(), 2);
        assert!(index.page_mut(1).is_some());
    }

    #[test]
    fn test_growth_target_is_capped() {
        let index = LookupIndex::<u64>::Dynamic {
            pages: LookupIndex::reserve(0).unwrap(),
        };
        assert_eq!(index.growth_target(20), Some(20));
    }

    #[test]
    fn test_take_pages_empties_index() {
        let mut index = LookupIndex::<u64>::for_capacity(4);
        index.install(Page::with_free_run(0).unwrap(), None);
        index.install(Page::with_free_run(PAGE_CAPACITY as u32).unwrap(), None);

        let pages = index.take_pages();
        assert_eq!(pages.len(), 2);
        assert_eq!(index.len(), 0);
        assert!(index.page(0).is_none());
    }
}
