//! Capability traits for splittable, finite sources.
//!
//! An execution framework only needs three things from a source: how big it is, how to cut
//! it into independent pieces, and a reader per piece. [`BoundedSource`] and
//! [`BoundedReader`] describe exactly that, with no framework types leaking in.
//!
//! Readers follow a pull protocol:
//!
//! ```text
//! start() -> true?  current()  advance() -> true?  current()  ...  advance() -> false
//! close()  (always, on every exit path)
//! ```
//!
//! [`Documents`] wraps that protocol into a plain [`Iterator`].

use crate::error::{MongoIOError, MongoResult};

/// A finite data set that can be split into independent sub-sources.
pub trait BoundedSource: Send + Sync + Sized {
    type Output;
    type Reader: BoundedReader<Output = Self::Output>;

    /// Approximate size of the data in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn estimated_size_bytes(&self) -> MongoResult<u64>;

    /// Split into sub-sources of roughly `desired_bundle_size_bytes` each.
    ///
    /// The returned sources are disjoint and together cover `self`. Returning `vec![self]`
    /// is a valid answer.
    ///
    /// # Errors
    ///
    /// Returns an error if split points cannot be computed.
    fn split(&self, desired_bundle_size_bytes: u64) -> MongoResult<Vec<Self>>;

    /// A reader over this source. Must not perform I/O.
    fn create_reader(&self) -> Self::Reader;
}

/// Pull-based reader over one [`BoundedSource`].
pub trait BoundedReader: Send {
    type Output;

    /// Acquire resources and position on the first element.
    ///
    /// Returns `false` if the source is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if resources cannot be acquired or the reader was already started.
    fn start(&mut self) -> MongoResult<bool>;

    /// Move to the next element. Returns `false` once exhausted, and keeps returning `false`.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails or the reader was never started.
    fn advance(&mut self) -> MongoResult<bool>;

    /// The element the last successful `start`/`advance` positioned on.
    fn current(&self) -> Option<&Self::Output>;

    /// Release every resource. Never fails and may be called in any state, any number of
    /// times.
    fn close(&mut self);
}

/// Iterator adapter over a [`BoundedReader`].
///
/// Starts the reader on the first call to `next`, and closes it when the reader is
/// exhausted, when a fetch fails, or when the iterator is dropped.
pub struct Documents<R: BoundedReader> {
    reader: R,
    started: bool,
    done: bool,
}

impl<R: BoundedReader> Documents<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            started: false,
            done: false,
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.reader.close();
    }
}

impl<R> Iterator for Documents<R>
where
    R: BoundedReader,
    R::Output: Clone,
{
    type Item = MongoResult<R::Output>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = if self.started {
            self.reader.advance()
        } else {
            self.started = true;
            self.reader.start()
        };
        match step {
            Ok(true) => match self.reader.current().cloned() {
                Some(item) => Some(Ok(item)),
                None => {
                    self.finish();
                    Some(Err(MongoIOError::invalid_state(
                        "reader reported an element but has none",
                    )))
                }
            },
            Ok(false) => {
                self.finish();
                None
            }
            Err(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }
}

impl<R: BoundedReader> Drop for Documents<R> {
    fn drop(&mut self) {
        if !self.done {
            self.reader.close();
        }
    }
}
