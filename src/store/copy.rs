//! Copy-on-Read / Copy-on-Write
//!
//! Elements share their value buffers by default. When a tier pair is
//! configured to copy, values handed in by callers and values handed back
//! to them are detached from whatever the tiers hold.

use std::sync::Arc;

use super::codec;
use super::element::Element;
use crate::error::Result;

/// Produces independent element copies
pub trait CopyStrategy: Send + Sync {
    /// Copy an element on its way into storage
    fn copy_for_write(&self, element: &Element) -> Result<Element>;

    /// Copy a stored element on its way back to a caller
    fn copy_for_read(&self, element: &Element) -> Result<Element>;
}

/// Deep copy through the element record codec
///
/// The decoded value owns a freshly allocated buffer, so no copy shares
/// memory with its source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerializationCopyStrategy;

impl CopyStrategy for SerializationCopyStrategy {
    fn copy_for_write(&self, element: &Element) -> Result<Element> {
        codec::decode(&codec::encode(element)?)
    }

    fn copy_for_read(&self, element: &Element) -> Result<Element> {
        codec::decode(&codec::encode(element)?)
    }
}

/// Which directions copy, and with what strategy
#[derive(Clone)]
pub struct CopyPolicy {
    copy_on_read: bool,
    copy_on_write: bool,
    strategy: Arc<dyn CopyStrategy>,
}

impl CopyPolicy {
    pub fn new(copy_on_read: bool, copy_on_write: bool, strategy: Arc<dyn CopyStrategy>) -> Self {
        Self {
            copy_on_read,
            copy_on_write,
            strategy,
        }
    }

    /// No copying in either direction
    pub fn none() -> Self {
        Self::new(false, false, Arc::new(SerializationCopyStrategy))
    }

    pub fn copy_on_read(&self) -> bool {
        self.copy_on_read
    }

    pub fn copy_on_write(&self) -> bool {
        self.copy_on_write
    }

    /// Element to hand back to a caller
    ///
    /// With both switches on, stored elements were already copied for write
    /// and only need the read half. With only copy-on-read, the stored
    /// element is the caller's original, so the full round trip is made.
    pub fn for_read(&self, element: Element) -> Result<Element> {
        match (self.copy_on_read, self.copy_on_write) {
            (true, true) => self.strategy.copy_for_read(&element),
            (true, false) => self
                .strategy
                .copy_for_read(&self.strategy.copy_for_write(&element)?),
            _ => Ok(element),
        }
    }

    /// Element to store on behalf of a caller
    pub fn for_write(&self, element: Element) -> Result<Element> {
        match (self.copy_on_read, self.copy_on_write) {
            (true, true) => self.strategy.copy_for_write(&element),
            (false, true) => self
                .strategy
                .copy_for_read(&self.strategy.copy_for_write(&element)?),
            _ => Ok(element),
        }
    }
}

impl std::fmt::Debug for CopyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyPolicy")
            .field("copy_on_read", &self.copy_on_read)
            .field("copy_on_write", &self.copy_on_write)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
