//! Packet filter pipeline.
//!
//! A host interface forwards frames between its physical-side socket and
//! its tap device through two [`TrafficFilterPipes`], one per direction.
//! Filters are visited in ascending priority; the first one that does not
//! answer [`FilterStatus::Continue`] ends the dispatch.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{MacsecError, MacsecResult};

/// Verdict of a single filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    /// Pass the frame on to the next filter, or the default path.
    Continue,
    /// The frame has been handled; stop the pipeline.
    Terminate,
    /// The filter failed; stop the pipeline.
    Error,
}

/// Ordering key of a filter within one pipeline. Lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FilterPriority(pub i32);

impl FilterPriority {
    /// Slot reserved for MACsec interception.
    pub const MACSEC: FilterPriority = FilterPriority(0);
}

impl fmt::Display for FilterPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inspects and possibly rewrites one frame.
///
/// `buffer` is the whole receive allocation and `length` the number of
/// valid bytes in it; a filter may change `length` as long as it stays
/// within `buffer.len()`.
pub trait TrafficFilter: Send + Sync {
    /// Runs the filter over the first `*length` bytes of `buffer`.
    fn execute(&self, buffer: &mut [u8], length: &mut usize) -> FilterStatus;
}

/// Priority-ordered set of filters guarded by a single lock.
///
/// The lock is held for the whole of [`execute`](Self::execute), so
/// installs and uninstalls never interleave with a dispatch.
#[derive(Default)]
pub struct TrafficFilterPipes {
    filters: Mutex<BTreeMap<FilterPriority, Arc<dyn TrafficFilter>>>,
}

impl TrafficFilterPipes {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `filter` at `priority`.
    ///
    /// An occupied slot is rejected with [`MacsecError::FilterConflict`] and
    /// the filter already there stays in place.
    pub fn install_filter(
        &self,
        priority: FilterPriority,
        filter: Arc<dyn TrafficFilter>,
    ) -> MacsecResult<()> {
        let mut filters = self.filters.lock();

        if filters.contains_key(&priority) {
            warn!(priority = %priority, "Filter priority already occupied");
            return Err(MacsecError::FilterConflict {
                priority: priority.0,
            });
        }

        filters.insert(priority, filter);
        debug!(priority = %priority, "Installed traffic filter");
        Ok(())
    }

    /// Removes `filter` wherever it is installed.
    ///
    /// Returns false if it was not installed.
    pub fn uninstall_filter(&self, filter: &Arc<dyn TrafficFilter>) -> bool {
        let mut filters = self.filters.lock();

        let priority = filters
            .iter()
            .find(|(_, installed)| Arc::ptr_eq(installed, filter))
            .map(|(priority, _)| *priority);

        match priority {
            Some(priority) => {
                filters.remove(&priority);
                debug!(priority = %priority, "Uninstalled traffic filter");
                true
            }
            None => false,
        }
    }

    /// Dispatches one frame through every filter in priority order.
    pub fn execute(&self, buffer: &mut [u8], length: &mut usize) -> FilterStatus {
        let filters = self.filters.lock();

        for filter in filters.values() {
            let status = filter.execute(buffer, length);
            if status != FilterStatus::Continue {
                return status;
            }
        }

        FilterStatus::Continue
    }

    /// Number of installed filters.
    pub fn len(&self) -> usize {
        self.filters.lock().len()
    }

    /// Returns true if no filter is installed.
    pub fn is_empty(&self) -> bool {
        self.filters.lock().is_empty()
    }
}

impl fmt::Debug for TrafficFilterPipes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let priorities: Vec<FilterPriority> = self.filters.lock().keys().copied().collect();
        f.debug_struct("TrafficFilterPipes")
            .field("priorities", &priorities)
            .finish()
    }
}
