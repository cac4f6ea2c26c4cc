//! Process-wide native driver capabilities
//!
//! Each backend crate keeps one `static` [`DriverCell`] holding its driver
//! settings. The cell is initialized on first use and read-only afterwards;
//! adapters receive a `&'static` reference to it, or any other driver value
//! the caller injects.

use once_cell::sync::OnceCell;
use tracing::debug;

pub struct DriverCell<D> {
    name: &'static str,
    cell: OnceCell<D>,
}

impl<D> DriverCell<D> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            cell: OnceCell::new(),
        }
    }

    /// Get the driver, running `init` exactly once per process
    pub fn get_or_init(&self, init: impl FnOnce() -> D) -> &D {
        self.cell.get_or_init(|| {
            debug!("Initializing {} driver", self.name);
            init()
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static INITS: AtomicUsize = AtomicUsize::new(0);
    static CELL: DriverCell<u32> = DriverCell::new("test");

    #[test]
    fn test_driver_initialized_once() {
        for _ in 0..3 {
            let value = CELL.get_or_init(|| {
                INITS.fetch_add(1, Ordering::SeqCst);
                7
            });
            assert_eq!(*value, 7);
        }

        assert!(CELL.is_initialized());
        assert_eq!(INITS.load(Ordering::SeqCst), 1);
        assert_eq!(CELL.name(), "test");
    }
}
