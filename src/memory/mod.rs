pub mod heap;

/// Initialize kernel memory management.
pub fn init() {
    heap::init();
}
