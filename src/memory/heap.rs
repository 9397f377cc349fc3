/*
 * Kernel Heap Allocator
 *
 * Dynamic allocation for the kernel, built on the linked_list_allocator
 * crate over a fixed arena in .bss. There is no paging layer here; the
 * arena is plain kernel memory.
 *
 * The allocator is guarded by interrupt masking rather than a spin lock.
 * Scheduler paths allocate and free with interrupts disabled (thread
 * reaping happens inside the dispatcher), and on a single CPU a spin lock
 * held across a preemption would deadlock the very interrupt that tried
 * to allocate. Masking the flag around every heap operation makes
 * alloc/dealloc atomic with respect to the tick handler.
 *
 * Thread stacks are 64 KiB allocations aligned to their own size, so the
 * arena is generous: 16 MiB supports the full thread table plus ordinary
 * kernel data.
 */

use core::alloc::{GlobalAlloc, Layout};
use core::cell::UnsafeCell;
use core::ptr::{self, NonNull};

use linked_list_allocator::Heap;

use crate::arch::x86_64::interrupts;

/// Size of the kernel heap arena.
pub const HEAP_SIZE: usize = 16 * 1024 * 1024;

#[repr(C, align(4096))]
struct HeapArena([u8; HEAP_SIZE]);

static mut ARENA: HeapArena = HeapArena([0; HEAP_SIZE]);

/// Heap with interrupt masking as its exclusion mechanism.
struct IntrHeap(UnsafeCell<Heap>);

// Safety: single CPU; every access goes through `without_interrupts`.
unsafe impl Sync for IntrHeap {}

unsafe impl GlobalAlloc for IntrHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        interrupts::without_interrupts(|| {
            let heap = unsafe { &mut *self.0.get() };
            heap.allocate_first_fit(layout)
                .map(NonNull::as_ptr)
                .unwrap_or(ptr::null_mut())
        })
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        interrupts::without_interrupts(|| {
            let heap = unsafe { &mut *self.0.get() };
            unsafe { heap.deallocate(NonNull::new_unchecked(ptr), layout) };
        });
    }
}

#[global_allocator]
static ALLOCATOR: IntrHeap = IntrHeap(UnsafeCell::new(Heap::empty()));

/// Initialize the heap over the static arena.
///
/// Must be called exactly once, before the first allocation.
pub fn init() {
    let bottom = &raw mut ARENA as *mut u8;
    interrupts::without_interrupts(|| unsafe {
        (*ALLOCATOR.0.get()).init(bottom, HEAP_SIZE);
    });
    log::info!("Kernel heap initialized ({} KiB)", HEAP_SIZE / 1024);
}

/// Heap exhaustion is fatal in kernel context.
#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    panic!("kernel heap allocation failed: {:?}", layout);
}
