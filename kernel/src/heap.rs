//! Kernel heap.
//!
//! A `linked_list_allocator::Heap` over a fixed region in `.bss`. Freed
//! blocks go back on the free list, so the stacks and control blocks of
//! reclaimed threads are reused by the next `create_thread`.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

use linked_list_allocator::Heap;
use spin::Mutex;

/// 4 MiB: room for ~120 threads at the default 32 KiB stack.
const HEAP_SIZE: usize = 4 * 1024 * 1024;

#[repr(C, align(4096))]
struct HeapArea([u8; HEAP_SIZE]);

static mut HEAP_AREA: HeapArea = HeapArea([0; HEAP_SIZE]);

#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator {
	heap: Mutex::new(Heap::empty()),
};

struct KernelAllocator {
	heap: Mutex<Heap>,
}

unsafe impl GlobalAlloc for KernelAllocator {
	unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
		// Interrupts off: a handler that allocated while we hold the lock
		// would spin forever.
		khal::cpu::without_interrupts(|| {
			self.heap
				.lock()
				.allocate_first_fit(layout)
				.map_or(ptr::null_mut(), |block| block.as_ptr())
		})
	}

	unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
		let Some(block) = NonNull::new(ptr) else {
			return;
		};
		khal::cpu::without_interrupts(|| unsafe {
			self.heap.lock().deallocate(block, layout);
		});
	}
}

/// Hand the heap region to the allocator. Call once, before any allocation.
pub fn init() {
	let start = &raw mut HEAP_AREA;
	// SAFETY: the region is static, unused by anything else, and init runs
	// once on the boot thread.
	unsafe {
		ALLOCATOR.heap.lock().init(start.cast::<u8>(), HEAP_SIZE);
	}
	klog::debug!("heap: {} KiB at {:p}", HEAP_SIZE / 1024, start);
}

/// Bytes currently handed out.
pub fn used() -> usize {
	khal::cpu::without_interrupts(|| ALLOCATOR.heap.lock().used())
}
