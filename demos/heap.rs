use std::io::Read;

use segalloc::{Address, Allocator, AllocatorConfig, MmapArena, SizeClass};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect the process with tools like `pmap` or
/// `gdb` between steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints every block between the prologue and the epilogue.
fn print_heap(
  label: &str,
  heap: &Allocator<MmapArena>,
) {
  println!("\n[{}] heap size = {} bytes", label, heap.heap_size());
  for block in heap.blocks() {
    println!("  {}", block);
  }
}

/// Prints an allocation, both as an arena offset and as a real address.
fn print_alloc(
  heap: &Allocator<MmapArena>,
  size: usize,
  ptr: Address,
) {
  let real = heap.arena().as_ptr() as usize + ptr.offset();
  println!(
    "Allocated {} bytes at offset {} ({:#x}), usable = {}, aligned = {}",
    size,
    ptr,
    real,
    heap.usable_size(ptr),
    real % 8 == 0,
  );
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::TRACE)
    .init();

  let arena = MmapArena::new(1 << 24).expect("failed to map arena");
  let mut heap = Allocator::new(arena, AllocatorConfig::default()).expect("invalid config");

  // --------------------------------------------------------------------
  // 0) Lay out the prologue, root table and epilogue, plus the first
  //    free block of 4096 bytes.
  // --------------------------------------------------------------------
  heap.init().expect("failed to initialise heap");
  print_heap("init", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Three small allocations. Each one splits the big free block.
  // --------------------------------------------------------------------
  let first = heap.allocate(4).expect("allocate");
  print_alloc(&heap, 4, first);
  heap.payload_mut(first, 4).copy_from_slice(&0xDEADBEEFu32.to_le_bytes());

  let second = heap.allocate(12).expect("allocate");
  print_alloc(&heap, 12, second);
  heap.payload_mut(second, 12).fill(0xAB);

  let third = heap.allocate(100).expect("allocate");
  print_alloc(&heap, 100, third);

  print_heap("after three allocations", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Release the first block. It can't merge with anything, so it is
  //    filed in the smallest class on its own.
  // --------------------------------------------------------------------
  heap.release(first);
  println!("\n[2] Released {}", first);
  let listed: Vec<_> = heap.free_list(SizeClass::of(16)).collect();
  println!("[2] class 0 free list = {:?}", listed);
  print_heap("after release", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) A 2-byte request reuses the freed block.
  // --------------------------------------------------------------------
  let reused = heap.allocate(2).expect("allocate");
  print_alloc(&heap, 2, reused);
  println!(
    "[3] reused == first? {}",
    if reused == first {
      "Yes, it reused the freed block"
    } else {
      "No, it allocated somewhere else"
    }
  );
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Release the second block: its neighbours are allocated, then
  //    releasing the reused one merges both into a single free block.
  // --------------------------------------------------------------------
  heap.release(second);
  heap.release(reused);
  print_heap("after merging", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Grow a block with reallocate. The data moves, the prefix survives.
  // --------------------------------------------------------------------
  heap.payload_mut(third, 5).copy_from_slice(b"hello");
  let grown = heap.reallocate(Some(third), 1000).expect("reallocate");
  println!(
    "\n[5] Moved {} -> {}, prefix = {:?}",
    third,
    grown,
    String::from_utf8_lossy(heap.payload(grown, 5)),
  );
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 6) A 64 KiB request doesn't fit anywhere, so the arena grows.
  // --------------------------------------------------------------------
  let before = heap.heap_size();
  let big = heap.allocate(64 * 1024).expect("allocate");
  print_alloc(&heap, 64 * 1024, big);
  println!("[6] heap grew from {} to {} bytes", before, heap.heap_size());
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 7) Check the heap and finish. The mapping is released on drop.
  // --------------------------------------------------------------------
  let report = heap.check_heap();
  println!(
    "\n[7] consistent = {}, {} allocated, {} free ({} bytes)",
    report.is_consistent(),
    report.allocated_blocks,
    report.free_blocks_physical,
    report.free_bytes,
  );
}
