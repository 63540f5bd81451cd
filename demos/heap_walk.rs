use std::{io::Read, ptr};

use segfit::{Arena, Heap, HeapConfig, MemArena, logging::init_logging};

/// Waits until the user presses ENTER when started with `--pause`.
/// Useful to inspect the mapping with `pmap` or `gdb` between steps.
fn pause(enabled: bool) {
  if !enabled {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_arena(
  label: &str,
  heap: &Heap<MemArena>,
) {
  let stats = heap.stats();
  println!(
    "[{}] PID = {}, arena = {:#x}..{:#x} ({} bytes), {} allocated / {} free blocks",
    label,
    std::process::id(),
    heap.arena().low(),
    heap.arena().high(),
    stats.arena_bytes,
    stats.allocated_blocks,
    stats.free_blocks,
  );
}

fn print_alloc(
  heap: &Heap<MemArena>,
  requested: usize,
  ptr: *mut u8,
) {
  let usable = unsafe { heap.usable_size(ptr) }.unwrap_or(0);
  println!("  requested {requested:>6} bytes -> {ptr:?} (usable {usable})");
}

fn main() {
  init_logging();
  let paused = std::env::args().any(|arg| arg == "--pause");

  let arena = MemArena::with_capacity(1 << 20).expect("reserve arena");
  let mut heap = Heap::new(arena, HeapConfig::from_env()).expect("initialise heap");

  unsafe {
    print_arena("start", &heap);
    pause(paused);

    // 1) A single word.
    let first = heap.allocate(4).expect("allocate u32").as_ptr();
    println!("\n[1] Allocate u32");
    print_alloc(&heap, 4, first);
    (first as *mut u32).write(0xDEADBEEF);
    println!("[1] Value written = 0x{:X}", (first as *mut u32).read());
    pause(paused);

    // 2) An odd size rounds up to a minimum block.
    let second = heap.allocate(12).expect("allocate [u8; 12]").as_ptr();
    println!("\n[2] Allocate [u8; 12]");
    print_alloc(&heap, 12, second);
    ptr::write_bytes(second, 0xAB, 12);
    pause(paused);

    // 3) A zeroed array.
    let third = heap.zero_allocate(16, 2).expect("allocate [u16; 16]").as_ptr();
    println!("\n[3] Zero-allocate [u16; 16]");
    print_alloc(&heap, 32, third);
    for i in 0..16 {
      (third as *mut u16).add(i).write(i as u16);
    }
    print_arena("after small allocations", &heap);
    pause(paused);

    // 4) Release the first block, then ask for something that fits in it.
    heap.release(first);
    println!("\n[4] Released {first:?}");
    let fourth = heap.allocate(2).expect("allocate [u8; 2]").as_ptr();
    print_alloc(&heap, 2, fourth);
    println!(
      "[4] reused the released block? {}",
      if fourth == first { "yes" } else { "no" }
    );
    pause(paused);

    // 5) Grow the zeroed array; the prefix survives wherever it lands.
    let grown = heap.reallocate(third, 600).expect("reallocate").as_ptr();
    println!("\n[5] Reallocate [u16; 16] to 600 bytes");
    print_alloc(&heap, 600, grown);
    println!("[5] element 15 = {}", (grown as *mut u16).add(15).read());
    pause(paused);

    // 6) A large block forces the arena to grow.
    print_arena("before large allocation", &heap);
    let big = heap.allocate(64 * 1024).expect("allocate 64 KiB").as_ptr();
    println!("\n[6] Allocate 64 KiB");
    print_alloc(&heap, 64 * 1024, big);
    print_arena("after large allocation", &heap);
    pause(paused);

    // 7) Release everything; neighbours merge back together.
    for ptr in [second, fourth, grown, big] {
      heap.release(ptr);
    }
    print_arena("after releasing everything", &heap);
  }

  match heap.check_heap(true) {
    Ok(()) => println!("\n[7] Heap is consistent."),
    Err(corruption) => println!("\n[7] Heap corrupted: {corruption}"),
  }
}
