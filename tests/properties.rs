//! Random operation sequences must keep the heap consistent and never clobber
//! live data.

use proptest::prelude::*;
use segalloc::{Address, Allocator, LAYOUT_SIZE};

#[derive(Clone, Debug)]
enum Op {
  Allocate(usize),
  Release(usize),
  Reallocate(usize, usize),
  AllocateZeroed(usize, usize),
}

fn op() -> impl Strategy<Value = Op> {
  prop_oneof![
    4 => (1usize..3000).prop_map(Op::Allocate),
    3 => any::<usize>().prop_map(Op::Release),
    2 => (any::<usize>(), 0usize..3000).prop_map(|(slot, size)| Op::Reallocate(slot, size)),
    1 => (1usize..32, 1usize..64).prop_map(|(count, size)| Op::AllocateZeroed(count, size)),
  ]
}

struct Live {
  ptr: Address,
  size: usize,
  fill: u8,
}

fn assert_intact(
  heap: &Allocator<segalloc::VecArena>,
  live: &[Live],
) {
  for entry in live {
    assert!(
      heap.payload(entry.ptr, entry.size).iter().all(|&byte| byte == entry.fill),
      "payload at {} clobbered",
      entry.ptr
    );
  }
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(64))]

  #[test]
  fn heap_stays_consistent(ops in proptest::collection::vec(op(), 1..200)) {
    let mut heap = Allocator::with_capacity(1 << 24).unwrap();
    let mut live: Vec<Live> = Vec::new();

    for (step, op) in ops.into_iter().enumerate() {
      let fill = (step % 255) as u8 + 1;

      match op {
        Op::Allocate(size) => {
          let ptr = heap.allocate(size).unwrap();
          prop_assert_eq!(ptr.offset() % 8, 0);
          heap.payload_mut(ptr, size).fill(fill);
          live.push(Live { ptr, size, fill });
        }
        Op::Release(slot) if !live.is_empty() => {
          let entry = live.swap_remove(slot % live.len());
          heap.release(entry.ptr);
        }
        Op::Reallocate(slot, size) if !live.is_empty() => {
          let entry = live.swap_remove(slot % live.len());
          match heap.reallocate(Some(entry.ptr), size) {
            Some(ptr) => {
              let kept = entry.size.min(size);
              prop_assert!(heap.payload(ptr, kept).iter().all(|&byte| byte == entry.fill));
              heap.payload_mut(ptr, size).fill(fill);
              live.push(Live { ptr, size, fill });
            }
            None => prop_assert_eq!(size, 0),
          }
        }
        Op::AllocateZeroed(count, size) => {
          let ptr = heap.allocate_zeroed(count, size).unwrap();
          prop_assert!(heap.payload(ptr, count * size).iter().all(|&byte| byte == 0));
          heap.payload_mut(ptr, count * size).fill(fill);
          live.push(Live { ptr, size: count * size, fill });
        }
        _ => {}
      }

      let report = heap.check_heap();
      prop_assert!(report.is_consistent(), "step {}: {:?}", step, report.issues);
      prop_assert_eq!(report.allocated_blocks, live.len());
      assert_intact(&heap, &live);
    }

    for entry in live.drain(..) {
      heap.release(entry.ptr);
    }

    let blocks: Vec<_> = heap.blocks().collect();
    prop_assert_eq!(blocks.len(), 1);
    prop_assert_eq!(blocks[0].size, heap.heap_size() - LAYOUT_SIZE);
  }

  #[test]
  fn usable_size_covers_request(size in 1usize..100_000) {
    let mut heap = Allocator::with_capacity(1 << 20).unwrap();
    let ptr = heap.allocate(size).unwrap();
    let usable = heap.usable_size(ptr);

    prop_assert!(usable >= size);
    prop_assert!(usable - size < 16);
  }
}
