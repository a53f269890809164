use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use proptest::test_runner::TestCaseResult;

use crate::{
    BlockGeometry, Controller, ControllerConfig, Device, InMemoryNamespace, RamdiskConfig,
    RamdiskError, RequestToken, Result, Transaction, VecRegion,
};

#[derive(Debug, Clone)]
enum Op {
    Write { offset: u64, data: Vec<u8> },
    Read { offset: u64, len: u64 },
    WriteAsync { offset: u64, data: Vec<u8> },
    ReadAsync { offset: u64, len: u64 },
}

const MAX_RW_LEN: usize = 3 * 4096;
const MAX_OPS: usize = 32;

fn block_size_strategy() -> impl Strategy<Value = u64> {
    // Non-power-of-two sizes catch mask-based alignment shortcuts.
    prop_oneof![Just(1u64), Just(512u64), Just(520u64), Just(4096u64)]
}

fn chunk_size_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![Just(7usize), Just(1000usize), Just(4096usize)]
}

fn offset_strategy(block_size: u64, capacity: u64) -> BoxedStrategy<u64> {
    let blocks = capacity / block_size;
    prop_oneof![
        4 => (0..=blocks).prop_map(move |b| b * block_size),
        1 => 0..=capacity + block_size,
        1 => Just(capacity),
        1 => any::<u64>(),
    ]
    .boxed()
}

fn len_strategy(block_size: u64) -> BoxedStrategy<u64> {
    let max_blocks = (MAX_RW_LEN as u64 / block_size).max(1);
    prop_oneof![
        4 => (0..=max_blocks).prop_map(move |b| b * block_size),
        1 => 0..=MAX_RW_LEN as u64,
    ]
    .boxed()
}

fn data_strategy(block_size: u64) -> BoxedStrategy<Vec<u8>> {
    len_strategy(block_size)
        .prop_flat_map(|len| prop::collection::vec(any::<u8>(), len as usize..=len as usize))
        .boxed()
}

fn op_strategy(block_size: u64, capacity: u64) -> BoxedStrategy<Op> {
    prop_oneof![
        (offset_strategy(block_size, capacity), data_strategy(block_size))
            .prop_map(|(offset, data)| Op::Write { offset, data }),
        (offset_strategy(block_size, capacity), len_strategy(block_size))
            .prop_map(|(offset, len)| Op::Read { offset, len }),
        (offset_strategy(block_size, capacity), data_strategy(block_size))
            .prop_map(|(offset, data)| Op::WriteAsync { offset, data }),
        (offset_strategy(block_size, capacity), len_strategy(block_size))
            .prop_map(|(offset, len)| Op::ReadAsync { offset, len }),
    ]
    .boxed()
}

fn case_strategy() -> impl Strategy<Value = (u64, u64, usize, Vec<Op>)> {
    (block_size_strategy(), 1u64..=16, chunk_size_strategy()).prop_flat_map(
        |(block_size, block_count, chunk_size)| {
            let capacity = block_size * block_count;
            (
                Just(block_size),
                Just(block_count),
                Just(chunk_size),
                prop::collection::vec(op_strategy(block_size, capacity), 1..=MAX_OPS),
            )
        },
    )
}

/// Reference behaviour of the offset/length rules, written independently of the device.
fn model_constrain(block_size: u64, capacity: u64, offset: u64, len: u64) -> Option<u64> {
    if offset % block_size != 0 {
        return None;
    }
    let len = if offset >= capacity {
        0
    } else {
        len.min(capacity - offset)
    };
    (len % block_size == 0).then_some(len)
}

type Completions = Arc<Mutex<Vec<(RequestToken, Result<u64>)>>>;

fn setup(block_size: u64, block_count: u64, chunk_size: usize) -> (Arc<Device>, Completions) {
    let ctl = Controller::new(
        ControllerConfig {
            chunk_size,
            ..ControllerConfig::default()
        },
        Arc::new(InMemoryNamespace::new()),
    )
    .unwrap();
    let dev = ctl
        .configure(&RamdiskConfig::new("prop", block_size, block_count))
        .unwrap();

    let completions: Completions = Arc::default();
    let sink_completions = completions.clone();
    dev.set_completion_sink(Arc::new(move |token: RequestToken, status: Result<u64>| {
        sink_completions.lock().unwrap().push((token, status));
    }))
    .unwrap();
    (dev, completions)
}

fn last_completion(completions: &Completions, token: RequestToken) -> Result<u64> {
    let log = completions.lock().unwrap();
    let (got, status) = log.last().cloned().expect("sink not invoked");
    assert_eq!(got, token);
    status
}

fn check_whole_disk(dev: &Device, model: &[u8]) -> TestCaseResult {
    let mut txn = Transaction::read(0, model.len());
    let c = dev.submit(&mut txn);
    prop_assert_eq!(c.actual, model.len() as u64);
    prop_assert!(txn.data == model, "device contents diverged from model");
    Ok(())
}

fn run_ops(block_size: u64, block_count: u64, chunk_size: usize, ops: Vec<Op>) -> TestCaseResult {
    let (dev, completions) = setup(block_size, block_count, chunk_size);
    let capacity = block_size * block_count;
    let mut model = vec![0u8; capacity as usize];
    let mut async_ops = 0usize;

    for (i, op) in ops.into_iter().enumerate() {
        let token = i as RequestToken;
        match op {
            Op::Write { offset, data } => {
                let expected = model_constrain(block_size, capacity, offset, data.len() as u64);
                let mut txn = Transaction::write(offset, data.clone());
                let c = dev.submit(&mut txn);
                match expected {
                    Some(len) => {
                        prop_assert_eq!(c.status, Ok(()));
                        prop_assert_eq!(c.actual, len);
                        prop_assert_eq!(txn.length, len);
                        if len > 0 {
                            let (o, l) = (offset as usize, len as usize);
                            model[o..o + l].copy_from_slice(&data[..l]);
                        }
                    }
                    None => {
                        prop_assert!(c.status.is_err());
                        prop_assert_eq!(c.actual, 0);
                    }
                }
            }
            Op::Read { offset, len } => {
                let expected = model_constrain(block_size, capacity, offset, len);
                let mut txn = Transaction::read(offset, len as usize);
                let c = dev.submit(&mut txn);
                match expected {
                    Some(got) => {
                        prop_assert_eq!(c.actual, got);
                        if got > 0 {
                            let (o, l) = (offset as usize, got as usize);
                            prop_assert!(txn.transferred() == &model[o..o + l]);
                        }
                    }
                    None => prop_assert!(c.status.is_err()),
                }
            }
            Op::WriteAsync { offset, data } => {
                let expected = model_constrain(block_size, capacity, offset, data.len() as u64);
                async_ops += 1;
                let region = VecRegion::from_vec(data.clone());
                dev.write_async(&region, data.len() as u64, 0, offset, token)
                    .unwrap();
                let status = last_completion(&completions, token);
                match expected {
                    Some(len) => {
                        prop_assert_eq!(status, Ok(len));
                        if len > 0 {
                            let (o, l) = (offset as usize, len as usize);
                            model[o..o + l].copy_from_slice(&data[..l]);
                        }
                    }
                    None => prop_assert!(status.is_err()),
                }
            }
            Op::ReadAsync { offset, len } => {
                let expected = model_constrain(block_size, capacity, offset, len);
                async_ops += 1;
                let region = VecRegion::new(len as usize);
                dev.read_async(&region, len, 0, offset, token).unwrap();
                let status = last_completion(&completions, token);
                match expected {
                    Some(got) => {
                        prop_assert_eq!(status, Ok(got));
                        if got > 0 {
                            let (o, l) = (offset as usize, got as usize);
                            prop_assert!(region.to_vec()[..l] == model[o..o + l]);
                        }
                    }
                    None => prop_assert!(status.is_err()),
                }
            }
        }
    }

    // Exactly one completion per async request.
    prop_assert_eq!(completions.lock().unwrap().len(), async_ops);

    check_whole_disk(&dev, &model)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn unaligned_offsets_are_always_rejected(
        block_size in 2u64..=8192,
        block_count in 1u64..=64,
        offset in any::<u64>(),
        len in any::<u64>(),
    ) {
        prop_assume!(offset % block_size != 0);
        let geometry = BlockGeometry::new(block_size, block_count).unwrap();
        let is_unaligned = matches!(
            geometry.constrain(offset, len),
            Err(RamdiskError::UnalignedOffset { .. })
        );
        prop_assert!(is_unaligned);
    }

    #[test]
    fn oversized_lengths_clamp_to_the_end(
        block_size in 1u64..=8192,
        block_count in 1u64..=64,
        start_block in 0u64..64,
        extra in 1u64..=u64::MAX / 2,
    ) {
        let geometry = BlockGeometry::new(block_size, block_count).unwrap();
        let capacity = geometry.capacity_bytes();
        let offset = (start_block % block_count) * block_size;
        let len = (capacity - offset).saturating_add(extra);

        let range = geometry.constrain(offset, len).unwrap();
        prop_assert_eq!(range.offset(), offset);
        prop_assert_eq!(range.len(), capacity - offset);
    }

    #[test]
    fn accepted_ranges_stay_in_bounds(
        block_size in 1u64..=8192,
        block_count in 1u64..=64,
        offset in any::<u64>(),
        len in any::<u64>(),
    ) {
        let geometry = BlockGeometry::new(block_size, block_count).unwrap();
        if let Ok(range) = geometry.constrain(offset, len) {
            prop_assert_eq!(range.offset() % block_size, 0);
            prop_assert_eq!(range.len() % block_size, 0);
            if !range.is_empty() {
                prop_assert!(range.offset() + range.len() <= geometry.capacity_bytes());
            }
        }
    }

    #[test]
    fn device_matches_reference_model(
        (block_size, block_count, chunk_size, ops) in case_strategy()
    ) {
        run_ops(block_size, block_count, chunk_size, ops)?;
    }

    #[test]
    fn aligned_write_then_read_roundtrips(
        block_size in block_size_strategy(),
        block_count in 1u64..=16,
        start in 0u64..16,
        seed in any::<u8>(),
    ) {
        let (dev, _) = setup(block_size, block_count, 4096);
        let offset = (start % block_count) * block_size;
        let len = (block_count * block_size - offset) as usize;
        let data: Vec<u8> = (0..len).map(|i| seed.wrapping_add(i as u8)).collect();

        let mut w = Transaction::write(offset, data.clone());
        prop_assert_eq!(dev.submit(&mut w).actual, len as u64);

        let mut r = Transaction::read(offset, len);
        prop_assert_eq!(dev.submit(&mut r).actual, len as u64);
        prop_assert!(r.data == data);
    }
}
