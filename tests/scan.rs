use fusible::{
    numeric, ArrayView, ExecContext, ExecPolicy, FuserConfig, FuserError, HostDeviceArray,
    LoopFuser,
};

const POLICIES: [ExecPolicy; 3] = [
    ExecPolicy::Sequential,
    ExecPolicy::Threaded,
    ExecPolicy::Device,
];

/// A[i] = i % 2 and B[i] = (i + 1) % 2.
fn alternating(size: usize) -> (HostDeviceArray<i32>, HostDeviceArray<i32>) {
    let a = HostDeviceArray::from_vec((0..size).map(|i| (i % 2) as i32).collect());
    let b = HostDeviceArray::from_vec((0..size).map(|i| ((i + 1) % 2) as i32).collect());
    (a, b)
}

fn sum(array: &HostDeviceArray<i32>, lo: usize, hi: usize) -> i32 {
    array.to_vec().unwrap()[lo..hi].iter().sum()
}

#[test]
fn test_basic_scan() {
    let size = 4;
    for policy in POLICIES {
        let ctx = policy.context();
        let (a, b) = alternating(size);
        let scans: Vec<HostDeviceArray<i32>> = (0..3).map(|_| HostDeviceArray::new(size)).collect();

        let mut fuser = LoopFuser::new(FuserConfig::default().with_policy(policy));
        let av = a.read_view(ctx).unwrap();
        let bv = b.read_view(ctx).unwrap();
        let outs: Vec<ArrayView<i32>> = scans.iter().map(|s| s.view(ctx).unwrap()).collect();

        let mut batch = fuser.start_batch().unwrap();
        batch.set_verbose(true);
        let a_pos = batch.accumulator(0);
        let b_pos = batch.accumulator(0);
        let ab_pos = batch.accumulator(0);
        let (a1, b1, a2, b2) = (av.clone(), bv.clone(), av, bv);
        let (o0, o1, o2) = (outs[0].clone(), outs[1].clone(), outs[2].clone());
        batch
            .register_scan(
                0..size,
                a_pos,
                move |ix| a1.get(ix.i) == 1,
                move |ix| unsafe { o0.set(ix.pos, 1) },
            )
            .unwrap();
        batch
            .register_scan(
                0..size,
                b_pos,
                move |ix| b1.get(ix.i) == 1,
                move |ix| unsafe { o1.set(ix.pos, 1) },
            )
            .unwrap();
        batch
            .register_scan(
                0..size,
                ab_pos,
                move |ix| a2.get(ix.i) == 1 || b2.get(ix.i) == 1,
                move |ix| unsafe { o2.set(ix.pos, 1) },
            )
            .unwrap();
        let outcome = batch.stop().unwrap();
        fuser.set_verbose(false);

        assert_eq!(sum(&scans[0], 0, size), 2, "{policy}");
        assert_eq!(sum(&scans[1], 0, size), 2, "{policy}");
        assert_eq!(sum(&scans[2], 0, size), 4, "{policy}");
        assert_eq!(outcome[a_pos], 2);
        assert_eq!(outcome[b_pos], 2);
        assert_eq!(outcome[ab_pos], 4);
        assert_eq!(outcome.report().scan_actions, 3);
        assert_eq!(outcome.report().kernels, 3);
    }
}

#[test]
fn test_dependent_scans_share_accumulator() {
    let size = 4;
    for policy in POLICIES {
        let ctx = policy.context();
        let (a, b) = alternating(size);
        let scans: Vec<HostDeviceArray<i32>> =
            (0..3).map(|_| HostDeviceArray::new(3 * size)).collect();

        let mut fuser = LoopFuser::new(FuserConfig::default().with_policy(policy));
        let av = a.read_view(ctx).unwrap();
        let bv = b.read_view(ctx).unwrap();
        let outs: Vec<ArrayView<i32>> = scans.iter().map(|s| s.view(ctx).unwrap()).collect();

        let mut batch = fuser.start_batch().unwrap();
        let result_pos = batch.accumulator(0);
        let (a1, b1, a2, b2) = (av.clone(), bv.clone(), av, bv);
        let (o0, o1, o2) = (outs[0].clone(), outs[1].clone(), outs[2].clone());
        batch
            .register_scan(
                0..size,
                result_pos,
                move |ix| a1.get(ix.i) == 1,
                move |ix| unsafe { o0.set(ix.pos, 1) },
            )
            .unwrap();
        batch
            .register_scan(
                0..size,
                result_pos,
                move |ix| b1.get(ix.i) == 1,
                move |ix| unsafe { o1.set(ix.pos, 1) },
            )
            .unwrap();
        batch
            .register_scan(
                0..size,
                result_pos,
                move |ix| a2.get(ix.i) == 1 || b2.get(ix.i) == 1,
                move |ix| unsafe { o2.set(ix.pos, 1) },
            )
            .unwrap();
        let outcome = batch.stop().unwrap();

        assert_eq!(sum(&scans[0], 0, 3 * size), 2);
        assert_eq!(sum(&scans[1], 0, 3 * size), 2);
        assert_eq!(sum(&scans[2], 0, 3 * size), 4);
        // Windows [0, 2), [2, 4) and [4, 8).
        assert_eq!(sum(&scans[0], 0, size / 2), 2, "{policy}");
        assert_eq!(sum(&scans[1], size / 2, size), 2, "{policy}");
        assert_eq!(sum(&scans[2], size, 2 * size), 4, "{policy}");
        assert_eq!(outcome[result_pos], 2 * size);
    }
}

#[test]
fn test_scan_positions_follow_index_order() {
    let values = HostDeviceArray::from_vec(vec![3, -1, 4, -1, -5, 9, -2, 6]);
    let kept = HostDeviceArray::<i32>::filled(8, 0);
    let mut fuser = LoopFuser::new(FuserConfig::default().with_policy(ExecPolicy::Device));
    let input = values.read_view(ExecContext::Device).unwrap();
    let output = kept.view(ExecContext::Device).unwrap();

    let mut batch = fuser.start_batch().unwrap();
    let count = batch.accumulator(0);
    let keys = input.clone();
    batch
        .register_scan(
            0..8,
            count,
            move |ix| keys.get(ix.i) > 0,
            move |ix| unsafe { output.set(ix.pos, input.get(ix.i)) },
        )
        .unwrap();
    let outcome = batch.stop().unwrap();
    assert_eq!(outcome[count], 4);
    assert_eq!(kept.to_vec().unwrap(), vec![3, 4, 9, 6, 0, 0, 0, 0]);
}

#[test]
fn test_mix_and_match() {
    let size = 4;
    let outer = 2;
    for policy in POLICIES {
        let ctx = policy.context();
        let (a, b) = alternating(size);
        let [c, d, e] = [(); 3].map(|_| HostDeviceArray::<i32>::new(size));
        let scans: Vec<HostDeviceArray<i32>> =
            (0..3).map(|_| HostDeviceArray::new(3 * size)).collect();

        let mut fuser = LoopFuser::new(FuserConfig::default().with_policy(policy));
        let av = a.read_view(ctx).unwrap();
        let bv = b.read_view(ctx).unwrap();
        let (cv, dv, ev) = (c.view(ctx).unwrap(), d.view(ctx).unwrap(), e.view(ctx).unwrap());
        let outs: Vec<ArrayView<i32>> = scans.iter().map(|s| s.view(ctx).unwrap()).collect();

        let mut batch = fuser.start_batch().unwrap();
        batch.stream(0..size, move |ix| unsafe { cv.set(ix.i, ix.i as i32) }).unwrap();

        let mut results = Vec::new();
        for _ in 0..outer {
            let result_pos = batch.accumulator(0);
            results.push(result_pos);
            let (a1, b1, a2, b2) = (av.clone(), bv.clone(), av.clone(), bv.clone());
            let (o0, o1, o2) = (outs[0].clone(), outs[1].clone(), outs[2].clone());
            batch
                .register_scan(
                    0..size,
                    result_pos,
                    move |ix| a1.get(ix.i) == 1,
                    move |ix| unsafe { o0.set(ix.pos, 1) },
                )
                .unwrap();
            batch
                .register_scan(
                    0..size,
                    result_pos,
                    move |ix| b1.get(ix.i) == 1,
                    move |ix| unsafe { o1.set(ix.pos, 1) },
                )
                .unwrap();
            batch
                .register_scan(
                    0..size,
                    result_pos,
                    move |ix| a2.get(ix.i) == 1 || b2.get(ix.i) == 1,
                    move |ix| unsafe { o2.set(ix.pos, 1) },
                )
                .unwrap();
        }
        batch.stream(0..size, move |ix| unsafe { dv.set(ix.i, 2 * ix.i as i32) }).unwrap();
        batch.stream(0..size, move |ix| unsafe { ev.set(ix.i, 3 * ix.i as i32) }).unwrap();
        let outcome = batch.stop().unwrap();

        assert_eq!(sum(&scans[0], 0, size / 2), 2, "{policy}");
        assert_eq!(sum(&scans[1], size / 2, size), 2, "{policy}");
        assert_eq!(sum(&scans[2], size, 2 * size), 4, "{policy}");
        assert_eq!(sum(&scans[2], 0, 3 * size), 4, "{policy}");
        for id in results {
            assert_eq!(outcome[id], 2 * size);
        }
        let report = outcome.report();
        assert_eq!(report.stream_actions, 3);
        assert_eq!(report.scan_actions, 3 * outer);
        // One packed stream kernel plus one fused scan.
        assert_eq!(report.kernels, 4);

        let expected: Vec<i32> = (0..size as i32).collect();
        assert_eq!(c.to_vec().unwrap(), expected);
        assert_eq!(d.to_vec().unwrap(), expected.iter().map(|v| 2 * v).collect::<Vec<_>>());
        assert_eq!(e.to_vec().unwrap(), expected.iter().map(|v| 3 * v).collect::<Vec<_>>());
    }
}

#[test]
fn test_counts_to_offsets_matches_exclusive_scan() {
    let size = 4;
    for policy in POLICIES {
        let ctx = policy.context();
        let reference = HostDeviceArray::from_vec(
            (0..2 * size).map(|i| if i < size { 2usize } else { 3 }).collect(),
        );
        numeric::exclusive_scan(policy, &reference, 0).unwrap();
        let shift = reference.get(size).unwrap();
        for i in size..2 * size {
            reference.set(i, reference.get(i).unwrap() - shift).unwrap();
        }

        let a = HostDeviceArray::<usize>::filled(size, 2);
        let b = HostDeviceArray::<usize>::filled(size, 3);
        let config = FuserConfig::default().with_policy(policy).with_verbose(true);
        let mut fuser = LoopFuser::new(config);
        let a_counts = a.read_view(ctx).unwrap();
        let b_counts = b.read_view(ctx).unwrap();

        let mut batch = fuser.start_batch().unwrap();
        let a_total = batch.accumulator(0);
        let b_total = batch.accumulator(0);
        batch
            .register_counts_to_offsets_scan(0..size, a_total, &a, move |ix| a_counts.get(ix.i))
            .unwrap();
        batch
            .register_counts_to_offsets_scan(0..size, b_total, &b, move |ix| b_counts.get(ix.i))
            .unwrap();
        let outcome = batch.stop().unwrap();

        let expected = reference.to_vec().unwrap();
        assert_eq!(a.to_vec().unwrap(), expected[..size], "{policy}");
        assert_eq!(b.to_vec().unwrap(), expected[size..], "{policy}");
        assert_eq!(a.to_vec().unwrap(), vec![0, 2, 4, 6]);
        assert_eq!(b.to_vec().unwrap(), vec![0, 3, 6, 9]);
        assert_eq!(outcome[a_total], 8);
        assert_eq!(outcome[b_total], 12);
    }
}

#[test]
fn test_accumulator_carries_across_flushes() {
    let out = HostDeviceArray::<usize>::new(12);
    let mut fuser = LoopFuser::new(FuserConfig::default().with_policy(ExecPolicy::Sequential));
    let view = out.view(ExecContext::Host).unwrap();
    let mut batch = fuser.start_batch().unwrap();
    let acc = batch.accumulator(1);
    for round in 0..3 {
        let view = view.clone();
        batch
            .register_scan(
                0..6,
                acc,
                |ix| ix.i % 2 == 0,
                move |ix| unsafe { view.set(ix.pos, round * 10 + ix.i) },
            )
            .unwrap();
        batch.flush().unwrap();
        assert_eq!(batch.accumulator_value(acc).unwrap(), 1 + 3 * (round + 1));
    }
    batch.set_accumulator(acc, 0).unwrap();
    let outcome = batch.stop().unwrap();
    assert_eq!(outcome[acc], 0);
    assert_eq!(
        out.to_vec().unwrap(),
        vec![0, 0, 2, 4, 10, 12, 14, 20, 22, 24, 0, 0]
    );
}

#[test]
fn test_counts_target_too_short() {
    let target = HostDeviceArray::<usize>::new(3);
    let mut fuser = LoopFuser::new(FuserConfig::default().with_policy(ExecPolicy::Sequential));
    let mut batch = fuser.start_batch().unwrap();
    let acc = batch.accumulator(0);
    let err = batch
        .register_counts_to_offsets_scan(0..4, acc, &target, |_| 1)
        .unwrap_err();
    assert!(matches!(
        err,
        FuserError::ScanRangeMismatch {
            start: 0,
            end: 4,
            len: 3
        }
    ));
    assert_eq!(batch.pending(), 0);
}

#[test]
fn test_unknown_accumulator() {
    let mut fuser = LoopFuser::new(FuserConfig::default().with_policy(ExecPolicy::Sequential));
    let foreign = {
        let mut other = LoopFuser::new(FuserConfig::default());
        let mut batch = other.start_batch().unwrap();
        batch.accumulator(0);
        let second = batch.accumulator(0);
        second
    };
    let mut batch = fuser.start_batch().unwrap();
    let err = batch.register_scan(0..2, foreign, |_| true, |_| {}).unwrap_err();
    assert!(matches!(
        err,
        FuserError::UnknownAccumulator { id: 1, count: 0 }
    ));
}

#[test]
fn test_accumulator_from_earlier_batch_rejected() {
    let out = HostDeviceArray::<usize>::filled(4, 0);
    let mut fuser = LoopFuser::new(FuserConfig::default().with_policy(ExecPolicy::Sequential));
    let stale = {
        let mut batch = fuser.start_batch().unwrap();
        let acc = batch.accumulator(0);
        batch.stop().unwrap();
        acc
    };

    // Same fuser, same arena index, different batch.
    let mut batch = fuser.start_batch().unwrap();
    let fresh = batch.accumulator(5);
    assert_eq!(fresh.index(), stale.index());
    let view = out.host_view().unwrap();
    let err = batch
        .register_scan(0..4, stale, |_| true, move |ix| unsafe { view.set(ix.i, ix.pos) })
        .unwrap_err();
    assert!(matches!(
        err,
        FuserError::UnknownAccumulator { id: 0, count: 1 }
    ));
    assert!(batch.accumulator_value(stale).is_err());
    assert_eq!(batch.pending(), 0);

    let outcome = batch.stop().unwrap();
    assert_eq!(outcome.accumulator(stale), None);
    assert_eq!(outcome.accumulator(fresh), Some(5));
    assert_eq!(out.to_vec().unwrap(), vec![0; 4]);
}

#[test]
fn test_scan_count_overflow_reported() {
    let offsets = HostDeviceArray::<usize>::new(2);
    let mut fuser = LoopFuser::new(FuserConfig::default().with_policy(ExecPolicy::Threaded));
    let mut batch = fuser.start_batch().unwrap();
    let acc = batch.accumulator(0);
    batch
        .register_counts_to_offsets_scan(0..2, acc, &offsets, |_| usize::MAX / 2 + 1)
        .unwrap();
    let err = batch.flush().unwrap_err();
    assert!(matches!(err, FuserError::CountOverflow { accumulator: None }));
    assert_eq!(batch.accumulator_value(acc).unwrap(), 0);
}

#[test]
fn test_ordered_scans_between_streams() {
    let out = HostDeviceArray::<usize>::filled(8, usize::MAX);
    let flags = HostDeviceArray::<usize>::new(8);
    let mut fuser = LoopFuser::new(FuserConfig::default().with_policy(ExecPolicy::Device));
    let ctx = ExecContext::Device;
    let (fw, fr) = (flags.view(ctx).unwrap(), flags.read_view(ctx).unwrap());
    let ov = out.view(ctx).unwrap();

    // The scan reads flags written by the stream registered before it.
    let mut batch = fuser.start_batch_ordered(true).unwrap();
    let acc = batch.accumulator(0);
    batch.stream(0..8, move |ix| unsafe { fw.set(ix.i, usize::from(ix.i % 3 == 0)) }).unwrap();
    batch
        .register_scan(
            0..8,
            acc,
            move |ix| fr.get(ix.i) == 1,
            move |ix| unsafe { ov.set(ix.pos, ix.i) },
        )
        .unwrap();
    let outcome = batch.stop().unwrap();
    assert_eq!(outcome[acc], 3);
    assert_eq!(&out.to_vec().unwrap()[..3], &[0, 3, 6]);
}
