//! Integration tests for the two-phase selection/dispatch protocol
//!
//! Uses mock instances with fixed synthetic timings so selection outcomes
//! are deterministic, plus registry reordering to provoke staleness.

use std::sync::Arc;

use elegir::host::{host_buffer, HostAllocator};
use elegir::ops::gemm::{Gemm, GemmBuffers, GemmProblem};
use elegir::{
    dispatch, select_best, ArgumentHandle, ElegirError, InstanceId, KernelInstance, Selection,
    SelectionCache, StaticRegistry, StreamConfig,
};

/// Mock instance reporting a fixed elapsed time
struct FixedTimeInstance {
    name: &'static str,
    elapsed_ms: f32,
    supported: bool,
    workspace_bytes: usize,
}

impl FixedTimeInstance {
    fn supported(name: &'static str, elapsed_ms: f32) -> Arc<Self> {
        Arc::new(Self {
            name,
            elapsed_ms,
            supported: true,
            workspace_bytes: 0,
        })
    }

    fn unsupported(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            elapsed_ms: 0.0,
            supported: false,
            workspace_bytes: 0,
        })
    }

    fn with_workspace(name: &'static str, elapsed_ms: f32, workspace_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            elapsed_ms,
            supported: true,
            workspace_bytes,
        })
    }
}

impl KernelInstance<Gemm<f32>> for FixedTimeInstance {
    fn bind_argument(&self, problem: &GemmProblem, _buffers: &GemmBuffers) -> ArgumentHandle {
        ArgumentHandle::new(*problem)
    }

    fn is_supported(&self, _argument: &ArgumentHandle) -> bool {
        self.supported
    }

    fn workspace_size(&self, _argument: &ArgumentHandle) -> usize {
        self.workspace_bytes
    }

    fn run(&self, _argument: &ArgumentHandle, stream: &StreamConfig) -> elegir::Result<f32> {
        Ok(if stream.time_kernel { self.elapsed_ms } else { 0.0 })
    }

    fn instance_id(&self) -> InstanceId {
        InstanceId::new(self.name)
    }
}

fn fixture() -> (GemmProblem, GemmBuffers, HostAllocator) {
    let problem = GemmProblem::new(8, 8, 8);
    let buffers = GemmBuffers {
        a: host_buffer(vec![0.0; 64]),
        b: host_buffer(vec![0.0; 64]),
        c: host_buffer(vec![0.0; 64]),
    };
    (problem, buffers, HostAllocator::new())
}

fn timing_registry() -> StaticRegistry<Gemm<f32>> {
    StaticRegistry::from_instances(vec![
        FixedTimeInstance::supported("slow", 5.0),
        FixedTimeInstance::supported("fast_a", 2.0),
        FixedTimeInstance::supported("fast_b", 2.0),
    ])
}

#[test]
fn test_select_best_picks_minimum() {
    let (problem, buffers, allocator) = fixture();
    let registry = timing_registry();

    let selection = select_best(&registry, &problem, &buffers, &allocator)
        .unwrap()
        .unwrap();
    assert_eq!(selection.index, 1);
    assert_eq!(selection.id, InstanceId::new("fast_a"));
    assert!((selection.elapsed_ms - 2.0).abs() < f32::EPSILON);
}

#[test]
fn test_select_best_tie_keeps_earliest() {
    // index 2 ties index 1; strict < keeps the first minimum
    let (problem, buffers, allocator) = fixture();
    let registry = timing_registry();
    for _ in 0..5 {
        let selection = select_best(&registry, &problem, &buffers, &allocator)
            .unwrap()
            .unwrap();
        assert_eq!(selection.index, 1);
    }
}

#[test]
fn test_select_best_skips_unsupported() {
    let (problem, buffers, allocator) = fixture();
    let registry = StaticRegistry::from_instances(vec![
        FixedTimeInstance::unsupported("specialized"),
        FixedTimeInstance::supported("fallback", 9.0),
    ]);

    let selection = select_best(&registry, &problem, &buffers, &allocator)
        .unwrap()
        .unwrap();
    assert_eq!(selection.index, 1);
    assert_eq!(selection.id, InstanceId::new("fallback"));
}

#[test]
fn test_select_best_none_supported() {
    let (problem, buffers, allocator) = fixture();
    let registry = StaticRegistry::from_instances(vec![
        FixedTimeInstance::unsupported("a"),
        FixedTimeInstance::unsupported("b"),
        FixedTimeInstance::unsupported("c"),
    ]);

    let outcome = select_best(&registry, &problem, &buffers, &allocator).unwrap();
    assert!(outcome.is_none());
}

#[test]
fn test_select_best_empty_registry() {
    let (problem, buffers, allocator) = fixture();
    let registry: StaticRegistry<Gemm<f32>> = StaticRegistry::new();
    let outcome = select_best(&registry, &problem, &buffers, &allocator).unwrap();
    assert!(outcome.is_none());
}

#[test]
fn test_select_best_propagates_allocation_failure() {
    let (problem, buffers, _) = fixture();
    let allocator = HostAllocator::with_limit(16);
    let registry = StaticRegistry::from_instances(vec![FixedTimeInstance::with_workspace(
        "needs_big_workspace",
        1.0,
        1 << 20,
    )]);

    let err = select_best(&registry, &problem, &buffers, &allocator).unwrap_err();
    assert!(matches!(err, ElegirError::Allocation { .. }));
}

#[test]
fn test_dispatch_replays_selection() {
    let (problem, buffers, allocator) = fixture();
    let registry = timing_registry();
    let selection = select_best(&registry, &problem, &buffers, &allocator)
        .unwrap()
        .unwrap();

    let report = dispatch(
        &registry,
        &selection,
        &problem,
        &buffers,
        &allocator,
        &StreamConfig::timed(),
    )
    .unwrap();
    assert_eq!(report.elapsed_ms, Some(2.0));
    assert!(report.bytes_moved > 0);
    assert!(report.gb_per_sec().is_some());
}

#[test]
fn test_dispatch_untimed_reports_no_elapsed() {
    let (problem, buffers, allocator) = fixture();
    let registry = timing_registry();
    let selection = select_best(&registry, &problem, &buffers, &allocator)
        .unwrap()
        .unwrap();

    let report = dispatch(
        &registry,
        &selection,
        &problem,
        &buffers,
        &allocator,
        &StreamConfig::default(),
    )
    .unwrap();
    assert_eq!(report.elapsed_ms, None);
    assert!(report.gb_per_sec().is_none());
}

#[test]
fn test_dispatch_detects_reordered_registry() {
    let (problem, buffers, allocator) = fixture();
    let mut registry = StaticRegistry::from_instances(vec![
        FixedTimeInstance::supported("slow", 5.0),
        FixedTimeInstance::supported("fast", 1.0),
    ]);
    let selection = select_best(&registry, &problem, &buffers, &allocator)
        .unwrap()
        .unwrap();
    assert_eq!(selection.index, 1);

    // provider re-enumerates in a different order: the cached index now
    // resolves to a different instance and must NOT silently run
    registry.reverse();
    let err = dispatch(
        &registry,
        &selection,
        &problem,
        &buffers,
        &allocator,
        &StreamConfig::timed(),
    )
    .unwrap_err();
    match err {
        ElegirError::StaleSelection {
            index,
            expected,
            found,
        } => {
            assert_eq!(index, 1);
            assert_eq!(expected, InstanceId::new("fast"));
            assert_eq!(found, Some(InstanceId::new("slow")));
        }
        other => panic!("expected StaleSelection, got {other:?}"),
    }
}

#[test]
fn test_dispatch_detects_shrunken_registry() {
    let (problem, buffers, allocator) = fixture();
    let mut registry = timing_registry();
    let selection = select_best(&registry, &problem, &buffers, &allocator)
        .unwrap()
        .unwrap();

    registry.truncate(1);
    let err = dispatch(
        &registry,
        &selection,
        &problem,
        &buffers,
        &allocator,
        &StreamConfig::timed(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ElegirError::StaleSelection { found: None, .. }
    ));
}

#[test]
fn test_stale_then_reprofile_recovers() {
    let (problem, buffers, allocator) = fixture();
    let mut registry = timing_registry();
    let mut cache = SelectionCache::new();

    let selection = select_best(&registry, &problem, &buffers, &allocator)
        .unwrap()
        .unwrap();
    cache.store(selection);

    registry.truncate(2);
    registry.reverse(); // now [fast_a, slow]: cached index 1 resolves to slow
    let stale = cache.get().unwrap();
    let err = dispatch(
        &registry,
        stale,
        &problem,
        &buffers,
        &allocator,
        &StreamConfig::timed(),
    );
    assert!(err.is_err());

    // the documented recovery: invalidate, re-profile, dispatch again
    cache.invalidate();
    assert!(cache.is_empty());
    let fresh = select_best(&registry, &problem, &buffers, &allocator)
        .unwrap()
        .unwrap();
    assert_eq!(fresh.index, 0);
    assert_eq!(fresh.id, InstanceId::new("fast_a"));
    cache.store(fresh);
    let report = dispatch(
        &registry,
        cache.get().unwrap(),
        &problem,
        &buffers,
        &allocator,
        &StreamConfig::timed(),
    )
    .unwrap();
    assert_eq!(report.elapsed_ms, Some(2.0));
}

#[test]
fn test_dispatch_unsupported_at_dispatch_time() {
    let (problem, buffers, allocator) = fixture();
    // same identity at the same index, but it now rejects the argument
    let registry = StaticRegistry::from_instances(vec![FixedTimeInstance::supported("only", 1.0)]);
    let selection = select_best(&registry, &problem, &buffers, &allocator)
        .unwrap()
        .unwrap();

    let rejecting = StaticRegistry::from_instances(vec![FixedTimeInstance::unsupported("only")]);
    let err = dispatch(
        &rejecting,
        &selection,
        &problem,
        &buffers,
        &allocator,
        &StreamConfig::timed(),
    )
    .unwrap_err();
    assert!(matches!(err, ElegirError::UnsupportedArgument { .. }));
}

#[test]
fn test_selection_serde_roundtrip() {
    let selection = Selection {
        index: 3,
        id: InstanceId::new("blocked_gemm_f32_128x128x32"),
        elapsed_ms: 0.42,
    };
    let json = serde_json::to_string(&selection).unwrap();
    let parsed: Selection = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, selection);
}

#[test]
fn test_end_to_end_over_host_instances() {
    // full protocol over the real CPU reference instances
    let problem = GemmProblem::new(70, 40, 30);
    let buffers = GemmBuffers {
        a: host_buffer((0..70 * 30).map(|i| (i % 3) as f32).collect()),
        b: host_buffer((0..30 * 40).map(|i| (i % 5) as f32).collect()),
        c: host_buffer(vec![0.0; 70 * 40]),
    };
    let registry = elegir::host::gemm_instances::<f32>();
    let allocator = HostAllocator::new();

    let selection = select_best(&registry, &problem, &buffers, &allocator)
        .unwrap()
        .expect("naive instance always supports packed problems");
    let report = dispatch(
        &registry,
        &selection,
        &problem,
        &buffers,
        &allocator,
        &StreamConfig::timed(),
    )
    .unwrap();
    assert!(report.elapsed_ms.is_some());

    // C must hold the actual product after dispatch
    let c = elegir::host::read_back(&buffers.c).unwrap();
    let mut expected = vec![0.0f32; 70 * 40];
    let a = elegir::host::read_back(&buffers.a).unwrap();
    let b = elegir::host::read_back(&buffers.b).unwrap();
    for i in 0..70 {
        for j in 0..40 {
            for l in 0..30 {
                expected[i * 40 + j] += a[i * 30 + l] * b[l * 40 + j];
            }
        }
    }
    assert_eq!(c, expected);
}
