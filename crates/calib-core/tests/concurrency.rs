// crates/calib-core/tests/concurrency.rs
// ============================================================================
// Module: Concurrent Request Tests
// Description: Parallel result submissions against one and two campaigns.
// Purpose: Check per-run serialisation and single counting under contention.
// Dependencies: calib-core
// ============================================================================
//! ## Overview
//! Worker threads race the same and different `(slice, cursor)` tuples while
//! a reader polls status. Every slice merges once and the step accounting
//! holds in every observed snapshot.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::sync::Barrier;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;

use calib_core::CalibrationService;
use calib_core::CampaignId;
use calib_core::DropReason;
use calib_core::PhaseId;
use calib_core::RunStatus;
use calib_core::StepCursor;
use calib_core::SubmitOutcome;
use common::ecal_settings;
use common::harness;
use common::mip_plan;
use common::request;
use common::scalar;
use common::slice;

const WIDTH: u32 = 8;
const WRITERS: usize = 6;

/// Polls status until `done`, asserting the step accounts for every slice.
fn watch_accounting(service: &CalibrationService, id: CampaignId, done: &AtomicBool) {
    while !done.load(Ordering::SeqCst) {
        let status = service.status(id).unwrap();
        if status.status == RunStatus::Active {
            assert_eq!(status.outstanding + status.received + status.lost, status.width);
        }
        thread::yield_now();
    }
}

#[test]
fn racing_replays_merge_each_slice_once() {
    let h = harness();
    let id = h
        .service
        .create_run(request(WIDTH, vec![mip_plan(PhaseId::EcalDigi, "ecal")], ecal_settings(1.0)))
        .unwrap();
    let cursor = StepCursor::start_of(PhaseId::EcalDigi);
    let barrier = Barrier::new(WRITERS);
    let done = AtomicBool::new(false);

    let outcomes: Vec<(u32, SubmitOutcome)> = thread::scope(|scope| {
        let reader = scope.spawn(|| watch_accounting(&h.service, id, &done));
        let writers: Vec<_> = (0..WRITERS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    (0..WIDTH)
                        .map(|index| {
                            let outcome = h
                                .service
                                .submit_result(id, slice(index), cursor, scalar(1.0))
                                .unwrap();
                            (index, outcome)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let outcomes = writers.into_iter().flat_map(|writer| writer.join().unwrap()).collect();
        done.store(true, Ordering::SeqCst);
        reader.join().unwrap();
        outcomes
    });

    for index in 0..WIDTH {
        let merged = outcomes
            .iter()
            .filter(|(slice_index, outcome)| *slice_index == index && outcome.accepted)
            .count();
        assert_eq!(merged, 1, "slice {index} merged {merged} times");
    }
    assert!(outcomes.iter().filter(|(_, outcome)| !outcome.accepted).all(|(_, outcome)| {
        matches!(outcome.reason, Some(DropReason::Duplicate | DropReason::Stale))
    }));

    let status = h.service.status(id).unwrap();
    assert_eq!(status.cursor, StepCursor::new(PhaseId::EcalDigi, 1));
    assert_eq!(status.steps.len(), 1);
    let drops = status.counters.duplicate_dropped + status.counters.stale_dropped;
    assert_eq!(drops, u64::try_from(outcomes.len()).unwrap() - u64::from(WIDTH));

    let state = h.service.inspect(id).unwrap();
    let accounted = state.jobs.len() + state.results.len() + state.lost.len();
    assert_eq!(accounted, usize::try_from(WIDTH).unwrap());
}

#[test]
fn campaigns_progress_independently_under_parallel_load() {
    let h = harness();
    let plan = || vec![mip_plan(PhaseId::EcalDigi, "ecal")];
    let first = h.service.create_run(request(WIDTH, plan(), ecal_settings(1.0))).unwrap();
    let second = h.service.create_run(request(WIDTH, plan(), ecal_settings(1.0))).unwrap();
    let cursor = StepCursor::start_of(PhaseId::EcalDigi);
    let barrier = Barrier::new(2 * WRITERS);

    thread::scope(|scope| {
        for (id, value) in [(first, 1.2), (second, 0.8)] {
            for writer in 0..WRITERS {
                let barrier = &barrier;
                let service = &h.service;
                scope.spawn(move || {
                    barrier.wait();
                    let writer = u32::try_from(writer).unwrap();
                    for index in (writer..WIDTH).step_by(WRITERS) {
                        let outcome =
                            service.submit_result(id, slice(index), cursor, scalar(value)).unwrap();
                        assert_eq!(outcome, SubmitOutcome::accepted());
                    }
                });
            }
        }
    });

    for (id, value) in [(first, 1.2), (second, 0.8)] {
        let status = h.service.status(id).unwrap();
        assert_eq!(status.status, RunStatus::Active);
        assert_eq!(status.cursor, StepCursor::new(PhaseId::EcalDigi, 1));
        assert_eq!(status.counters.duplicate_dropped, 0);
        assert!((status.steps[0].value.unwrap() - value).abs() < 1e-12);
        let input = h.service.get_input_for_worker(id, slice(0)).unwrap();
        let written = input.settings.get("ecal", "mip").and_then(|setting| setting.as_f64());
        assert!((written.unwrap() - value).abs() < 1e-12);
    }
}
