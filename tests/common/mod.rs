#![allow(dead_code)]

use dircoh::{ArcClientHandle, CacheLineState, Operation, ProtocolEngine};
use tracing::{debug, trace};

cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync::atomic::{AtomicUsize, Ordering};
        pub(crate) use loom::sync::Arc;
        pub(crate) use loom::thread;
    } else if #[cfg(feature = "shuttle")] {
        pub(crate) use shuttle::sync::atomic::{AtomicUsize, Ordering};
        pub(crate) use shuttle::sync::Arc;
        pub(crate) use shuttle::thread;
    } else {
        pub(crate) use std::sync::atomic::{AtomicUsize, Ordering};
        pub(crate) use std::sync::Arc;
        pub(crate) use std::thread;
    }
}

/// Reserve every client id before any client thread starts, so that no thread can release its id
/// and have it handed out a second time.
fn construct_client_handles<const NUM_CLIENTS: usize>(
    engine: &Arc<ProtocolEngine<NUM_CLIENTS>>,
) -> Vec<ArcClientHandle<NUM_CLIENTS>> {
    let handles: Vec<ArcClientHandle<NUM_CLIENTS>> = (0..NUM_CLIENTS)
        .map(|_| ArcClientHandle::construct(engine.clone()).unwrap())
        .collect();

    let mut client_ids: Vec<usize> = handles.iter().map(|handle| handle.client_id()).collect();
    client_ids.sort_unstable();
    client_ids.dedup();
    assert_eq!(client_ids.len(), NUM_CLIENTS, "client ids were handed out twice");
    handles
}

/// Each client thread fires a fixed script of operations against the shared engine while the
/// directory thread fires its own. Rejections are expected; the invariants must hold after
/// every operation either way.
pub(crate) fn scripted_interleaving_test<const NUM_CLIENTS: usize>() {
    let engine: Arc<ProtocolEngine<NUM_CLIENTS>> = Arc::new(ProtocolEngine::new());

    let handles: Vec<ArcClientHandle<NUM_CLIENTS>> = construct_client_handles(&engine);

    let mut join_handles: Vec<thread::JoinHandle<()>> = handles
        .into_iter()
        .enumerate()
        .map(|(i, mut handle)| {
            let engine = engine.clone();
            thread::spawn(move || {
                let result = if i % 2 == 0 {
                    handle.request_exclusive()
                } else {
                    handle.request_shared()
                };
                assert!(result.is_ok());
                assert!(engine.check_invariants().is_ok());

                let stepped: Option<Operation> = handle.step();
                trace!("client {} stepped: {stepped:?}", handle.client_id());
                assert!(engine.check_invariants().is_ok());
            })
        })
        .collect();

    let directory_engine = engine.clone();
    join_handles.push(thread::spawn(move || {
        for _ in 0..2 {
            let stepped: Option<Operation> = directory_engine.step_home();
            trace!("directory stepped: {stepped:?}");
            assert!(directory_engine.check_invariants().is_ok());
        }
    }));

    join_handles.into_iter().for_each(|join_handle| {
        join_handle.join().expect("A thread panicked");
    });

    // every request that went out must still be serviceable
    engine.run_to_quiescence();
    assert!(engine.check_invariants().is_ok());
    let snapshot = engine.snapshot();
    assert!(snapshot.is_quiescent());
    let num_exclusive = snapshot
        .clients()
        .iter()
        .filter(|client| client.cache_state() == CacheLineState::Exclusive)
        .count();
    assert!(num_exclusive <= 1);
}

/// Client threads repeatedly acquire the line, alternating exclusive and shared access, and
/// keep answering invalidations until every client is done. A separate directory thread
/// services requests in arrival order.
pub(crate) fn request_grant_cycle_test<const NUM_CLIENTS: usize>(num_rounds: usize) {
    let engine: Arc<ProtocolEngine<NUM_CLIENTS>> = Arc::new(ProtocolEngine::new());
    let num_finished: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));

    let handles: Vec<ArcClientHandle<NUM_CLIENTS>> = construct_client_handles(&engine);

    let mut join_handles: Vec<thread::JoinHandle<()>> = handles
        .into_iter()
        .map(|mut handle| {
            let engine = engine.clone();
            let num_finished = num_finished.clone();
            thread::spawn(move || {
                for round in 0..num_rounds {
                    let wants_exclusive = round % 2 == 0;
                    let already_satisfied = match handle.cache_state() {
                        CacheLineState::Exclusive => true,
                        CacheLineState::Shared => !wants_exclusive,
                        CacheLineState::Invalid => false,
                    };
                    if already_satisfied {
                        continue;
                    }

                    let result = if wants_exclusive {
                        handle.request_exclusive()
                    } else {
                        handle.request_shared()
                    };
                    assert!(result.is_ok(), "request rejected: {result:?}");

                    let desired = if wants_exclusive {
                        CacheLineState::Exclusive
                    } else {
                        CacheLineState::Shared
                    };
                    loop {
                        let stepped = handle.step();
                        if matches!(
                            stepped,
                            Some(Operation::ApplyGrantShared(_))
                                | Some(Operation::ApplyGrantExclusive(_))
                        ) {
                            assert_eq!(handle.cache_state(), desired);
                            break;
                        }
                        assert!(engine.check_invariants().is_ok());
                        thread::yield_now();
                    }
                    debug!(
                        "client {} acquired {desired:?} in round {round}",
                        handle.client_id()
                    );
                    assert!(engine.check_invariants().is_ok());
                }

                num_finished.fetch_add(1, Ordering::AcqRel);
                // keep answering invalidations so the others can finish
                while num_finished.load(Ordering::Acquire) < NUM_CLIENTS {
                    handle.step();
                    thread::yield_now();
                }
            })
        })
        .collect();

    let directory_engine = engine.clone();
    let directory_num_finished = num_finished.clone();
    join_handles.push(thread::spawn(move || {
        while directory_num_finished.load(Ordering::Acquire) < NUM_CLIENTS {
            directory_engine.step_home();
            assert!(directory_engine.check_invariants().is_ok());
            thread::yield_now();
        }
    }));

    join_handles.into_iter().for_each(|join_handle| {
        join_handle.join().expect("A thread panicked");
    });

    engine.run_to_quiescence();
    assert!(engine.check_invariants().is_ok());
    assert!(engine.snapshot().is_quiescent());
}
