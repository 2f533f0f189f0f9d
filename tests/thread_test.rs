#![cfg(all(not(loom), not(feature = "shuttle")))]

mod common;

use test_log::test;

#[test]
fn three_client_scripted_thread_test() {
    for _ in 0..16 {
        common::scripted_interleaving_test::<3>();
    }
}

#[test]
fn four_client_request_grant_cycle_thread_test() {
    common::request_grant_cycle_test::<4>(8);
}
