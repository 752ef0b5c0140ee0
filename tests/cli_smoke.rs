//! Behavioural smoke tests for the CLI entrypoint.
//!
//! None of these reach `virsh`: the binary is pointed at a path that does not
//! exist, so any backend call would fail with a spawn error instead of the
//! asserted message.

#[path = "common/ignition.rs"]
mod ignition;

use std::time::Duration;

use assert_cmd::cargo::cargo_bin_cmd;
use camino::Utf8PathBuf;
use ignivol::PoolLocks;
use predicates::prelude::*;
use rstest::rstest;

const MISSING_VIRSH: &str = "/nonexistent/ignivol-test/virsh";
const LOCK_DIR: &str = concat!(env!("CARGO_TARGET_TMPDIR"), "/ignivol-cli-locks");

fn ignivol() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("ignivol");
    cmd.env("IGNIVOL_VIRSH_BIN", MISSING_VIRSH);
    cmd.env("IGNIVOL_LOCK_DIR", LOCK_DIR);
    cmd.env_remove("IGNIVOL_LOG");
    cmd
}

fn create_in(pool: &str) -> assert_cmd::Command {
    let mut cmd = ignivol();
    cmd.args([
        "create",
        "--name",
        "seed.ign",
        "--pool",
        pool,
        "--content",
        ignition::INLINE_IGNITION,
    ]);
    cmd
}

#[test]
fn cli_without_arguments_prints_help() {
    ignivol()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn create_rejects_invalid_content_without_touching_virsh() {
    ignivol()
        .args([
            "create",
            "--name",
            "seed.ign",
            "--pool",
            ignition::DEFAULT_POOL,
            "--content",
            "neither a file nor json",
        ])
        .assert()
        .code(1)
        .stdout("")
        .stderr(predicate::str::contains(
            "neither an existing file nor a valid JSON object",
        ))
        .stderr(predicate::str::contains("failed to spawn").not());
}

#[test]
fn create_with_valid_content_reaches_the_backend() {
    create_in(ignition::DEFAULT_POOL)
        .assert()
        .code(1)
        .stderr(predicate::str::contains(MISSING_VIRSH));
}

#[test]
fn create_waits_for_a_pool_held_by_another_process() {
    let scratch = tempfile::tempdir().expect("temp dir");
    let lock_dir = Utf8PathBuf::from_path_buf(scratch.path().join("locks")).expect("utf8 path");
    let locks = PoolLocks::with_lock_dir(lock_dir.clone());
    let held = locks.acquire("contended").expect("lock pool");

    create_in("contended")
        .env("IGNIVOL_LOCK_DIR", lock_dir.as_str())
        .timeout(Duration::from_millis(500))
        .assert()
        .interrupted()
        .stderr(predicate::str::contains(MISSING_VIRSH).not());

    drop(held);
    create_in("contended")
        .env("IGNIVOL_LOCK_DIR", lock_dir.as_str())
        .timeout(Duration::from_secs(30))
        .assert()
        .code(1)
        .stderr(predicate::str::contains(MISSING_VIRSH));
}

#[test]
fn other_pools_are_not_held_up() {
    let scratch = tempfile::tempdir().expect("temp dir");
    let lock_dir = Utf8PathBuf::from_path_buf(scratch.path().join("locks")).expect("utf8 path");
    let locks = PoolLocks::with_lock_dir(lock_dir.clone());
    let _held = locks.acquire("contended").expect("lock pool");

    create_in("free")
        .env("IGNIVOL_LOCK_DIR", lock_dir.as_str())
        .timeout(Duration::from_secs(30))
        .assert()
        .code(1)
        .stderr(predicate::str::contains(MISSING_VIRSH));
}

#[rstest]
#[case("volume-key")]
#[case("resolve")]
fn malformed_identifiers_are_rejected(#[case] subcommand: &str) {
    ignivol()
        .args([subcommand, "missing-separator"])
        .assert()
        .code(1)
        .stdout("")
        .stderr(predicate::str::contains(
            "missing-separator is not a valid ignition volume identifier",
        ));
}

#[test]
fn volume_key_prints_the_key() {
    ignivol()
        .args([
            "volume-key",
            "/var/lib/libvirt/images/seed.ign;0d5a7a3e-8f62-4d55-9c3e-3a7c1b2f9e10",
        ])
        .assert()
        .success()
        .stdout("/var/lib/libvirt/images/seed.ign\n");
}

#[test]
fn volume_key_splits_on_the_first_separator() {
    ignivol()
        .args(["volume-key", "key;token;with;more"])
        .assert()
        .success()
        .stdout("key\n");
}
