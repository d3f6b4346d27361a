use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

#[test]
fn test_replay_full_scenario() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "op, machine, user, amount, key").unwrap();
    writeln!(file, "recharge, , alice, 10.00, chk-1").unwrap();
    writeln!(file, "create_session, m1, , 2.50, ").unwrap();
    writeln!(file, "pay, m1, alice, , click-1").unwrap();
    writeln!(file, "pay, m1, alice, , click-1").unwrap(); // replayed, no second debit

    let mut cmd = Command::new(cargo_bin!("brewpay"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("alice,7.50"));
}

#[test]
fn test_replay_insufficient_funds_keeps_balance() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "op, machine, user, amount, key").unwrap();
    writeln!(file, "recharge, , bob, 0.50, chk-1").unwrap();
    writeln!(file, "create_session, m1, , 1.00, ").unwrap();
    writeln!(file, "pay, m1, bob, , click-1").unwrap(); // rejected, logged

    let mut cmd = Command::new(cargo_bin!("brewpay"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("bob,0.50"));
}

#[test]
fn test_replay_session_supersession() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "op, machine, user, amount, key").unwrap();
    writeln!(file, "recharge, , carol, 10.00, chk-1").unwrap();
    writeln!(file, "create_session, m1, , 1.50, ").unwrap();
    writeln!(file, "create_session, m1, , 2.00, ").unwrap();
    writeln!(file, "pay, m1, carol, , click-1").unwrap(); // pays the 2.00 session

    let mut cmd = Command::new(cargo_bin!("brewpay"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("carol,8.00"));
}

#[test]
fn test_replay_direct_debit() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "op, machine, user, amount, key").unwrap();
    writeln!(file, "recharge, , dave, 5.00, chk-1").unwrap();
    writeln!(file, "pay_direct, , dave, 1.50, d-1").unwrap();

    let mut cmd = Command::new(cargo_bin!("brewpay"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("dave,3.50"));
}
