use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

/// Six users, eight items, two behaviors; every user has one held-out item.
fn write_dataset(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let views = "0 0\n0 1\n0 2\n1 1\n1 2\n2 2\n2 3\n3 4\n3 5\n4 5\n4 6\n5 6\n5 7\n";
    let buys = "0 0\n1 1\n2 2\n3 4\n4 5\n5 6\n";
    let test = "0 3\n1 3\n2 1\n3 6\n4 7\n5 4\n";
    fs::write(dir.join("trn_pv.txt"), views)?;
    fs::write(dir.join("trn_buy.txt"), buys)?;
    fs::write(dir.join("tst_int.txt"), test)?;
    Ok(())
}

fn train_cmd(data: &Path, ckpt: &Path) -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("mbrec")?;
    cmd.arg("train")
        .arg("--data")
        .arg(data)
        .args(["--behaviors", "pv,buy"])
        .args(["--latdim", "8", "--gnn-layer", "1", "--att-head", "2"])
        .args(["--epoch", "2", "--test-epoch", "1", "--batch", "4"])
        .args(["--samp-num", "2", "--graph-sample-n", "20", "--seed", "7"])
        .arg("--checkpoint-dir")
        .arg(ckpt)
        .args(["--save-path", "toy"]);
    Ok(cmd)
}

#[test]
fn test_cli_train_writes_checkpoint() -> Result<(), Box<dyn std::error::Error>> {
    let data = tempfile::tempdir()?;
    let ckpt = tempfile::tempdir()?;
    write_dataset(data.path())?;

    train_cmd(data.path(), ckpt.path())?
        .assert()
        .success()
        .stdout(predicate::str::contains("Trained 2 epochs"))
        .stdout(predicate::str::contains("Final test: HR:"));

    assert!(ckpt.path().join("Models/toy.safetensors").is_file());
    assert!(ckpt.path().join("Models/toy.meta.json").is_file());
    assert!(ckpt.path().join("History/toy.his").is_file());
    Ok(())
}

#[test]
fn test_cli_history_and_eval() -> Result<(), Box<dyn std::error::Error>> {
    let data = tempfile::tempdir()?;
    let ckpt = tempfile::tempdir()?;
    write_dataset(data.path())?;
    train_cmd(data.path(), ckpt.path())?.assert().success();

    // Test epochs 0 and 1 plus the final test.
    let mut cmd = Command::cargo_bin("mbrec")?;
    cmd.arg("history")
        .arg("toy")
        .arg("--checkpoint-dir")
        .arg(ckpt.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("TestHR"))
        .stdout(predicate::str::contains("(3 values)"))
        .stdout(predicate::str::contains("TrainLoss"));

    let mut cmd = Command::cargo_bin("mbrec")?;
    cmd.arg("eval")
        .arg("--data")
        .arg(data.path())
        .args(["--behaviors", "pv,buy"])
        .args(["--latdim", "8", "--gnn-layer", "1", "--att-head", "2", "--seed", "7"])
        .arg("--checkpoint-dir")
        .arg(ckpt.path())
        .args(["--load-model", "toy"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Test users: 6"))
        .stdout(predicate::str::contains("HR@10:"))
        .stdout(predicate::str::contains("NDCG@10:"));
    Ok(())
}

#[test]
fn test_cli_missing_checkpoint_fails() -> Result<(), Box<dyn std::error::Error>> {
    let data = tempfile::tempdir()?;
    let ckpt = tempfile::tempdir()?;
    write_dataset(data.path())?;

    let mut cmd = Command::cargo_bin("mbrec")?;
    cmd.arg("eval")
        .arg("--data")
        .arg(data.path())
        .args(["--behaviors", "pv,buy", "--latdim", "8"])
        .arg("--checkpoint-dir")
        .arg(ckpt.path())
        .args(["--load-model", "absent"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("checkpoint `absent` is missing"));
    Ok(())
}

#[test]
fn test_cli_eval_requires_checkpoint_name() -> Result<(), Box<dyn std::error::Error>> {
    let data = tempfile::tempdir()?;
    write_dataset(data.path())?;

    let mut cmd = Command::cargo_bin("mbrec")?;
    cmd.arg("eval").arg("--data").arg(data.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--load-model"));
    Ok(())
}

#[test]
fn test_cli_missing_dataset_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let mut cmd = Command::cargo_bin("mbrec")?;
    cmd.arg("train")
        .arg("--data")
        .arg(dir.path().join("nowhere"))
        .args(["--epoch", "1"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load dataset"));
    Ok(())
}

#[test]
fn test_cli_train_accepts_schedule_flags() -> Result<(), Box<dyn std::error::Error>> {
    let data = tempfile::tempdir()?;
    let ckpt = tempfile::tempdir()?;
    write_dataset(data.path())?;

    train_cmd(data.path(), ckpt.path())?
        .args(["--decay", "0.5", "--decay-step", "1"])
        .args(["--samp-depth", "1", "--mult", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Trained 2 epochs"));
    Ok(())
}

#[test]
fn test_cli_verbose_logs_inputs_and_config() -> Result<(), Box<dyn std::error::Error>> {
    let data = tempfile::tempdir()?;
    let ckpt = tempfile::tempdir()?;
    write_dataset(data.path())?;

    train_cmd(data.path(), ckpt.path())?
        .arg("-v")
        .env_remove("RUST_LOG")
        .args(["--decay-step", "3"])
        .assert()
        .success()
        .stderr(predicate::str::contains("configuration"))
        .stderr(predicate::str::contains("decay_step=3"))
        .stderr(predicate::str::contains("inputs loaded"))
        .stderr(predicate::str::contains("users=6"));
    Ok(())
}
