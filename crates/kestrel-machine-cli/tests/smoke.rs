use std::process::Command;

#[test]
fn runs_an_image_and_dumps_registers() {
    let program = "\
start:
    MOV A, Z+7
    ADD A, Z+35
    SD A, (Z+0x100)
spin:
    JMP spin
";
    let image = kestrel_asm::assemble(program).expect("fixture program should assemble");

    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let image_path = tmp.path().join("prog.img");
    std::fs::write(&image_path, &image).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_krun"))
        .args([
            image_path.to_str().expect("image path should be UTF-8"),
            "--max-ticks",
            "100",
            "--dump-regs",
        ])
        .output()
        .expect("failed to run krun");

    assert!(
        output.status.success(),
        "krun exited with {}\nstderr:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("A   = 0x000000000000002a"),
        "unexpected stdout:\n{stdout}"
    );
    assert!(stdout.contains("ticks = 100"), "unexpected stdout:\n{stdout}");
}

#[test]
fn double_fault_exits_nonzero() {
    // The empty jump table vectors every interrupt to address 0, so the
    // second pass over INT raises while the first is still being handled.
    let program = "\
    PMOV PSP, Z+0x1000
    INT 0xA0
";
    let image = kestrel_asm::assemble(program).expect("fixture program should assemble");

    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let image_path = tmp.path().join("prog.img");
    std::fs::write(&image_path, &image).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_krun"))
        .args([
            image_path.to_str().expect("image path should be UTF-8"),
            "--max-ticks",
            "100",
        ])
        .output()
        .expect("failed to run krun");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("double fault"), "unexpected stderr: {stderr}");
}
