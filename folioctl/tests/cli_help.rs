use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

#[test]
fn top_level_help_lists_commands() {
    let mut cmd = cargo_bin_cmd!("folioctl");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(contains("render"))
        .stdout(contains("sweep"))
        .stdout(contains("watch"));
}

#[test]
fn render_help_documents_flags() {
    let mut cmd = cargo_bin_cmd!("folioctl");
    let out = cmd
        .arg("render")
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&out);
    assert!(text.contains("--input"), "render help missing --input");
    assert!(text.contains("--output"), "render help missing --output");
    assert!(text.contains("--force"), "render help missing --force");
}

#[test]
fn sweep_on_empty_cache_reports_nothing_removed() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cargo_bin_cmd!("folioctl");
    cmd.arg("sweep")
        .arg("--cache-dir")
        .arg(dir.path().join("artifacts"))
        .assert()
        .success()
        .stdout(contains("scanned=0"))
        .stdout(contains("removed_expired=0"));
}

#[test]
fn render_with_unreadable_input_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cargo_bin_cmd!("folioctl");
    cmd.arg("render")
        .arg("--cache-dir")
        .arg(dir.path().join("artifacts"))
        .arg("--input")
        .arg(dir.path().join("missing.json"))
        .arg("--output")
        .arg(dir.path().join("out.pdf"))
        .assert()
        .failure()
        .stderr(contains("failed to read"));
}

#[cfg(unix)]
#[test]
fn render_writes_document_and_second_run_hits_cache() {
    let dir = tempfile::tempdir().unwrap();
    let templates = dir.path().join("templates");
    std::fs::create_dir_all(&templates).unwrap();
    std::fs::write(templates.join("invoice.html"), "{{invoice_number}} {{total}}").unwrap();
    std::fs::write(templates.join("invoice.css"), "").unwrap();

    let input = dir.path().join("invoice.json");
    std::fs::write(
        &input,
        r#"{
            "id": "01890a5d-ac96-774b-bcce-b302099a8057",
            "invoice_number": "INV-9",
            "status": "issued",
            "amount": "0",
            "issued_on": "2026-02-01",
            "updated_at": "2026-02-01T08:00:00Z",
            "booking": {
                "id": "01890a5d-ac96-774b-bcce-b302099a8058",
                "customer_name": "Contoso",
                "stalls": [{
                    "stall_id": "01890a5d-ac96-774b-bcce-b302099a8059",
                    "stall_number": "D-1",
                    "width": "10",
                    "height": "20",
                    "rate": "50"
                }],
                "discount": { "type": "percentage", "value": "10" },
                "tax_percent": "18",
                "updated_at": "2026-02-01T08:00:00Z"
            }
        }"#,
    )
    .unwrap();
    let output = dir.path().join("out.html");

    let run = || {
        let mut cmd = cargo_bin_cmd!("folioctl");
        cmd.env("FOLIO_TEMPLATE_DIR", &templates)
            .env("FOLIO_RENDERER_PROGRAM", "cp")
            .env("FOLIO_RENDERER_ARGS", "{input} {output}")
            .arg("render")
            .arg("--cache-dir")
            .arg(dir.path().join("artifacts"))
            .arg("--input")
            .arg(&input)
            .arg("--output")
            .arg(&output);
        cmd
    };

    run().assert().success().stdout(contains("Rendered"));
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "INV-9 10620.00");

    run().assert().success().stdout(contains("CacheHit"));
}
