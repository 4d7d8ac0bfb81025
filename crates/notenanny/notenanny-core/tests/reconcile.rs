use std::fs;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use indoc::{formatdoc, indoc};
use notenanny_core::{Document, MarkerLocation, Reconciler, TriggerConfig, fingerprint};
use notenanny_process::{MockExecutor, MockResponse, is_cancelled};

fn note(body: &str, modified: SystemTime) -> Document {
    Document {
        id: "note-1".to_string(),
        title: "Scratch".to_string(),
        body: body.to_string(),
        modified,
        trashed: false,
    }
}

fn reconcile(
    config: &TriggerConfig,
    mock: &MockExecutor,
    doc: &Document,
) -> Result<notenanny_core::Reconciliation> {
    Reconciler::new(config, mock.clone()).reconcile(doc)
}

#[test]
fn saveas_run_tags_output_then_second_pass_is_a_no_op() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("x.py");
    let body = formatdoc! {"
        ```meta
        saveas: {target}
        ```
        ```python
        print(1)
        ```
        ```output
        ```",
        target = target.display(),
    };
    let config = TriggerConfig::default();
    let mock = MockExecutor::new();
    mock.push_response(MockResponse::success("1"));
    let modified = SystemTime::now();

    let first = reconcile(&config, &mock, &note(&body, modified))?;
    assert!(first.modified);
    assert_eq!(fs::read_to_string(&target)?, "print(1)\n");
    assert_eq!(
        first.body,
        body.replace("```output\n", "```output 1427ch48p0qqa\n1\n")
    );
    let runs = mock.recorded_runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].program_lossy(), "python3");
    assert_eq!(runs[0].args, vec![target.clone().into_os_string()]);

    let saved_at = fs::metadata(&target)?.modified()?;
    let second = reconcile(&config, &mock, &note(&first.body, modified))?;
    assert!(!second.modified);
    assert_eq!(second.body, first.body);
    assert_eq!(mock.recorded_runs().len(), 1);
    assert_eq!(fs::metadata(&target)?.modified()?, saved_at);
    Ok(())
}

#[test]
fn run_marker_is_stripped_located_and_php_gets_its_prelude() -> Result<()> {
    let config = TriggerConfig {
        run_marker: "<<<".to_string(),
        ..TriggerConfig::default()
    };
    let mock = MockExecutor::new();
    mock.push_response(MockResponse::success("1"));
    let body = "```php\n<<<\necho 1;\n```\n";

    let result = reconcile(&config, &mock, &note(body, SystemTime::now()))?;
    assert!(result.modified);
    assert_eq!(
        result.body,
        "```php\necho 1;\n```\n```output 1rr5iv9ou4cxr\n1\n```\n"
    );
    assert_eq!(result.location, Some(MarkerLocation { line: 1, column: 0 }));

    let runs = mock.recorded_runs();
    assert_eq!(runs[0].program_lossy(), "php");
    assert_eq!(runs[0].script.as_deref(), Some("<?php\necho 1;\n"));
    let script = runs[0].args.last().unwrap().to_string_lossy().into_owned();
    assert!(script.ends_with(".php"));

    let again = reconcile(&config, &mock, &note(&result.body, SystemTime::now()))?;
    assert!(!again.modified);
    assert_eq!(mock.recorded_runs().len(), 1);
    Ok(())
}

#[test]
fn marker_location_counts_lines_of_earlier_segments() -> Result<()> {
    let config = TriggerConfig::default();
    let mock = MockExecutor::new();
    let body = indoc! {"
        Intro

        ```python
        print(1)
        ```
        ```sh
        echo hi
        ::run::
        ```"};
    let result = reconcile(&config, &mock, &note(body, SystemTime::now()))?;
    assert_eq!(result.location, Some(MarkerLocation { line: 7, column: 0 }));
    assert_eq!(mock.recorded_runs().len(), 1);
    assert_eq!(mock.recorded_runs()[0].script.as_deref(), Some("echo hi\n"));
    Ok(())
}

#[test]
fn stderr_becomes_an_errors_block_and_disappears_on_a_clean_run() -> Result<()> {
    let config = TriggerConfig::default();
    let mock = MockExecutor::new();
    mock.push_response(MockResponse::output(1, "", "NameError: x\n"))
        .push_response(MockResponse::success("ok\n"));
    let tag = fingerprint("print(x)\n");

    let body = "```python\nprint(x) ::run::\n```\n```output stale\nold\n```";
    let failed = reconcile(&config, &mock, &note(body, SystemTime::now()))?;
    assert_eq!(
        failed.body,
        format!("```python\nprint(x)\n```\n```errors\nNameError: x\n```\n```output {tag}\n```")
    );

    let rerun = failed.body.replace("print(x)\n", "print(x) ::run::\n");
    let clean = reconcile(&config, &mock, &note(&rerun, SystemTime::now()))?;
    assert_eq!(
        clean.body,
        format!("```python\nprint(x)\n```\n```output {tag}\nok\n```")
    );
    Ok(())
}

#[test]
fn changed_code_reruns_and_folds_stderr_into_output() -> Result<()> {
    let config = TriggerConfig::default();
    let mock = MockExecutor::new();
    mock.push_response(MockResponse::output(0, "2\n", "warning\n"));
    let body = "```python\nprint(2)\n```\n```errors\nold\n```\n```output 1427ch48p0qqa\n1\n```";

    let result = reconcile(&config, &mock, &note(body, SystemTime::now()))?;
    assert!(result.modified);
    assert_eq!(
        result.body,
        "```python\nprint(2)\n```\n```output 1427ch48p136b\n2\nwarning\n```"
    );
    Ok(())
}

#[test]
fn code_without_output_block_or_marker_is_left_alone() -> Result<()> {
    let config = TriggerConfig::default();
    let mock = MockExecutor::new();
    let body = "```python\nprint(1)\n```\n\nprose\n";
    let result = reconcile(&config, &mock, &note(body, SystemTime::now()))?;
    assert!(!result.modified);
    assert_eq!(result.body, body);
    assert!(mock.recorded_runs().is_empty());
    Ok(())
}

#[test]
fn newer_saveas_target_is_not_overwritten() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("x.py");
    fs::write(&target, "print('edited by hand')\n")?;
    let body = format!(
        "```meta\nsaveas: {}\n```\n```python\nprint(1)\n```\n```output\n```",
        target.display()
    );
    let config = TriggerConfig::default();
    let mock = MockExecutor::new();
    let an_hour_ago = SystemTime::now() - Duration::from_secs(3600);

    let result = reconcile(&config, &mock, &note(&body, an_hour_ago))?;
    assert!(result.modified);
    assert_eq!(fs::read_to_string(&target)?, "print('edited by hand')\n");
    let runs = mock.recorded_runs();
    assert_ne!(runs[0].args.last(), Some(&target.clone().into_os_string()));
    assert_eq!(runs[0].script.as_deref(), Some("print(1)\n"));
    Ok(())
}

#[test]
fn saveas_applies_to_one_code_block_only() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("first.py");
    let body = format!(
        "```meta\nsaveas: {}\n```\n```python\nprint(1)\n```\n```python\nprint(2)\n```",
        target.display()
    );
    let config = TriggerConfig::default();
    let mock = MockExecutor::new();
    reconcile(&config, &mock, &note(&body, SystemTime::now()))?;
    assert_eq!(fs::read_to_string(&target)?, "print(1)\n");
    Ok(())
}

#[test]
fn untagged_fence_runs_only_with_meta() -> Result<()> {
    let config = TriggerConfig::default();
    let mock = MockExecutor::new();

    let bare = "```\n{ print 1 } ::run::\n```";
    let skipped = reconcile(&config, &mock, &note(bare, SystemTime::now()))?;
    assert!(!skipped.modified);
    assert!(mock.recorded_runs().is_empty());

    let with_meta = format!("```meta\nrun: awk -f\n```\n{bare}");
    reconcile(&config, &mock, &note(&with_meta, SystemTime::now()))?;
    let runs = mock.recorded_runs();
    assert_eq!(runs[0].program_lossy(), "awk");
    assert_eq!(runs[0].args[0], "-f");
    assert!(runs[0].args[1].to_string_lossy().ends_with(".txt"));
    Ok(())
}

#[test]
fn failing_formatter_keeps_original_code() -> Result<()> {
    let mut config = TriggerConfig::default();
    config.set_formatter("swift", "swiftformat --quiet");
    let mock = MockExecutor::new();
    mock.push_response(MockResponse::failure(1, "unexpected token"));

    let result = reconcile(&config, &mock, &note("```swift\nlet x=1 ::fmt::\n```", SystemTime::now()))?;
    assert!(result.modified);
    assert_eq!(result.body, "```swift\nlet x=1\n```");
    assert_eq!(mock.recorded_runs().len(), 1);
    Ok(())
}

#[test]
fn empty_formatter_output_keeps_original_code() -> Result<()> {
    let mut config = TriggerConfig::default();
    config.set_formatter("swift", "swiftformat");
    let mock = MockExecutor::new();
    mock.push_response(MockResponse::success(""));

    let result = reconcile(&config, &mock, &note("```swift\nlet x=1 ::fmt::\n```", SystemTime::now()))?;
    assert_eq!(result.body, "```swift\nlet x=1\n```");
    Ok(())
}

#[test]
fn stdin_formatter_rewrites_code_and_retags_current_output() -> Result<()> {
    let mut config = TriggerConfig::default();
    config.set_formatter("swift", "swiftformat --quiet");
    let mock = MockExecutor::new();
    mock.push_response(MockResponse::success("let x = 1\n"));
    let body = format!(
        "```swift\nlet x=1 ::fmt::\n```\n```output {}\n1\n```",
        fingerprint("let x=1\n")
    );

    let result = reconcile(&config, &mock, &note(&body, SystemTime::now()))?;
    assert_eq!(
        result.body,
        format!(
            "```swift\nlet x = 1\n```\n```output {}\n1\n```",
            fingerprint("let x = 1\n")
        )
    );
    let runs = mock.recorded_runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].stdin.as_deref(), Some(b"let x=1\n".as_slice()));
    Ok(())
}

#[test]
fn format_on_run_executes_the_formatted_code() -> Result<()> {
    let mut config = TriggerConfig::default();
    config.format_on_run = true;
    config.set_formatter("python", "black -q {file}");
    let mock = MockExecutor::new();
    mock.push_response(MockResponse::rewrite("print(1)\n"))
        .push_response(MockResponse::success("1\n"));

    let result = reconcile(&config, &mock, &note("```python\nprint( 1 ) ::run::\n```", SystemTime::now()))?;
    assert_eq!(
        result.body,
        "```python\nprint(1)\n```\n```output 1427ch48p0qqa\n1\n```"
    );
    let runs = mock.recorded_runs();
    assert_eq!(runs[0].program_lossy(), "black");
    assert_eq!(runs[1].script.as_deref(), Some("print(1)\n"));
    Ok(())
}

#[test]
fn spawn_failure_is_written_as_errors() -> Result<()> {
    let config = TriggerConfig::default();
    let mock = MockExecutor::new();
    mock.push_response(MockResponse::spawn_failure("No such file or directory"));

    let result = reconcile(&config, &mock, &note("```ruby\nputs 1 ::run::\n```", SystemTime::now()))?;
    assert!(result.body.contains("```errors\nerror: failed to spawn ruby "));
    assert!(result.body.contains("caused by: No such file or directory\n```"));
    assert!(result.body.ends_with(&format!("```output {}\n```", fingerprint("puts 1\n"))));
    Ok(())
}

#[test]
fn cancelled_run_aborts_the_note() {
    let config = TriggerConfig::default();
    let mock = MockExecutor::new();
    mock.push_response(MockResponse::cancelled());

    let err = reconcile(&config, &mock, &note("```sh\nsleep 100 ::run::\n```", SystemTime::now()))
        .unwrap_err();
    assert!(is_cancelled(&err));
}

#[test]
fn config_block_is_never_executed() -> Result<()> {
    let config = TriggerConfig::default();
    let mock = MockExecutor::new();
    let body = "```notenanny\nRunTrigger: ::run::\n```\n```output\n```";
    let result = reconcile(&config, &mock, &note(body, SystemTime::now()))?;
    assert!(!result.modified);
    assert!(mock.recorded_runs().is_empty());
    Ok(())
}

#[test]
fn malformed_output_header_is_never_run() -> Result<()> {
    let config = TriggerConfig::default();
    let mock = MockExecutor::new();
    let body = "```meta\nrun: sh\n```\n```output a b\necho hi ::run::\n```";
    let result = reconcile(&config, &mock, &note(body, SystemTime::now()))?;
    assert!(!result.modified);
    assert_eq!(result.body, body);
    assert!(mock.recorded_runs().is_empty());
    Ok(())
}

#[test]
fn meta_with_only_unknown_keys_still_claims_the_untagged_fence() -> Result<()> {
    let config = TriggerConfig::default();
    let mock = MockExecutor::new();
    let body = "```meta\ncolour: blue\n```\n```\nls ::run::\n```";
    let result = reconcile(&config, &mock, &note(body, SystemTime::now()))?;
    // markers are consumed, but nothing says how to run an untagged fence
    assert!(result.modified);
    assert_eq!(result.body, "```meta\ncolour: blue\n```\n```\nls\n```");
    assert!(mock.recorded_runs().is_empty());
    Ok(())
}
